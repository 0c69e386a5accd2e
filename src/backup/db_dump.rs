// mysql-helper/src/backup/db_dump.rs
use regex::bytes::Regex;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::errors::{AppError, Result};
use crate::profiles::resolver::ConnectionParams;
use crate::utils::process::CommandRequest;

pub const MYSQLDUMP: &str = "mysqldump";

/// Options passed to every dump, before any configured extras.
pub const DUMP_OPTIONS: &[&str] = &[
    "--compress",
    "--complete-insert",
    "--disable-keys",
    "--quick",
    "--single-transaction",
    "--add-drop-table",
];

/// Builds the mysqldump invocation for `database`. The password travels in
/// `MYSQL_PWD`, never on the command line.
pub fn dump_request(params: &ConnectionParams, database: &str, extra_options: &[String]) -> CommandRequest {
    CommandRequest::new(MYSQLDUMP)
        .arg(format!("--host={}", params.host))
        .arg(format!("--port={}", params.port))
        .arg(format!("--user={}", params.username))
        .arg(format!("--default-character-set={}", params.charset))
        .args(DUMP_OPTIONS.iter().copied())
        .args(extra_options.iter().cloned())
        .arg(database)
        .env("MYSQL_PWD", params.password.clone())
}

const DEFINER_PATTERN: &str = r"\sDEFINER=`[^`]+`@`[^`]+`";

/// Removes `DEFINER=`user`@`host`` clauses so views, triggers and routines can be
/// restored by a different account. Rewrites `path` line by line.
pub fn strip_definers(path: &Path) -> Result<u64> {
    let definer = Regex::new(DEFINER_PATTERN).map_err(|e| AppError::external("Invalid DEFINER pattern", e))?;
    let stripped_path = path.with_extension("stripped");
    let mut replaced = 0u64;
    {
        let reader = File::open(path).map_err(|e| AppError::io(path, e))?;
        let mut reader = BufReader::new(reader);
        let writer = File::create(&stripped_path).map_err(|e| AppError::io(&stripped_path, e))?;
        let mut writer = BufWriter::new(writer);

        let mut line = Vec::new();
        loop {
            line.clear();
            let read = reader.read_until(b'\n', &mut line).map_err(|e| AppError::io(path, e))?;
            if read == 0 {
                break;
            }
            let cleaned = definer.replace_all(&line, &b""[..]);
            if cleaned.len() != line.len() {
                replaced += 1;
            }
            writer.write_all(&cleaned).map_err(|e| AppError::io(&stripped_path, e))?;
        }
        writer.flush().map_err(|e| AppError::io(&stripped_path, e))?;
    }

    fs::rename(&stripped_path, path).map_err(|e| AppError::io(path, e))?;
    Ok(replaced)
}

/// Fails unless `path` exists and is non-empty.
pub fn verify_dump(path: &Path) -> Result<u64> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        Ok(_) => Err(AppError::external("mysqldump produced an empty dump", path.display())),
        Err(e) => Err(AppError::external(format!("mysqldump produced no dump at {}", path.display()), e)),
    }
}
