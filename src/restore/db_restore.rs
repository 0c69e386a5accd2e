// mysql-helper/src/restore/db_restore.rs
use std::fs;
use std::path::Path;
use tracing::info;

use super::catalog::{ArchiveKind, archive_kind};
use crate::backup::archive::{extract_tar_gz_archive, extract_zip_archive, single_file_in};
use crate::errors::{AppError, Result};
use crate::profiles::resolver::ConnectionParams;
use crate::utils::process::{CommandRequest, run_checked};
use crate::workflow::Context;

pub const MYSQL: &str = "mysql";

/// The `mysql` invocation importing a dump from stdin into `database`.
pub fn import_request(params: &ConnectionParams, database: &str, sql_file_path: &Path, size: u64) -> CommandRequest {
    CommandRequest::new(MYSQL)
        .arg(format!("--host={}", params.host))
        .arg(format!("--port={}", params.port))
        .arg(format!("--user={}", params.username))
        .arg(format!("--default-character-set={}", params.charset))
        .arg(database)
        .env("MYSQL_PWD", params.password.clone())
        .stdin_from(sql_file_path)
        .with_progress(format!("Importing into {}", database), size)
}

/// Drops and recreates `database`, then imports `source` (a `.sql` file or a
/// `.tar.gz`/`.zip` archive holding exactly one file). Archives are unpacked
/// and checked before the database is touched.
pub async fn restore_into(cx: &Context<'_>, params: &ConnectionParams, database: &str, source: &Path) -> Result<()> {
    cx.processes.ensure_available(&[MYSQL])?;
    if !source.is_file() {
        return Err(AppError::invalid(format!("SQL source {} does not exist", source.display())));
    }

    // Lives until the import finishes.
    let kind = archive_kind(source);
    let extraction_dir = match kind {
        Some(_) => Some(
            tempfile::Builder::new()
                .prefix("mysql-helper-restore-")
                .tempdir()
                .map_err(|e| AppError::external("Failed to create extraction directory", e))?,
        ),
        None => None,
    };
    let sql_file_path = match (kind, &extraction_dir) {
        (Some(kind), Some(dir)) => {
            eprintln!("📦 Extracting {}...", source.display());
            match kind {
                ArchiveKind::TarGz => extract_tar_gz_archive(source, dir.path())?,
                ArchiveKind::Zip => extract_zip_archive(source, dir.path())?,
            };
            single_file_in(dir.path())?
        }
        _ => source.to_path_buf(),
    };

    let size = fs::metadata(&sql_file_path)
        .map_err(|e| AppError::io(&sql_file_path, e))?
        .len();

    eprintln!("🗑  Recreating database {} on {}...", database, params.name);
    cx.databases.recreate_database(params, database).await?;

    eprintln!("🔄 Importing {} into {}...", sql_file_path.display(), database);
    run_checked(cx.processes, &import_request(params, database, &sql_file_path, size))?;
    info!(database, connection = %params.name, bytes = size, "Import complete");

    Ok(())
}
