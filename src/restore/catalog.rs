// mysql-helper/src/restore/catalog.rs
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::backup::TIMESTAMP_FORMAT;
use crate::errors::{AppError, Result};

/// Container formats a restore source may come in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Zip,
}

const ARCHIVE_SUFFIXES: [(&str, ArchiveKind); 3] =
    [(".tar.gz", ArchiveKind::TarGz), (".tgz", ArchiveKind::TarGz), (".zip", ArchiveKind::Zip)];

fn entries(dir: &Path) -> Result<Vec<walkdir::DirEntry>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .map(|entry| {
            entry.map_err(|e| AppError::external(format!("Failed to read backups in {}", dir.display()), e))
        })
        .collect()
}

/// Database directories with at least one archive, sorted by name.
pub fn backed_up_databases(profile_backups: &Path) -> Result<Vec<String>> {
    let mut databases = Vec::new();
    for entry in entries(profile_backups)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().is_dir() && !name.starts_with('.') && !archives(entry.path())?.is_empty() {
            databases.push(name);
        }
    }
    Ok(databases)
}

/// Archives in `dir`, newest first. Timestamped names sort chronologically,
/// with same-second archives ordered by their `-N` sequence.
pub fn archives(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut archives: Vec<PathBuf> = entries(dir)?
        .into_iter()
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| archive_kind(entry.path()).is_some())
        .map(|entry| entry.into_path())
        .collect();
    archives.sort_by_cached_key(|path| {
        let name = file_name(path);
        let (stamp, sequence) = split_stem(&name);
        (stamp.to_string(), sequence)
    });
    archives.reverse();
    Ok(archives)
}

/// Menu label for an archive: its timestamp in readable form, or the file name.
pub fn archive_label(path: &Path) -> String {
    let name = file_name(path);
    let (stamp, sequence) = split_stem(&name);
    match (NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT), sequence) {
        (Ok(taken), 0) => taken.format("%Y-%m-%d %H:%M:%S").to_string(),
        (Ok(taken), n) => format!("{} #{}", taken.format("%Y-%m-%d %H:%M:%S"), n),
        (Err(_), _) => name,
    }
}

pub fn archive_kind(path: &Path) -> Option<ArchiveKind> {
    let name = file_name(path);
    ARCHIVE_SUFFIXES
        .iter()
        .find(|(suffix, _)| name.ends_with(*suffix))
        .map(|(_, kind)| *kind)
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

// "2024-01-01-10-00-00-2.tar.gz" -> ("2024-01-01-10-00-00", 2)
fn split_stem(name: &str) -> (&str, u32) {
    let stem = ARCHIVE_SUFFIXES
        .iter()
        .find_map(|(suffix, _)| name.strip_suffix(*suffix))
        .unwrap_or(name);
    match stem.rsplit_once('-') {
        Some((stamp, sequence))
            if NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).is_ok() =>
        {
            match sequence.parse() {
                Ok(n) => (stamp, n),
                Err(_) => (stem, 0),
            }
        }
        _ => (stem, 0),
    }
}
