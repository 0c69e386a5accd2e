// mysql-helper/src/backup/archive.rs
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use tracing::debug;
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::errors::{AppError, Result};

fn archive_error(context: String) -> impl FnOnce(std::io::Error) -> AppError {
    move |e| AppError::external(context, e)
}

/// Creates a gzipped tar archive of every file below `source_dir`.
///
/// Paths inside the archive are relative to `source_dir`.
pub fn create_tar_gz_archive(source_dir: &Path, archive_dest_path: &Path) -> Result<PathBuf> {
    if !source_dir.is_dir() {
        return Err(AppError::external(
            "Source for archival is not a directory",
            source_dir.display(),
        ));
    }
    if let Some(parent) = archive_dest_path.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::io(parent, e))?;
    }

    debug!(
        source = %source_dir.display(),
        archive = %archive_dest_path.display(),
        "Creating tar.gz archive"
    );

    let archive_file = File::create(archive_dest_path).map_err(|e| AppError::io(archive_dest_path, e))?;
    let mut tar_builder = Builder::new(GzEncoder::new(archive_file, Compression::default()));

    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            AppError::external(format!("Failed to walk directory {}", source_dir.display()), e)
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = path.strip_prefix(source_dir).map_err(|e| {
            AppError::external(format!("Failed to strip prefix from {}", path.display()), e)
        })?;

        tar_builder
            .append_path_with_name(path, name)
            .map_err(archive_error(format!("Failed to append {} to archive", path.display())))?;
    }

    let encoder = tar_builder
        .into_inner()
        .map_err(archive_error(format!("Failed to finish archive {}", archive_dest_path.display())))?;
    encoder
        .finish()
        .map_err(archive_error(format!("Failed to finish gzip stream for {}", archive_dest_path.display())))?;

    Ok(archive_dest_path.to_path_buf())
}

/// Extracts a gzipped tar archive into `extract_to_dir`.
pub fn extract_tar_gz_archive(archive_path: &Path, extract_to_dir: &Path) -> Result<PathBuf> {
    if !archive_path.is_file() {
        return Err(AppError::external("Archive for extraction is not a file", archive_path.display()));
    }
    fs::create_dir_all(extract_to_dir).map_err(|e| AppError::io(extract_to_dir, e))?;

    debug!(
        archive = %archive_path.display(),
        destination = %extract_to_dir.display(),
        "Extracting tar.gz archive"
    );

    let archive_file = File::open(archive_path).map_err(|e| AppError::io(archive_path, e))?;
    Archive::new(GzDecoder::new(archive_file))
        .unpack(extract_to_dir)
        .map_err(archive_error(format!("Failed to unpack archive {}", archive_path.display())))?;

    Ok(extract_to_dir.to_path_buf())
}

/// Extracts a zip archive into `extract_to_dir`. Entries whose paths would
/// leave the directory are rejected by the zip reader.
pub fn extract_zip_archive(archive_path: &Path, extract_to_dir: &Path) -> Result<PathBuf> {
    if !archive_path.is_file() {
        return Err(AppError::external("Archive for extraction is not a file", archive_path.display()));
    }
    fs::create_dir_all(extract_to_dir).map_err(|e| AppError::io(extract_to_dir, e))?;

    debug!(
        archive = %archive_path.display(),
        destination = %extract_to_dir.display(),
        "Extracting zip archive"
    );

    let archive_file = File::open(archive_path).map_err(|e| AppError::io(archive_path, e))?;
    let mut archive = ZipArchive::new(archive_file)
        .map_err(|e| AppError::external(format!("Failed to read zip archive {}", archive_path.display()), e))?;
    archive
        .extract(extract_to_dir)
        .map_err(|e| AppError::external(format!("Failed to unpack archive {}", archive_path.display()), e))?;

    Ok(extract_to_dir.to_path_buf())
}

/// The only regular file below `dir`. Anything other than exactly one file is an error.
pub fn single_file_in(dir: &Path) -> Result<PathBuf> {
    let files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();

    match files.as_slice() {
        [file] => Ok(file.clone()),
        [] => Err(AppError::external("Archive contained no files", dir.display())),
        _ => Err(AppError::external(
            "Archive must contain exactly one SQL file",
            format!("found {} files", files.len()),
        )),
    }
}
