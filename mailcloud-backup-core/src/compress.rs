//! Replace a plain file with a single-entry deflate zip archive.
//!
//! `report.txt` becomes `report.zip` holding one entry named `report.txt`.
//! On success the source is deleted and the archive takes over its
//! identity; on failure the source is left untouched and no archive
//! remains. An existing archive with the same name is overwritten.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use tracing::{debug, error, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Extension given to produced archives.
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Sizes at or above this need ZIP64 records.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Name of the archive that replaces `filename`: the stem plus `.zip`.
pub fn archive_name(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    format!("{stem}.{ARCHIVE_EXTENSION}")
}

/// Compress `dir/filename` into `dir/<stem>.zip` and delete the source.
///
/// Returns the archive's file name.
pub fn archive_file(dir: &Path, filename: &str) -> Result<String, CompressError> {
    let zip_name = archive_name(filename);
    let source_path = dir.join(filename);
    if zip_name == filename {
        debug!(file = %filename, "File already carries the archive name, leaving it as is");
        return Ok(zip_name);
    }
    let archive_path = dir.join(&zip_name);
    debug!(file = %filename, archive = %zip_name, "Archiving file");

    // Open the source first so a missing file never clobbers or leaves an archive.
    let source = File::open(&source_path).map_err(|e| {
        error!(file = %filename, error = %e, "Failed to open file for archiving");
        CompressError::from(e)
    })?;

    if let Err(e) = write_archive(source, &archive_path, filename) {
        error!(file = %filename, error = %e, "Failed to archive file");
        discard(&archive_path);
        return Err(e);
    }

    if let Err(e) = fs::remove_file(&source_path) {
        error!(file = %filename, error = %e, "Archived file but could not delete the original");
        discard(&archive_path);
        return Err(e.into());
    }

    info!(file = %filename, archive = %zip_name, "File archived");
    Ok(zip_name)
}

fn write_archive(source: File, archive: &Path, entry_name: &str) -> Result<(), CompressError> {
    let source_len = source.metadata()?.len();
    let mut reader = BufReader::new(source);

    let mut zip = ZipWriter::new(BufWriter::new(File::create(archive)?));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(source_len >= ZIP64_THRESHOLD);

    zip.start_file(entry_name, options)?;
    io::copy(&mut reader, &mut zip)?;
    let mut writer = zip.finish()?;
    io::Write::flush(&mut writer)?;
    Ok(())
}

fn discard(archive: &Path) {
    if archive.is_file() {
        if let Err(e) = fs::remove_file(archive) {
            error!(archive = %archive.display(), error = %e, "Could not remove partial archive");
        }
    }
}
