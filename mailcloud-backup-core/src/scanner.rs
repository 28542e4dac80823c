//! Single pass over the local backup directory.
//!
//! [`DirectoryScanner`] walks the directory listing lazily, in native
//! listing order, and yields one item per regular file:
//!   - `Ok(CandidateFile)` for files admitted for upload,
//!   - `Err(Rejected)` for files that were looked at but must not be posted.
//!
//! The listing itself is read when the scanner is opened, so archives
//! created during the scan are never picked up as new entries.
//! Skip-listed names and sub-directories produce no item at all.
//! Compression (when enabled) happens while iterating, so a file is
//! already replaced by its archive by the time it is yielded.
//!
//! The space budget is a snapshot taken before the scan starts; it is not
//! reduced as files are admitted, so several files that each fit may
//! together exceed the real free space.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::compress::{archive_file, archive_name};
use crate::mime::{guess_mime_type, is_preserved};

/// Upper bound (exclusive) on the size of a single uploaded file: 2 GiB.
pub const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Knobs for one scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub archive_files: bool,
    pub skip_files: HashSet<String>,
    pub max_file_size: u64,
    /// Free cloud space sampled once before scanning.
    pub space_budget: u64,
}

/// A file ready to be posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    /// Name inside the scanned directory (the archive name if compressed).
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub mime_type: Option<&'static str>,
    /// Set when compression was attempted and the original was kept instead.
    pub compression_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// At or above the per-file ceiling.
    TooLarge { size: u64, limit: u64 },
    /// At or above the space budget snapshot.
    InsufficientSpace { size: u64, budget: u64 },
    /// Name or metadata could not be read.
    Unreadable(String),
}

/// A file that was examined but will not be posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub name: String,
    pub reason: RejectReason,
}

/// Lazy, single-pass, non-restartable scan of one flat directory.
pub struct DirectoryScanner {
    dir: PathBuf,
    entries: std::vec::IntoIter<fs::DirEntry>,
    options: ScanOptions,
    yielded: HashSet<String>,
}

impl DirectoryScanner {
    pub fn open(dir: &Path, options: ScanOptions) -> std::io::Result<Self> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            match entry {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to read directory entry"),
            }
        }
        debug!(
            entries = entries.len(),
            dir = %dir.display(),
            space_budget = options.space_budget,
            archive_files = options.archive_files,
            "Scanning directory"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            entries: entries.into_iter(),
            options,
            yielded: HashSet::new(),
        })
    }

    fn examine(&mut self, entry: fs::DirEntry) -> Option<Result<CandidateFile, Rejected>> {
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                let name = raw.to_string_lossy().into_owned();
                warn!(file = %name, "File name is not valid UTF-8, omitting");
                return Some(Err(Rejected {
                    name,
                    reason: RejectReason::Unreadable("file name is not valid UTF-8".into()),
                }));
            }
        };

        if self.options.skip_files.contains(&name) {
            debug!(file = %name, "Skip-listed file, omitting");
            return None;
        }

        // Follows symlinks, like the listing it mirrors.
        match fs::metadata(entry.path()) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                debug!(file = %name, "Not a regular file, omitting");
                return None;
            }
            Err(e) => return Some(Err(unreadable(name, &e))),
        }

        let mut name = name;
        let mut compression_error = None;
        if self.options.archive_files && !is_preserved(guess_mime_type(&name)) {
            let target = archive_name(&name);
            if self.yielded.contains(&target) {
                warn!(file = %name, archive = %target, "Archive name already handed out this run, keeping original");
                compression_error = Some(format!("{target} already handed out this run"));
            } else {
                match archive_file(&self.dir, &name) {
                    Ok(archived) => name = archived,
                    Err(e) => compression_error = Some(e.to_string()),
                }
            }
        }

        if self.yielded.contains(&name) {
            warn!(file = %name, "File already handed out this run, omitting duplicate");
            return None;
        }

        let path = self.dir.join(&name);
        let size = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) => return Some(Err(unreadable(name, &e))),
        };

        self.yielded.insert(name.clone());
        Some(self.admit(CandidateFile {
            mime_type: guess_mime_type(&name),
            name,
            path,
            size,
            compression_error,
        }))
    }

    fn admit(&self, file: CandidateFile) -> Result<CandidateFile, Rejected> {
        let limit = self.options.max_file_size;
        if file.size >= limit {
            warn!(file = %file.name, size = file.size, limit, "File is too large, omitting");
            return Err(Rejected {
                name: file.name,
                reason: RejectReason::TooLarge { size: file.size, limit },
            });
        }

        let budget = self.options.space_budget;
        if file.size >= budget {
            warn!(
                file = %file.name,
                left = budget,
                required = file.size,
                "The cloud has not enough space for file, omitting"
            );
            return Err(Rejected {
                name: file.name,
                reason: RejectReason::InsufficientSpace { size: file.size, budget },
            });
        }

        Ok(file)
    }
}

impl Iterator for DirectoryScanner {
    type Item = Result<CandidateFile, Rejected>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = self.entries.next()?;
            if let Some(item) = self.examine(entry) {
                return Some(item);
            }
        }
    }
}

fn unreadable(name: String, e: &std::io::Error) -> Rejected {
    warn!(file = %name, error = %e, "Could not read file metadata, omitting");
    Rejected {
        name,
        reason: RejectReason::Unreadable(e.to_string()),
    }
}
