//! Log sinks for the CLI: a size-capped rotating log file plus warnings on stderr.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const DEFAULT_LOG_PATH: &str = "upload.log";
/// The active log file is rotated once it would grow past this size.
pub const MAX_LOG_BYTES: u64 = 5 * 1024 * 1024;
/// Rotated generations kept next to the active file (`upload.log.1`, `upload.log.2`).
pub const LOG_BACKUPS: usize = 2;

/// Append-only file writer that rotates by size.
///
/// When a write would push the active file past `max_bytes`, the file is
/// renamed to `<path>.1` (shifting older generations up, dropping the
/// oldest) and a fresh file is started.
pub struct RotatingFile {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    backups: usize,
}

impl RotatingFile {
    pub fn open(path: &Path, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            written,
            max_bytes,
            backups,
        })
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backups == 0 {
            self.file = File::create(&self.path)?;
        } else {
            for generation in (1..self.backups).rev() {
                let from = backup_path(&self.path, generation);
                if from.exists() {
                    fs::rename(&from, backup_path(&self.path, generation + 1))?;
                }
            }
            fs::rename(&self.path, backup_path(&self.path, 1))?;
            self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        }
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// `<path>.<generation>`
pub fn backup_path(path: &Path, generation: usize) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}

/// Install the global subscriber: everything at `RUST_LOG` (default `info`)
/// to the rotating log file, warnings and errors to stderr.
///
/// Keep the returned guard alive until exit so buffered lines are flushed.
pub fn init_tracing(log_path: &Path) -> Result<WorkerGuard> {
    let writer = RotatingFile::open(log_path, MAX_LOG_BYTES, LOG_BACKUPS)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;
    let (file_writer, guard) = tracing_appender::non_blocking(writer);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(env_filter);
    let console_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(guard)
}
