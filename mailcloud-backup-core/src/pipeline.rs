//! High-level pipeline: one backup run from login to local cleanup.
//!
//! The run moves through a fixed, linear sequence of stages:
//!
//! ```text
//! Init -> Authenticated -> TokenObtained -> DomainResolved -> Scanning
//!      -> (per file: Posting -> Registering -> Tracked | Failed)* -> Cleanup -> Done
//! ```
//!
//! # Responsibilities
//! - Fail fast on session setup: a missing login, CSRF token, upload domain or
//!   local directory aborts the run before any file is touched.
//! - Per file, post then register. A failure on either step is recorded and the
//!   run moves on to the next file. A registration failure leaves an
//!   unregistered blob behind on the server.
//! - Track the Uploaded Set: files that were both posted and registered. Only
//!   these are ever deleted locally.
//!
//! # Error Handling
//! Fatal stages return a [`PipelineError`]. Everything else ends up in the
//! returned [`UploadReport`].
//!
//! # Navigation
//! - Main entrypoint: [`upload_directory`]
//! - Supporting types: [`UploadReport`], [`FileFailure`], [`PipelineError`]

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use crate::config::BackupConfig;
use crate::contract::{CloudApi, CloudError, CsrfToken, UploadDomain};
use crate::mime::DEFAULT_MIME_TYPE;
use crate::scanner::{CandidateFile, DirectoryScanner, Rejected, ScanOptions, MAX_FILE_SIZE};

/// Stages a run passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Authenticated,
    TokenObtained,
    DomainResolved,
    Scanning,
    Cleanup,
    Done,
}

/// A fatal failure: the run stopped before (or while) listing files.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("authentication failed: {0}")]
    Authentication(#[source] CloudError),
    #[error("CSRF token is absent: {0}")]
    CsrfToken(#[source] CloudError),
    #[error("upload domain is absent: {0}")]
    UploadDomain(#[source] CloudError),
    #[error("local directory {0} does not exist")]
    MissingLocalDirectory(PathBuf),
    #[error("local directory could not be listed: {0}")]
    Scan(#[source] std::io::Error),
}

impl PipelineError {
    /// The last stage that was reached before the run stopped.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Authentication(_) => Stage::Init,
            PipelineError::CsrfToken(_) => Stage::Authenticated,
            PipelineError::UploadDomain(_) => Stage::TokenObtained,
            PipelineError::MissingLocalDirectory(_) | PipelineError::Scan(_) => Stage::DomainResolved,
        }
    }
}

/// Why a file that was admitted for upload did not make it into the cloud.
#[derive(Debug)]
pub enum FailureKind {
    /// The binary post failed; nothing was stored remotely.
    Post(CloudError),
    /// The post succeeded but the blob could not be committed to its path.
    Registration(CloudError),
}

#[derive(Debug)]
pub struct FileFailure {
    pub name: String,
    pub kind: FailureKind,
}

/// A file that was uploaded in its original form because compression failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionFallback {
    pub name: String,
    pub error: String,
}

/// Outcome of a completed run.
#[derive(Debug, Default)]
pub struct UploadReport {
    /// The Uploaded Set: posted and registered this run.
    pub uploaded: BTreeSet<String>,
    pub failures: Vec<FileFailure>,
    pub rejected: Vec<Rejected>,
    pub compression_fallbacks: Vec<CompressionFallback>,
    /// Local copies deleted during cleanup.
    pub removed: Vec<String>,
    pub removal_errors: Vec<(String, String)>,
}

/// Run one backup of `config.locations.local_path` into the cloud.
pub async fn upload_directory<C>(config: &BackupConfig, cloud: &C) -> Result<UploadReport, PipelineError>
where
    C: CloudApi + ?Sized,
{
    info!("[UPLOAD] Starting backup run");

    // --- Session setup ---
    cloud
        .authenticate(&config.credentials)
        .await
        .map_err(|e| {
            error!(error = %e, "[UPLOAD][ERROR] Mail authorization unsuccessful");
            PipelineError::Authentication(e)
        })?;
    debug!(stage = ?Stage::Authenticated, "[UPLOAD] Stage reached");

    let token = cloud.fetch_csrf_token().await.map_err(|e| {
        error!(error = %e, "[UPLOAD][ERROR] CSRF token is absent, check the credentials");
        PipelineError::CsrfToken(e)
    })?;
    debug!(stage = ?Stage::TokenObtained, "[UPLOAD] Stage reached");

    let domain = cloud.resolve_upload_domain(&token).await.map_err(|e| {
        error!(error = %e, "[UPLOAD][ERROR] Upload domain is absent");
        PipelineError::UploadDomain(e)
    })?;
    debug!(stage = ?Stage::DomainResolved, domain = %domain.as_str(), "[UPLOAD] Stage reached");

    let local_path = &config.locations.local_path;
    if !local_path.is_dir() {
        error!(path = %local_path.display(), "[UPLOAD][ERROR] Local directory does not exist");
        return Err(PipelineError::MissingLocalDirectory(local_path.clone()));
    }

    // --- Scan ---
    let space_budget = cloud.query_free_space(&token).await;
    let options = ScanOptions {
        archive_files: config.behaviour.archive_files,
        skip_files: config.skip_files.clone(),
        max_file_size: MAX_FILE_SIZE,
        space_budget,
    };
    let scanner = DirectoryScanner::open(local_path, options).map_err(|e| {
        error!(path = %local_path.display(), error = %e, "[UPLOAD][ERROR] Could not list local directory");
        PipelineError::Scan(e)
    })?;
    debug!(stage = ?Stage::Scanning, space_budget, "[UPLOAD] Stage reached");

    let mut report = UploadReport::default();
    for item in scanner {
        let file = match item {
            Ok(file) => file,
            Err(rejected) => {
                report.rejected.push(rejected);
                continue;
            }
        };
        if let Some(error) = &file.compression_error {
            report.compression_fallbacks.push(CompressionFallback {
                name: file.name.clone(),
                error: error.clone(),
            });
        }
        match transfer(config, cloud, &token, &domain, &file).await {
            Ok(()) => {
                report.uploaded.insert(file.name);
            }
            Err(kind) => report.failures.push(FileFailure { name: file.name, kind }),
        }
    }

    // --- Cleanup ---
    debug!(stage = ?Stage::Cleanup, "[UPLOAD] Stage reached");
    if config.behaviour.remove_uploaded && !report.uploaded.is_empty() {
        for name in &report.uploaded {
            match fs::remove_file(local_path.join(name)) {
                Ok(()) => {
                    debug!(file = %name, "[UPLOAD] Local copy removed");
                    report.removed.push(name.clone());
                }
                Err(e) => {
                    warn!(file = %name, error = %e, "[UPLOAD] Could not remove local copy");
                    report.removal_errors.push((name.clone(), e.to_string()));
                }
            }
        }
    }

    info!(
        stage = ?Stage::Done,
        uploaded = report.uploaded.len(),
        failed = report.failures.len(),
        rejected = report.rejected.len(),
        removed = report.removed.len(),
        "[UPLOAD] {} files successfully uploaded",
        report.uploaded.len()
    );
    Ok(report)
}

/// Post one file, then register it. `Ok` means it belongs in the Uploaded Set.
async fn transfer<C>(
    config: &BackupConfig,
    cloud: &C,
    token: &CsrfToken,
    domain: &UploadDomain,
    file: &CandidateFile,
) -> Result<(), FailureKind>
where
    C: CloudApi + ?Sized,
{
    let mime_type = file.mime_type.unwrap_or_else(|| {
        warn!(file = %file.name, default = DEFAULT_MIME_TYPE, "No file type guessed, using default");
        DEFAULT_MIME_TYPE
    });

    let receipt = match cloud.upload_file(domain, &file.path, &file.name, mime_type).await {
        Ok(receipt) => {
            info!(file = %file.name, "[UPLOAD] File successfully posted");
            receipt
        }
        Err(e) => {
            error!(file = %file.name, error = %e, "[UPLOAD][ERROR] File post failed");
            return Err(FailureKind::Post(e));
        }
    };

    match cloud
        .register_file(&config.locations.cloud_path, &file.name, &receipt, token)
        .await
    {
        Ok(()) => {
            info!(file = %file.name, "[UPLOAD] File successfully added");
            Ok(())
        }
        Err(e) => {
            error!(file = %file.name, hash = %receipt.hash, error = %e, "[UPLOAD][ERROR] File addition failed");
            Err(FailureKind::Registration(e))
        }
    }
}
