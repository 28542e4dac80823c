use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Account credentials used for the login form.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where files come from and where they land in the cloud.
#[derive(Debug, Clone)]
pub struct Locations {
    /// Destination folder relative to the cloud root, always ending with `/`.
    pub cloud_path: String,
    /// Flat local directory whose files are uploaded.
    pub local_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Behaviour {
    /// Deflate every file outside the preserve set before upload.
    pub archive_files: bool,
    /// Delete local copies of files that were posted and registered.
    pub remove_uploaded: bool,
}

/// Options passed through to the HTTP client untouched.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub verify_ssl: bool,
    pub timeout: Option<Duration>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            verify_ssl: true,
            timeout: None,
        }
    }
}

/// Immutable configuration of one backup run.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub credentials: Credentials,
    pub locations: Locations,
    pub behaviour: Behaviour,
    pub network: NetworkConfig,
    /// File names in the local directory that must never be uploaded
    /// (the tool's own config, logs and executable).
    pub skip_files: HashSet<String>,
}

impl BackupConfig {
    pub fn trace_loaded(&self) {
        info!(
            email = %self.credentials.email,
            cloud_path = %self.locations.cloud_path,
            local_path = %self.locations.local_path.display(),
            archive_files = self.behaviour.archive_files,
            remove_uploaded = self.behaviour.remove_uploaded,
            "Loaded BackupConfig"
        );
        debug!(?self, "BackupConfig loaded (full debug)");
    }
}

/// Appends the trailing slash the registration endpoint expects on folders.
pub fn normalise_cloud_path(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}
