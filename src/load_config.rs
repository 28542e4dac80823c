use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use mailcloud_backup_core::config::{
    normalise_cloud_path, BackupConfig, Behaviour, Credentials, Locations, NetworkConfig,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::logging::LOG_BACKUPS;

/// Configuration file looked up when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = ".mailcloud.yaml";
/// Overrides `Credentials.Email` when set.
pub const ENV_EMAIL: &str = "MAILCLOUD_EMAIL";
/// Overrides `Credentials.Password` when set.
pub const ENV_PASSWORD: &str = "MAILCLOUD_PASSWORD";

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct StaticConfig {
    credentials: CredentialsSection,
    locations: LocationsSection,
    behaviour: BehaviourSection,
    network: NetworkSection,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct CredentialsSection {
    email: String,
    password: String,
}

impl Default for CredentialsSection {
    fn default() -> Self {
        Self {
            email: "your_email@mail.ru".into(),
            password: "your_email_password".into(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct LocationsSection {
    /// Relative to the cloud root; the folder must already exist in the cloud.
    cloud_path: String,
    local_path: PathBuf,
}

impl Default for LocationsSection {
    fn default() -> Self {
        Self {
            cloud_path: "backups/".into(),
            local_path: PathBuf::from("./upload"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct BehaviourSection {
    #[serde(with = "yes_no")]
    archive_files: bool,
    #[serde(with = "yes_no")]
    remove_uploaded: bool,
}

impl Default for BehaviourSection {
    fn default() -> Self {
        Self {
            archive_files: true,
            remove_uploaded: true,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct NetworkSection {
    #[serde(with = "yes_no")]
    verify_ssl: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_secs: Option<u64>,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            verify_ssl: true,
            timeout_secs: None,
        }
    }
}

/// `yes`/`no` flags, as written in the default file. Plain YAML booleans
/// and a few common spellings are accepted as well.
mod yes_no {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "yes" } else { "no" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match Flag::deserialize(deserializer)? {
            Flag::Bool(b) => Ok(b),
            Flag::Int(1) => Ok(true),
            Flag::Int(0) => Ok(false),
            Flag::Int(other) => Err(serde::de::Error::custom(format!(
                "expected yes or no, got {other}"
            ))),
            Flag::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "yes" | "y" | "true" | "on" | "1" => Ok(true),
                "no" | "n" | "false" | "off" | "0" => Ok(false),
                _ => Err(serde::de::Error::custom(format!(
                    "expected yes or no, got {text:?}"
                ))),
            },
        }
    }
}

/// Result of looking for the configuration file.
#[derive(Debug)]
pub enum LoadedConfig {
    Ready(BackupConfig),
    /// No file existed; a default one was written and must be edited first.
    DefaultWritten(PathBuf),
}

/// Loads the YAML configuration, applies environment overrides for the
/// credentials and builds the immutable [`BackupConfig`] for this run.
///
/// A missing file is not an error: a default file is written in its place.
pub fn load_config<P: AsRef<Path>>(path: P, log_path: &Path) -> Result<LoadedConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    if !path_ref.exists() {
        write_default_config(path_ref, false)?;
        warn!(config_path = ?path_ref, "No configuration file provided, default written. Prepare it and run again.");
        return Ok(LoadedConfig::DefaultWritten(path_ref.to_path_buf()));
    }

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let static_conf: StaticConfig = if config_content.trim().is_empty() {
        StaticConfig::default()
    } else {
        match serde_yaml::from_str(&config_content) {
            Ok(conf) => {
                info!(config_path = ?path_ref, "Parsed config YAML successfully");
                conf
            }
            Err(e) => {
                error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
                return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
            }
        }
    };

    let mut credentials = Credentials {
        email: static_conf.credentials.email,
        password: static_conf.credentials.password,
    };
    if let Some(email) = non_empty_env(ENV_EMAIL) {
        info!(var = ENV_EMAIL, "Email taken from environment");
        credentials.email = email;
    }
    if let Some(password) = non_empty_env(ENV_PASSWORD) {
        info!(var = ENV_PASSWORD, "Password taken from environment");
        credentials.password = password;
    }

    let config = BackupConfig {
        credentials,
        locations: Locations {
            cloud_path: normalise_cloud_path(&static_conf.locations.cloud_path),
            local_path: static_conf.locations.local_path,
        },
        behaviour: Behaviour {
            archive_files: static_conf.behaviour.archive_files,
            remove_uploaded: static_conf.behaviour.remove_uploaded,
        },
        network: NetworkConfig {
            verify_ssl: static_conf.network.verify_ssl,
            timeout: static_conf.network.timeout_secs.map(Duration::from_secs),
        },
        skip_files: skip_list(path_ref, log_path),
    };

    info!(
        email = %config.credentials.email,
        local_path = %config.locations.local_path.display(),
        "Config loaded and merged successfully"
    );
    Ok(LoadedConfig::Ready(config))
}

/// Writes the default configuration (placeholder credentials) to `path`.
///
/// Refuses to replace an existing file unless `force` is set.
pub fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Configuration file {} already exists, use --force to overwrite it",
            path.display()
        );
    }
    let yaml = serde_yaml::to_string(&StaticConfig::default())
        .context("Failed to render default configuration")?;
    fs::write(path, yaml)
        .with_context(|| format!("Failed to write configuration file {}", path.display()))?;
    info!(config_path = ?path, "Default configuration written");
    Ok(())
}

/// Names the scanner must never upload: this tool's config, its log file
/// with rotated backups, and its own executable.
pub fn skip_list(config_path: &Path, log_path: &Path) -> HashSet<String> {
    let mut skip = HashSet::new();
    if let Some(name) = file_name(config_path) {
        skip.insert(name);
    }
    if let Some(name) = file_name(log_path) {
        for generation in 1..=LOG_BACKUPS {
            skip.insert(format!("{name}.{generation}"));
        }
        skip.insert(name);
    }
    if let Some(name) = std::env::current_exe().ok().as_deref().and_then(file_name) {
        skip.insert(name);
    }
    skip
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}
