use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use mailcloud_backup_core::cloud::MailCloudClient;
use mailcloud_backup_core::pipeline::upload_directory;

use crate::load_config::{load_config, write_default_config, LoadedConfig, DEFAULT_CONFIG_PATH};
use crate::logging::DEFAULT_LOG_PATH;

/// CLI for mailcloud-backup: push a local folder to Cloud Mail.Ru.
#[derive(Parser)]
#[clap(
    name = "mailcloud-backup",
    version,
    about = "Compress, upload and register the files of a local folder in Cloud Mail.Ru"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload every eligible file of the configured local directory
    Upload {
        /// Path to the YAML config file (created with defaults if missing)
        #[clap(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Path of the rotating log file
        #[clap(long, default_value = DEFAULT_LOG_PATH)]
        log_file: PathBuf,
    },
    /// Write a default config file to edit before the first upload
    Init {
        /// Where to write the config file
        #[clap(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Overwrite an existing file
        #[clap(long)]
        force: bool,
    },
}

impl Cli {
    /// Log file the subscriber should write to for this invocation.
    pub fn log_file(&self) -> &Path {
        match &self.command {
            Commands::Upload { log_file, .. } => log_file,
            Commands::Init { .. } => Path::new(DEFAULT_LOG_PATH),
        }
    }
}

/// How a run that did not hit a fatal error ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// A default config was just written; nothing was uploaded.
    ConfigCreated,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Completed => 0,
            RunStatus::ConfigCreated => 2,
        }
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<RunStatus> {
    match cli.command {
        Commands::Init { config, force } => {
            write_default_config(&config, force)?;
            println!("Configuration written to <{}>. Fill in your credentials and run upload.", config.display());
            Ok(RunStatus::Completed)
        }
        Commands::Upload { config, log_file } => {
            let backup = match load_config(&config, &log_file)? {
                LoadedConfig::Ready(backup) => backup,
                LoadedConfig::DefaultWritten(path) => {
                    println!("Please, check out configuration file: <{}> and run me again", path.display());
                    return Ok(RunStatus::ConfigCreated);
                }
            };
            backup.trace_loaded();

            let client = MailCloudClient::new(&backup.credentials.email, &backup.network)?;
            let report = upload_directory(&backup, &client).await?;

            tracing::info!(
                uploaded = report.uploaded.len(),
                failed = report.failures.len(),
                rejected = report.rejected.len(),
                compression_fallbacks = report.compression_fallbacks.len(),
                removed = report.removed.len(),
                removal_errors = report.removal_errors.len(),
                "Upload report"
            );
            tracing::debug!(?report, "Upload report (full debug)");
            println!(
                "Upload complete. {} file(s) uploaded. See {} for details.",
                report.uploaded.len(),
                log_file.display()
            );
            Ok(RunStatus::Completed)
        }
    }
}
