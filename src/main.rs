use clap::Parser;
use mailcloud_backup::cli::{run, Cli};
use mailcloud_backup::logging::init_tracing;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Load environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let guard = match init_tracing(cli.log_file()) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e:#}");
            None
        }
    };
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "mailcloud-backup starting");

    let code = match run(cli).await {
        Ok(status) => {
            tracing::info!(?status, "CLI completed");
            status.exit_code()
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "CLI exited with error");
            eprintln!("[ERROR] {e:#}");
            1
        }
    };
    tracing::info!("###----------SESSION ENDED----------###");

    // Flush the log worker before exiting; process::exit skips destructors.
    drop(guard);
    std::process::exit(code);
}
