use clap::Parser;
use mirror_sync::daemon::config::{
    Settings, DEFAULT_CONFIG_FILE, DEFAULT_LOG_DIR, DEFAULT_REPO_DIR, POLL_INTERVAL,
};
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;

/// Keeps git mirrors up to date on per-mirror cron schedules.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Path to the mirror config JSON
    #[arg(short, long, env = "MIRROR_CONFIG_FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Directory holding mirror-sync.log and its rotated siblings
    #[arg(long, env = "MIRROR_LOG_DIR", default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,
    /// Directory holding the `<name>.git` mirrors
    #[arg(long, env = "MIRROR_REPO_DIR", default_value = DEFAULT_REPO_DIR)]
    repo_dir: PathBuf,
    #[command(subcommand)]
    command: Option<cli::Command>,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Cli::parse();
    let settings = Settings {
        config_file: args.config,
        log_dir: args.log_dir,
        repo_dir: args.repo_dir,
        poll_interval: POLL_INTERVAL,
    };

    let command = args.command.unwrap_or(cli::Command::Daemon);
    match cli::run(&settings, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
