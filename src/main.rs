mod cli;
mod config;
mod history;
mod hooks;
mod orchestrator;
mod package_manager;
mod report;
mod schedule;
mod sysinfo;

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = cli::Cli::parse();

    // RUST_LOG 优先；-v 只提高默认级别
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let config = config::Config::load_or_default(args.config.as_deref())?;

    if cli::run(args.command, config).await? {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
