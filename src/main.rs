//! Main entry point for the mavenize CLI application.
//!
//! Usage: `mavenize <OUTPUT> <INPUT> <POM>`. Any failure is returned
//! from `main`, which prints it and exits non-zero.

use anyhow::Result;
use clap::Parser;

use mavenize::{Cli, HostClock, Repackager};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Verbosity comes from RUST_LOG only; warnings and errors by default
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let config = cli.config()?;
    let summary = Repackager::new(HostClock::new()).run(&config).await?;

    log::info!(
        "{} now holds {} entries",
        config.output().display(),
        summary.total_entries
    );

    Ok(())
}
