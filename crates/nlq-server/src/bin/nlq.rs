//! NLQ command line: translate, validate, fix and improve queries offline

use clap::Parser;
use nlq_server::cli::Cli;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Secrets live in .env
    dotenvy::dotenv().ok();

    let passed = Cli::parse().run().await?;
    Ok(if passed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
