use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod compare;
mod models;
mod replay;

#[derive(Parser)]
#[command(name = "glance", version, about = "Active liveness challenge engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive a liveness session from a scripted frame timeline
    Replay(replay::ReplayArgs),

    /// Cosine similarity between two descriptors
    Compare {
        a: PathBuf,
        b: PathBuf,
        #[arg(long, default_value_t = 0.8)]
        threshold: f32,
    },

    /// Verify model files against a SHA-256 manifest
    CheckModels {
        dir: PathBuf,
        #[arg(long)]
        manifest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // stdout carries event output; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Replay(args) => replay::run(args).await,
        Command::Compare { a, b, threshold } => compare::run(&a, &b, threshold),
        Command::CheckModels { dir, manifest } => models::check(&dir, &manifest),
    }
}
