use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ff_annotate::cli::Cli;
use ff_annotate::commands::{annotate_directory, AnnotateOptions};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let dir = std::fs::canonicalize(&cli.dir_path)
        .with_context(|| format!("Invalid directory: {}", cli.dir_path))?;

    let options = AnnotateOptions {
        order: cli.order,
        projection: cli.projection,
        dry_run: cli.dry_run,
    };

    annotate_directory(&dir, &options)
}
