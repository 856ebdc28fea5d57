//! CLI entry point for girgen.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

/// girgen — generate Rust bindings from a resolved GIR type model.
#[derive(Parser, Debug)]
#[command(name = "girgen", version, about)]
struct Cli {
    /// Path to the girgen.toml configuration file.
    #[arg(default_value = "girgen.toml")]
    config: PathBuf,

    /// Output directory (overrides config).
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("girgen=info")),
        )
        .init();

    let cli = Cli::parse();
    girgen::run(&cli.config, cli.output.as_deref())?;
    Ok(())
}
