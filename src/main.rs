//! modcache - A caching Go module proxy
//!
//! modcache provides:
//! - The Go module proxy protocol (list/info/mod/zip) over HTTP
//! - One origin fetch per module at a time, shared by queued requests
//! - Resolution of abbreviated commit hashes to cached pseudo-versions
//! - Offline inspection commands (get/resolve/escape/doctor)

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod backends;
mod cache;
mod cli;
mod core;
mod fetch;
mod proxy;
mod resolve;
mod server;

fn default_filter(cli: &cli::Cli) -> &'static str {
    if cli.verbose {
        "modcache=debug"
    } else if cli.quiet {
        "modcache=warn"
    } else {
        "modcache=info"
    }
}

fn main() -> Result<()> {
    // Check for unsupported platforms
    #[cfg(windows)]
    {
        eprintln!("Error: Windows is not supported. Please use WSL (not guaranteed to work).");
        std::process::exit(1);
    }

    let cli = cli::Cli::parse();

    // Logs go to stderr; `get` writes artifact bytes to stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(&cli))),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    cli::run(cli)
}
