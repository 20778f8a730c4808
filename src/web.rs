#![cfg(not(tarpaulin_include))]

use clap::Parser;
use log::warn;
use tagger::{Config, Workspace, app};

/// Main entry point for the web application
///
/// Loads the hierarchy, restores any auto-saved session and serves the
/// tagging UI until interrupted.
///
/// # Configuration
/// * See [`Config`]; every flag also reads a `TAGGER_*` environment variable
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Fails only if the hierarchy
///   cannot be loaded or the listener cannot bind
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    let (workspace, warning) = Workspace::open(&config)?;
    if let Some(e) = warning {
        warn!("starting with an empty session: {}", e);
    }

    app::run(config, workspace).await
}
