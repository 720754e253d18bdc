//! joyna-rs: chat relay server for the Joyna voice companion.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use joyna_rs::api::{self, AppState};
use joyna_rs::config::Config;
use joyna_rs::gateway::GeminiClient;

#[derive(Parser, Debug)]
#[command(name = "joyna-rs", about = "Child-friendly chat companion server")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the history log path
    #[arg(long)]
    history: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy HTTP internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("joyna-rs starting");

    let mut config = Config::load(args.config.as_deref());
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(history) = args.history {
        config.history.path = history;
    }
    info!(
        "Model: {} (history log: {}, max exchanges: {})",
        config.gemini.model,
        config.history.path.display(),
        config.transcript.max_exchanges
    );

    let model = Arc::new(GeminiClient::new(&config.gemini));
    let state = AppState::new(model, &config);

    api::serve(state, &config.server.bind_addr()).await?;

    Ok(())
}
