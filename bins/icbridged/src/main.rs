//! icbridged - IRC to ICB protocol bridge daemon.

mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use icbridge::Config;

#[derive(Parser)]
#[command(name = "icbridged", version, about = "IRC to ICB protocol bridge")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short = 'c', long = "config")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_path(&cli.config)?;

    tracing_subscriber::fmt()
        .with_max_level(config.logging_verbosity.as_level())
        .init();

    tracing::info!("starting server process with pid {}", std::process::id());

    if let Err(e) = server::run(Arc::new(config)).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("server stopped");
    Ok(())
}
