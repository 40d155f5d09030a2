// ABOUTME: Command-line entry point for the rce-gateway server
// ABOUTME: Loads .env, reads configuration and starts the HTTP gateway

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rce_gateway::config::Config;
use rce_gateway::server;
use rce_sandbox::SandboxSettings;

#[derive(Parser)]
#[command(name = "rce-gateway")]
#[command(about = "Sandboxed code-execution gateway")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Address to bind (overrides RCE_HOST)
        #[arg(long)]
        host: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    server::init_logging();

    match cli.command {
        Commands::Serve { port, host } => {
            let settings =
                SandboxSettings::from_env().context("Invalid sandbox configuration")?;
            let config = Config::from_env()
                .context("Invalid server configuration")?
                .with_overrides(port, host);

            server::run(config, settings).await
        }
    }
}
