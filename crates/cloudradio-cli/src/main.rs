//! CloudRadio CLI (radioctl)
//!
//! Command-line tool for moving SDR captures in and out of Azure Blob
//! Storage and for poking at a flowgraph's control plane.
//!
//! ## Quick Start
//!
//! ```bash
//! export AZURE_STORAGE_AUTH_METHOD=connection_string
//! export AZURE_STORAGE_CONNECTION_STRING="DefaultEndpointsProtocol=https;AccountName=..."
//!
//! # Upload a complex float capture as a SigMF recording
//! radioctl upload capture.cf32 -c recordings -b pass-0412 --sigmf --sample-rate 2e6
//!
//! # Pull it back down
//! radioctl download -c recordings -b pass-0412.sigmf-data -o pass-0412.cf32
//!
//! # Fetch a secret provided through the environment
//! radioctl secret lo-offset --prefix radio
//!
//! # Serve the control plane
//! radioctl serve --read freq --write gain --set freq=915e6 --set gain=20
//! ```
//!
//! ## Configuration
//!
//! - `AZURE_STORAGE_AUTH_METHOD`: connection_string, url_with_sas or default
//! - `AZURE_STORAGE_CONNECTION_STRING`, `AZURE_STORAGE_URL`: credentials
//! - `RUST_LOG`: log filter (default: info)

use anyhow::Result;
use clap::{Parser, Subcommand};

use cloudradio_cli::commands::{
    secret, serve, transfer, AuthArgs, DownloadArgs, SecretArgs, ServeArgs, UploadArgs,
};

#[derive(Parser)]
#[command(name = "radioctl")]
#[command(about = "CloudRadio command-line tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a sample file to a block blob
    Upload {
        #[command(flatten)]
        auth: AuthArgs,
        #[command(flatten)]
        args: UploadArgs,
    },
    /// Download a block blob to a sample file
    Download {
        #[command(flatten)]
        auth: AuthArgs,
        #[command(flatten)]
        args: DownloadArgs,
    },
    /// Print a named secret
    Secret(SecretArgs),
    /// Serve the control plane until Ctrl+C
    Serve(ServeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Upload { auth, args } => {
            let stats = transfer::upload(&args, auth.service()?).await?;
            println!("uploaded {} items to {}/{}", stats.items, args.container, args.blob);
        }
        Commands::Download { auth, args } => {
            let stats = transfer::download(&args, auth.service()?).await?;
            println!("downloaded {} items to {}", stats.items, args.output.display());
        }
        Commands::Secret(args) => {
            let value = secret::fetch(&args, &args.store()).await?;
            println!("{}", value);
        }
        Commands::Serve(args) => serve::serve(&args).await?,
    }

    Ok(())
}
