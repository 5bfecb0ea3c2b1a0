use clap::{Parser, Subcommand};
use lectern::Result;
use lectern::commands::{serve, show_config, show_config_path, show_status};

#[derive(Parser)]
#[command(name = "lectern")]
#[command(about = "Incremental lecture-transcript embedding with budgeted chat retrieval")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Bind address, e.g. 127.0.0.1:8402
        #[arg(long)]
        bind: Option<String>,
    },
    /// Show database and upstream-service status
    Status,
    /// Inspect configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind } => {
            serve(bind).await?;
        }
        Commands::Status => {
            show_status().await?;
        }
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                show_config_path()?;
            }
        }
    }

    Ok(())
}
