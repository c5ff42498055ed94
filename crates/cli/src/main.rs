//! Chatloom CLI: the main entry point.
//!
//! Commands:
//! - `ask`     : send one message and print the answer (streamed by default)
//! - `config`  : print the effective configuration, the defaults, or the path

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "chatloom",
    about = "Chatloom: streaming chat engine with tool orchestration",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single message and print the answer
    Ask {
        /// The message to send
        message: String,

        /// Override the configured model
        #[arg(short, long)]
        model: Option<String>,

        /// Wait for the whole answer instead of streaming it
        #[arg(long)]
        no_stream: bool,

        /// Print reasoning to stderr as it streams
        #[arg(long)]
        thoughts: bool,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (file + environment)
    Show,
    /// Print the built-in defaults as TOML
    Defaults,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ask {
            message,
            model,
            no_stream,
            thoughts,
        } => {
            commands::ask::run(commands::ask::AskOptions {
                message,
                model,
                stream: !no_stream,
                show_thoughts: thoughts,
            })
            .await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Defaults => commands::config_cmd::defaults().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
        },
    }

    Ok(())
}
