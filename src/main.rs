use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatbridge::cli::{self, SessionOptions};
use chatbridge::config::Config;
use chatbridge::core::ChatMode;

#[derive(Parser)]
#[command(name = "chatbridge")]
#[command(author, version = concat!(env!("CARGO_PKG_VERSION"), env!("CHATBRIDGE_VERSION_SUFFIX")), about = "chatbridge - resilient AI chat delivery with provider fallback", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat session on stdin
    Chat {
        /// Chat session id
        #[arg(short, long, default_value = "default")]
        session: String,

        /// Chat mode (chat, code, image, assistant)
        #[arg(short, long, default_value = "chat")]
        mode: ChatMode,

        /// Preferred provider (openai, anthropic, openrouter)
        #[arg(short, long)]
        provider: Option<String>,

        /// Use simulated providers instead of the network
        #[arg(long)]
        sim: bool,
    },

    /// Send one message and print the reply
    Send {
        /// Message to send
        message: String,

        /// Chat session id
        #[arg(short, long, default_value = "default")]
        session: String,

        /// Chat mode (chat, code, image, assistant)
        #[arg(short, long, default_value = "chat")]
        mode: ChatMode,

        /// Preferred provider (openai, anthropic, openrouter)
        #[arg(short, long)]
        provider: Option<String>,

        /// Use simulated providers instead of the network
        #[arg(long)]
        sim: bool,
    },

    /// Show the fallback chain of every task type
    Chains {
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show the offline queue of a session
    Queue {
        /// Chat session id
        #[arg(short, long, default_value = "default")]
        session: String,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show token usage and cost statistics
    Usage {
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,

        /// Delete usage logs older than N days
        #[arg(long)]
        cleanup: Option<u32>,
    },

    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "chatbridge=debug"
    } else {
        "chatbridge=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load()?;

    match cli.command {
        Commands::Chat {
            session,
            mode,
            provider,
            sim,
        } => {
            let opts = SessionOptions {
                session,
                mode,
                provider,
                sim,
            };
            cli::run_chat(config, opts).await?;
        }
        Commands::Send {
            message,
            session,
            mode,
            provider,
            sim,
        } => {
            let opts = SessionOptions {
                session,
                mode,
                provider,
                sim,
            };
            cli::run_send(config, &message, opts).await?;
        }
        Commands::Chains { format } => {
            cli::run_chains(&config, &format)?;
        }
        Commands::Queue { session, format } => {
            cli::run_queue(&config, &session, &format)?;
        }
        Commands::Usage { format, cleanup } => {
            cli::run_usage(&config, &format, cleanup)?;
        }
        Commands::Config { init } => {
            cli::run_config(&config, init)?;
        }
    }

    Ok(())
}
