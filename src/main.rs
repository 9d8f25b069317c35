// ABOUTME: CLI entry point for billing-mirror
// ABOUTME: Parses commands, layers flags over the config file and routes to handlers

use std::path::PathBuf;

use anyhow::Context;
use billing_mirror::commands;
use billing_mirror::config::{MirrorConfig, Overrides};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "billing-mirror")]
#[command(about = "Mirror a billing provider's objects into a local SQLite database", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to billing-mirror.toml (defaults to ./billing-mirror.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    /// Mirror database file (overrides store.path)
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    /// Provider secret key (falls back to BILLING_API_KEY env)
    #[arg(long = "api-key", env = "BILLING_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,
    /// Provider API base URL (overrides api.base_url)
    #[arg(long = "api-base", global = true)]
    api_base: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fully sync remote collections and purge what no longer exists remotely
    Sync {
        /// Collections to sync (charges, coupons, customers, disputes, invoice_items,
        /// invoices, plans, refunds, subscriptions). All when omitted.
        selectors: Vec<String>,
    },
    /// Run the webhook endpoint that keeps the mirror current
    Serve {
        /// Address to listen on (overrides webhook.listen)
        #[arg(long)]
        listen: Option<String>,
    },
    /// Create the plans and coupons listed in the config file
    Bootstrap,
    /// Delete every mirrored record
    Clear {
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Print one mirrored record as JSON
    Show {
        /// Entity kind (customer, card, charge, ...) or table name
        kind: String,
        id: String,
        /// Owning object id, required to refresh cards (the customer)
        #[arg(long)]
        parent: Option<String>,
        /// Re-read the object from the provider before printing it
        #[arg(long)]
        refresh: bool,
    },
    /// Show local record counts and the last full sync of each collection
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut config =
        MirrorConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let listen = match &cli.command {
        Commands::Serve { listen } => listen.clone(),
        _ => None,
    };
    config.apply(Overrides {
        database: cli.database,
        api_key: cli.api_key,
        api_base: cli.api_base,
        listen,
    });

    match cli.command {
        Commands::Sync { selectors } => commands::sync(&config, &selectors).await,
        Commands::Serve { .. } => commands::serve(&config).await,
        Commands::Bootstrap => commands::bootstrap(&config).await,
        Commands::Clear { yes } => commands::clear(&config, yes),
        Commands::Show {
            kind,
            id,
            parent,
            refresh,
        } => commands::show(&config, &kind, &id, parent.as_deref(), refresh).await,
        Commands::Status => commands::status(&config).await,
    }
}
