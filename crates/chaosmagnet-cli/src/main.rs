//! CLI for chaosmagnet: harvest, share and mint from physical entropy.

mod commands;

use clap::{Parser, Subcommand};

use commands::EngineArgs;

#[derive(Parser)]
#[command(name = "chaosmagnet")]
#[command(about = "chaosmagnet: five noisy channels in, post-quantum keys out")]
#[command(version = chaosmagnet_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the five harvesters and whether each works on this machine
    Scan,

    /// Run the engine and print a status line periodically until Ctrl+C
    Run {
        #[command(flatten)]
        engine: EngineArgs,

        /// Seconds between status lines
        #[arg(long, default_value = "2")]
        interval: u64,

        /// Print the full metrics snapshot as JSON instead of a status line
        #[arg(long)]
        json: bool,
    },

    /// Run the engine behind the HTTP control server
    Serve {
        #[command(flatten)]
        engine: EngineArgs,

        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(long, default_value = "8042")]
        port: u16,
    },

    /// Start the engine, wait for enough whitened output and mint one bundle
    Mint {
        #[command(flatten)]
        engine: EngineArgs,

        /// Owner label stored in the bundle
        #[arg(long, default_value = "cli")]
        owner: String,
    },

    /// Inspect minted bundles
    Vault {
        /// Vault directory (default: $CHAOSMAGNET_VAULT_DIR or ./keys)
        #[arg(long)]
        dir: Option<String>,

        #[command(subcommand)]
        action: VaultAction,
    },
}

#[derive(Subcommand)]
enum VaultAction {
    /// List bundles, oldest first
    List,
    /// Print the public half of one bundle
    Show {
        /// Bundle id
        id: String,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan => commands::scan::run(),
        Commands::Run {
            engine,
            interval,
            json,
        } => commands::run::run(&engine, interval, json),
        Commands::Serve { engine, host, port } => commands::serve::run(&engine, &host, port),
        Commands::Mint { engine, owner } => commands::mint::run(&engine, &owner),
        Commands::Vault { dir, action } => match action {
            VaultAction::List => commands::vault::list(dir.as_deref()),
            VaultAction::Show { id } => commands::vault::show(dir.as_deref(), &id),
        },
    }
}
