//! TankDB CLI
//!
//! # Usage
//!
//! ```bash
//! # Start the store server (shared regions + command loop + HTTP)
//! tankdb serve --store-dir ./data --port 8080 --auth-token secret
//!
//! # Ask a running store to create a tank, over the shared mailbox
//! tankdb create --name embeddings --dim 384 --capacity 100000 --persist
//!
//! # Ask a running store to persist a tank
//! tankdb save --name embeddings
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tankdb::channel::{Command, CommandChannel, DEFAULT_CHANNEL_NAME, DEFAULT_SEND_TIMEOUT};
use tankdb::server::{serve, AppState};
use tankdb::similarity::SimMethod;
use tankdb::store::TankStore;
use tankdb::tank::{DEFAULT_CAPACITY, DEFAULT_META_SLOT_SIZE};

#[derive(Parser)]
#[command(name = "tankdb")]
#[command(about = "A shared-memory vector store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the store: restore records, poll the command channel, serve HTTP
    Serve {
        /// Directory for persistence records
        #[arg(short, long, default_value = "./tankdb-data")]
        store_dir: PathBuf,

        /// Shared command channel name
        #[arg(long, default_value = DEFAULT_CHANNEL_NAME)]
        channel: String,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Server port
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Bearer token required on API requests
        #[arg(long, env = "TANKDB_AUTH_TOKEN")]
        auth_token: String,
    },

    /// Ask a running store to create a tank
    Create {
        /// Shared command channel name
        #[arg(long, default_value = DEFAULT_CHANNEL_NAME)]
        channel: String,

        /// Tank name
        #[arg(short, long)]
        name: String,

        /// Vector dimensions
        #[arg(short, long)]
        dim: usize,

        /// Maximum number of vectors
        #[arg(short, long, default_value_t = DEFAULT_CAPACITY)]
        capacity: usize,

        /// Bytes of metadata region per vector slot
        #[arg(long, default_value_t = DEFAULT_META_SLOT_SIZE)]
        meta_slot_size: usize,

        /// Default similarity method
        #[arg(short, long, default_value = "cosine")]
        metric: SimMethod,

        /// Include the tank in store saves
        #[arg(long)]
        persist: bool,

        /// Seconds to wait for the acknowledgment
        #[arg(long, default_value = "5")]
        timeout: u64,
    },

    /// Ask a running store to persist a tank
    Save {
        /// Shared command channel name
        #[arg(long, default_value = DEFAULT_CHANNEL_NAME)]
        channel: String,

        /// Tank name
        #[arg(short, long)]
        name: String,

        /// Seconds to wait for the acknowledgment
        #[arg(long, default_value = "5")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            store_dir,
            channel,
            host,
            port,
            auth_token,
        } => {
            let store = TankStore::open(&store_dir, Some(&channel))?;
            let state = Arc::new(AppState::new(Arc::clone(&store), &auth_token));

            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            tokio::select! {
                result = serve(state, addr) => result?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                }
            }
            store.stop();
        }

        Commands::Create {
            channel,
            name,
            dim,
            capacity,
            meta_slot_size,
            metric,
            persist,
            timeout,
        } => {
            let command = Command::Create {
                name: name.clone(),
                dim,
                persist,
                capacity,
                meta_slot_size,
                metric,
            };
            send_or_exit(&channel, &command, timeout, &format!("create '{name}'"));
        }

        Commands::Save {
            channel,
            name,
            timeout,
        } => {
            let command = Command::Save { name: name.clone() };
            send_or_exit(&channel, &command, timeout, &format!("save '{name}'"));
        }
    }

    Ok(())
}

fn send_or_exit(channel: &str, command: &Command, timeout_secs: u64, what: &str) {
    let timeout = if timeout_secs == 0 {
        DEFAULT_SEND_TIMEOUT
    } else {
        Duration::from_secs(timeout_secs)
    };
    if CommandChannel::send(channel, command, timeout) {
        tracing::info!("{} acknowledged", what);
    } else {
        tracing::error!("{} was not acknowledged", what);
        std::process::exit(1);
    }
}
