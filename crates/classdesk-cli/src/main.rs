//! classdesk - command-line administration client.
//!
//! Signs in against the school's identity server and works with classes,
//! students, attendance and assignments through the REST API. Every
//! command runs the same session lifecycle: construct the store, hydrate
//! it from persistent storage, run, dispose.

mod commands;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use classdesk_core::{
    ApiClient, AuthService, Config, HttpExecutor, IdentityClient, QueryCache, SessionStore, SessionStoreKind,
    WithReauth,
};

/// Log file name prefix inside CLASSDESK_LOG_DIR
const LOG_FILE_PREFIX: &str = "classdesk.log";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Keep the session in memory only (nothing is read or written)
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in through the browser
    Login,
    /// Revoke the session and sign out
    Logout,
    /// Show the signed-in user
    Whoami,
    /// List classes
    Classes,
    /// Show a class with its sessions and assignments
    Class { id: i64 },
    /// List students, optionally filtered by name
    Students {
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Show or mark attendance for a class session
    Attendance {
        session_id: i64,
        /// Mark entries as STUDENT_ID=STATUS (present, absent, late, excused)
        #[arg(short, long = "mark", value_name = "STUDENT_ID=STATUS")]
        marks: Vec<String>,
    },
    /// List assignments for a class
    Assignments { class_id: i64 },
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, and additionally to a daily rolling file when a log
/// directory is configured. The returned guard flushes the file on drop.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=classdesk_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if cli.ephemeral {
        config.session_store = SessionStoreKind::Memory;
    }

    let _log_guard = init_tracing(config.log_dir.as_deref());
    info!(store = ?config.session_store, "classdesk starting");

    let repository = config
        .session_repository()
        .context("Failed to open session storage")?;
    let store = SessionStore::new(repository);
    store.hydrate(config.hydration_timeout).await;

    let identity = IdentityClient::new(config.identity_config()).context("Failed to create identity client")?;
    let http = HttpExecutor::new(config.api_url.clone()).context("Failed to create HTTP client")?;
    let gateway = WithReauth::new(http, identity.clone(), store.clone());

    let cache = Arc::new(QueryCache::scoped_to(&store));
    let cache_watcher = cache.clear_on_identity_change(&store);
    let api = ApiClient::new(Arc::new(gateway)).with_cache(cache);
    let auth = AuthService::new(store.clone(), identity);

    let result = commands::run(cli.command, cli.json, &auth, &api).await;

    cache_watcher.abort();
    store.dispose().await;
    info!("classdesk shutting down");
    result
}
