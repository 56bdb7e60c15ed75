use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;
use zip_bridge::AppState;
use zipset_store::{FilesetStore, Limits};

/// Serve a content-addressable fileset store over HTTP, ingesting ZIP
/// uploads.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The address to bind.
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    host: String,

    /// The port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8787)]
    port: u16,

    /// Root directory of the store.
    #[arg(long, env = "STORE_DIR", default_value = "./store")]
    store_dir: PathBuf,

    /// Retain upload spool files instead of unlinking them after ingest.
    #[arg(long, env = "KEEP_SPOOL")]
    keep_spool: bool,

    /// Maximum number of entries accepted in one archive.
    #[arg(long, env = "MAX_ENTRIES", default_value_t = Limits::default().max_entries)]
    max_entries: u64,

    /// Maximum decompressed size of a single member, in bytes.
    #[arg(long, env = "MAX_FILE_BYTES", default_value_t = Limits::default().max_file_bytes)]
    max_file_bytes: u64,

    /// Maximum decompressed size of one archive in aggregate, in bytes.
    #[arg(long, env = "MAX_TOTAL_BYTES", default_value_t = Limits::default().max_total_bytes)]
    max_total_bytes: u64,

    /// Maximum upload size, in bytes.
    #[arg(long, env = "MAX_ZIP_BYTES", default_value_t = Limits::default().max_zip_bytes)]
    max_zip_bytes: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store = Arc::new(FilesetStore::open(&cli.store_dir).await?);
    let limits = Limits {
        max_entries: cli.max_entries,
        max_file_bytes: cli.max_file_bytes,
        max_total_bytes: cli.max_total_bytes,
        max_zip_bytes: cli.max_zip_bytes,
    };
    let state = AppState::new(store, limits, cli.keep_spool);

    let app = zip_bridge::gen_router()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO)),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind((cli.host.as_str(), cli.port)).await?;
    info!(listen_address=%format!("{}:{}", cli.host, cli.port), store_dir=%cli.store_dir.display(), "starting daemon");

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
