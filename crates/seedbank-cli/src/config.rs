use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::LazyLock;

static VERSION_INFO: LazyLock<String> = LazyLock::new(|| {
    let version = env!("CARGO_PKG_VERSION");

    let commit = option_env!("VERGEN_GIT_SHA")
        .map(|s| s.chars().take(7).collect::<String>())
        .unwrap_or_else(|| "unknown".to_string());

    let built = option_env!("VERGEN_BUILD_DATE").unwrap_or("unknown");
    let target = option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown");
    let rustc = option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown");

    format!("{version}\ncommit: {commit}\nbuilt: {built}\ntarget: {target}\nrustc: {rustc}")
});

pub fn version_info() -> &'static str {
    &VERSION_INFO
}

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "seedbank")]
#[command(
    author,
    version = version_info(),
    about = "Batch importer for discovered torrent items"
)]
#[command(after_help = "Examples:
  seedbank import --import-id nightly --file items.jsonl
  crawler | seedbank import --import-id live --buffer-size 500

Environment:
  DATABASE_URL         PostgreSQL connection URL (also read from .env)
  IMPORT_BUFFER_SIZE   Records per batch (default 100)
  IMPORT_MAX_WAIT_MS   Longest a partial batch waits before flushing (default 500)
  DB_MAX_CONNECTIONS   Connection pool size (default 5)
  RUST_LOG             Log filter (default info)")]
pub struct Config {
    /// PostgreSQL database connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import JSON-lines records into the item store
    #[command(after_help = "Each input line is one JSON record:
  {\"source\":\"dht\",\"info_hash\":\"<40 hex chars>\",\"name\":\"...\",\"size\":1024,
   \"published_at\":\"2024-01-01T00:00:00Z\",\"enrichment\":{\"content_type\":\"movie\"}}

Malformed lines are logged and skipped. Ctrl+C flushes what was read and exits.")]
    Import {
        /// Read records from this file instead of stdin
        #[arg(short, long, value_name = "PATH")]
        file: Option<PathBuf>,

        /// Identifier attached to every item source written by this import
        #[arg(long, value_name = "ID")]
        import_id: String,

        /// Records per batch (overrides IMPORT_BUFFER_SIZE)
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
        buffer_size: Option<u64>,

        /// Flush a partial batch after this many milliseconds (overrides IMPORT_MAX_WAIT_MS)
        #[arg(long, value_name = "MS", value_parser = clap::value_parser!(u64).range(1..))]
        max_wait_ms: Option<u64>,
    },
}
