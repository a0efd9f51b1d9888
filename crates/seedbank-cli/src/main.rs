use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use seedbank_cli::{Command, Config};
use seedbank_core::{
    AppError, BatchFailure, DbConfig, ImportConfig, ImportErrors, ImportInfo, Importer, Record,
};
use seedbank_db::{ItemRepository, QueueRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    let config = Config::parse();

    info!("Connecting to database...");
    let db_config = DbConfig::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .connect(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!(AppError::DatabaseError(e).user_message()))?;

    match config.command {
        Command::Import {
            file,
            import_id,
            buffer_size,
            max_wait_ms,
        } => {
            let mut import_config = ImportConfig::from_env()?;
            if let Some(size) = buffer_size {
                import_config =
                    import_config.with_buffer_size(usize::try_from(size).unwrap_or(usize::MAX));
            }
            if let Some(ms) = max_wait_ms {
                import_config = import_config.with_max_wait(Duration::from_millis(ms));
            }

            let items = ItemRepository::new(pool.clone());
            items
                .health_check()
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;

            let importer = Importer::with_config(items, QueueRepository::new(pool), import_config);
            let input = open_input(file).await?;
            let summary = import(&importer, ImportInfo::new(import_id), input).await?;
            print_import_summary(&summary);

            if let Some(errors) = &summary.errors {
                anyhow::bail!(
                    "{} batches failed to import ({} records)",
                    errors.len(),
                    errors.failed_records()
                );
            }
        }
    }

    Ok(())
}

/// Outcome of one CLI import run.
#[derive(Debug, Default)]
struct ImportSummary {
    lines: usize,
    skipped: usize,
    accepted: usize,
    committed: usize,
    interrupted: bool,
    errors: Option<ImportErrors>,
}

async fn open_input(
    file: Option<PathBuf>,
) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    match file {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
    }
}

/// Streams records from `input` into one session until EOF or a shutdown signal.
async fn import(
    importer: &Importer<ItemRepository, QueueRepository>,
    info: ImportInfo,
    input: Box<dyn AsyncBufRead + Unpin + Send>,
) -> anyhow::Result<ImportSummary> {
    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let session = importer.start(info, &shutdown);
    let mut summary = ImportSummary::default();
    let mut read_error = None;
    let mut lines = input.lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => {
                summary.interrupted = true;
                break;
            }
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                read_error = Some(e);
                break;
            }
        };
        summary.lines += 1;

        match parse_record(&line) {
            Ok(None) => {}
            Ok(Some(record)) => {
                if let Err(e) = session.ingest([record]).await {
                    warn!(error = %e, "Session stopped accepting records");
                    summary.interrupted = true;
                    break;
                }
                summary.accepted += 1;
            }
            Err(e) => {
                summary.skipped += 1;
                warn!(line = summary.lines, error = %e, "Skipping malformed record");
            }
        }
    }

    summary.errors = session.close().await.err();
    summary.committed = session.committed_fingerprints().len();

    if let Some(e) = read_error {
        return Err(e).context("Failed to read input");
    }
    Ok(summary)
}

/// Parses one input line. Blank lines yield `None`.
fn parse_record(line: &str) -> Result<Option<Record>, AppError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let record: Record = serde_json::from_str(line)?;
    record.validate()?;
    Ok(Some(record))
}

async fn shutdown_signal(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown_token.cancelled() => return,
    }

    info!("Shutdown signal received, flushing buffered records...");
    shutdown_token.cancel();
}

fn print_import_summary(summary: &ImportSummary) {
    info!("");
    info!("═══════════════════════════════════════════════════════");
    if summary.interrupted {
        info!("IMPORT INTERRUPTED");
    } else {
        info!("IMPORT COMPLETE");
    }
    info!("═══════════════════════════════════════════════════════");
    info!("  Lines read:          {}", summary.lines);
    info!("  Skipped (malformed): {}", summary.skipped);
    info!("  Accepted:            {}", summary.accepted);
    info!("  Committed:           {}", summary.committed);

    if let Some(errors) = &summary.errors {
        info!("───────────────────────────────────────────────────────");
        info!("Failed batches:");
        for failure in errors {
            error!("  - {}", describe_failure(failure));
        }
    }
    info!("═══════════════════════════════════════════════════════");
}

/// One summary line per failed batch, flagging failures worth re-running.
fn describe_failure(failure: &BatchFailure) -> String {
    let hint = if failure.error.is_retryable() {
        " (retryable)"
    } else {
        ""
    };
    format!(
        "{} records: {}{}",
        failure.records.len(),
        failure.error.user_message(),
        hint
    )
}
