//! Import sessions: buffered, batched ingestion of records.
//!
//! An [`Importer`] starts [`ImportSession`]s. Producers on any task call
//! [`ImportSession::ingest`]; records travel over a channel to a background
//! scheduler that buffers them and flushes batches through a
//! [`BatchPersister`].
//!
//! # Architecture
//!
//! ```text
//! producers ──ingest──▶ channel ──▶ scheduler ──spawn──▶ buffer task
//!                                      │                    │
//!                                      │ deadline           │ len >= buffer_size
//!                                      ▼                    ▼
//!                                    flush ◀────────────────┘
//!                                      │
//!                                      ▼
//!                      BatchPersister (sources, items, publish)
//! ```
//!
//! The scheduler selects over cancellation, the next record, and a flush
//! deadline of `last_flush + max_wait`. The deadline only moves when a flush
//! happens, so a steady trickle of records cannot postpone the timed flush.
//!
//! Buffering and flushing share one async mutex and a flush holds it while
//! persisting, so flushes never overlap.
//!
//! # Shutdown
//!
//! [`ImportSession::close`], cancellation of the parent token, or dropping
//! every session handle all run the same sequence:
//! - mark the session closed and close the channel
//! - buffer records already accepted
//! - wait for buffering tasks to settle
//! - flush whatever is left
//!
//! # Example
//!
//! ```ignore
//! use seedbank_core::{ImportInfo, Importer};
//! use tokio_util::sync::CancellationToken;
//!
//! let importer = Importer::new(item_repo, queue_repo);
//! let session = importer.start(ImportInfo::new("import-42"), &CancellationToken::new());
//!
//! session.ingest(records).await?;
//! if let Err(errors) = session.close().await {
//!     eprintln!("{} batches failed", errors.len());
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ImportConfig;
use crate::error::{AppError, BatchFailure, ImportErrors};
use crate::error_log::ErrorLog;
use crate::models::{ImportInfo, InfoHash, Record};
use crate::persister::BatchPersister;
use crate::traits::{ImportStore, ItemNotifier};

/// Records a producer can hand over before `ingest` waits on the scheduler.
const INPUT_CHANNEL_CAPACITY: usize = 1;

/// Deadline offset used when `max_wait` is too large to add to an instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

// =============================================================================
// Importer
// =============================================================================

/// Factory for import sessions.
///
/// Holds no per-import state; every call to [`start`](Self::start) returns an
/// independent session.
pub struct Importer<S, N>
where
    S: ImportStore,
    N: ItemNotifier,
{
    store: S,
    notifier: N,
    config: ImportConfig,
}

impl<S, N> Clone for Importer<S, N>
where
    S: ImportStore,
    N: ItemNotifier,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            notifier: self.notifier.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S, N> Importer<S, N>
where
    S: ImportStore,
    N: ItemNotifier,
{
    /// Creates an importer with default configuration.
    pub fn new(store: S, notifier: N) -> Self {
        Self::with_config(store, notifier, ImportConfig::default())
    }

    pub fn with_config(store: S, notifier: N, config: ImportConfig) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Starts a new session and its scheduler.
    ///
    /// The session stops when `cancel_token` (or any parent of it) is
    /// cancelled, flushing what it has buffered first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, info: ImportInfo, cancel_token: &CancellationToken) -> ImportSession<S, N> {
        let persister = BatchPersister::new(self.store.clone(), self.notifier.clone(), info);
        ImportSession::spawn(self.config.clone(), persister, cancel_token.child_token())
    }
}

// =============================================================================
// Import Session
// =============================================================================

/// Handle to a running import.
///
/// Cheap to clone; all clones feed the same session. When every handle is
/// dropped without calling [`close`](Self::close), the scheduler still
/// flushes and stops, but nobody observes the outcome.
pub struct ImportSession<S, N>
where
    S: ImportStore,
    N: ItemNotifier,
{
    shared: Arc<Shared<S, N>>,
    tx: mpsc::Sender<Record>,
}

impl<S, N> Clone for ImportSession<S, N>
where
    S: ImportStore,
    N: ItemNotifier,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            tx: self.tx.clone(),
        }
    }
}

/// State shared between session handles, the scheduler and buffering tasks.
struct Shared<S, N>
where
    S: ImportStore,
    N: ItemNotifier,
{
    config: ImportConfig,
    info: ImportInfo,
    pending: Mutex<Pending<S, N>>,
    errors: ErrorLog,
    committed: StdMutex<Vec<InfoHash>>,
    last_flush: StdMutex<Instant>,
    closed: AtomicBool,
    /// Records accepted by `ingest` that no buffering task has finished with.
    in_flight: watch::Sender<usize>,
    /// Session scope; cancelling it starts shutdown.
    stop: CancellationToken,
    /// Cancelled once shutdown has flushed and the scheduler has exited.
    stopped: CancellationToken,
}

/// Everything mutated under the session's exclusive region.
struct Pending<S, N>
where
    S: ImportStore,
    N: ItemNotifier,
{
    buffer: Vec<Record>,
    persister: BatchPersister<S, N>,
}

impl<S, N> ImportSession<S, N>
where
    S: ImportStore,
    N: ItemNotifier,
{
    fn spawn(config: ImportConfig, persister: BatchPersister<S, N>, stop: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let (in_flight, _) = watch::channel(0);
        let info = persister.info().clone();

        let shared = Arc::new(Shared {
            config,
            info,
            pending: Mutex::new(Pending {
                buffer: Vec::new(),
                persister,
            }),
            errors: ErrorLog::new(),
            committed: StdMutex::new(Vec::new()),
            last_flush: StdMutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            in_flight,
            stop,
            stopped: CancellationToken::new(),
        });

        info!(
            import_id = %shared.info.id,
            buffer_size = shared.config.buffer_size,
            max_wait_ms = u64::try_from(shared.config.max_wait.as_millis()).unwrap_or(u64::MAX),
            "Import started"
        );
        tokio::spawn(Arc::clone(&shared).run(rx));

        Self { shared, tx }
    }

    /// Hands records to the session.
    ///
    /// Waits while the scheduler is busy accepting earlier records. Records
    /// accepted before an error are still imported.
    ///
    /// # Errors
    ///
    /// `AppError::ImportClosed` once the session has been closed or cancelled.
    pub async fn ingest<I>(&self, records: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = Record>,
    {
        if self.closed() {
            return Err(AppError::ImportClosed);
        }
        for record in records {
            if self.closed() {
                return Err(AppError::ImportClosed);
            }
            self.shared.in_flight.send_modify(|n| *n += 1);
            if self.tx.send(record).await.is_err() {
                self.shared.release_in_flight();
                return Err(AppError::ImportClosed);
            }
        }
        Ok(())
    }

    /// Waits until every accepted record has reached the buffer.
    ///
    /// Does not flush; use [`close`](Self::close) to wait for persistence.
    pub async fn drain(&self) {
        self.shared.wait_in_flight().await;
    }

    /// Stops the session, flushing everything it accepted.
    ///
    /// Idempotent. Every call waits for the final flush to finish and
    /// returns the accumulated failures.
    pub async fn close(&self) -> Result<(), ImportErrors> {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.stop.cancel();
        self.shared.stopped.cancelled().await;
        match self.err() {
            Some(errors) => Err(errors),
            None => Ok(()),
        }
    }

    /// Failed batches so far, or `None` if every batch committed.
    pub fn err(&self) -> Option<ImportErrors> {
        self.shared.errors.or_none()
    }

    /// All failed batches so far, oldest first.
    pub fn import_errors(&self) -> ImportErrors {
        self.shared.errors.snapshot()
    }

    /// Info hashes committed so far, in commit order.
    pub fn committed_fingerprints(&self) -> Vec<InfoHash> {
        self.shared.committed().clone()
    }

    pub fn closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn info(&self) -> &ImportInfo {
        &self.shared.info
    }
}

impl<S, N> Shared<S, N>
where
    S: ImportStore,
    N: ItemNotifier,
{
    /// Scheduler loop; owns the receiving end of the input channel.
    async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Record>) {
        // Releases `close` even if the scheduler unwinds before shutdown completes.
        let _stopped = self.stopped.clone().drop_guard();
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                _ = self.stop.cancelled() => break,
                received = rx.recv() => {
                    let Some(record) = received else {
                        debug!(import_id = %self.info.id, "All session handles dropped");
                        break;
                    };
                    let shared = Arc::clone(&self);
                    tokio::spawn(async move { shared.buffer(record).await });
                }
                _ = time::sleep_until(deadline) => {
                    if self.flush_due() {
                        self.mark_flushed();
                        let shared = Arc::clone(&self);
                        tokio::spawn(async move { shared.flush().await });
                    }
                }
            }
        }

        self.shutdown(rx).await;
    }

    async fn shutdown(&self, mut rx: mpsc::Receiver<Record>) {
        self.closed.store(true, Ordering::Release);
        rx.close();
        while let Some(record) = rx.recv().await {
            self.buffer(record).await;
        }
        self.wait_in_flight().await;
        self.flush().await;

        info!(
            import_id = %self.info.id,
            committed = self.committed().len(),
            failed_batches = self.errors.len(),
            "Import closed"
        );
        self.stopped.cancel();
    }

    async fn buffer(&self, record: Record) {
        let _in_flight = InFlightGuard(&self.in_flight);
        let mut pending = self.pending.lock().await;
        pending.buffer.push(record);
        if pending.buffer.len() >= self.config.buffer_size {
            self.flush_locked(&mut pending).await;
        }
    }

    async fn flush(&self) {
        let mut pending = self.pending.lock().await;
        self.flush_locked(&mut pending).await;
    }

    async fn flush_locked(&self, pending: &mut Pending<S, N>) {
        self.mark_flushed();
        if pending.buffer.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut pending.buffer);
        match pending.persister.persist(&batch).await {
            Ok(info_hashes) => {
                info!(
                    import_id = %self.info.id,
                    batch_size = info_hashes.len(),
                    "Batch committed"
                );
                self.committed().extend(info_hashes);
            }
            Err(e) => {
                warn!(
                    import_id = %self.info.id,
                    batch_size = batch.len(),
                    error = %e,
                    "Batch failed to import"
                );
                self.errors.push(BatchFailure::new(batch, e));
            }
        }
    }

    fn next_deadline(&self) -> Instant {
        let last_flush = *self.last_flush();
        last_flush
            .checked_add(self.config.max_wait)
            .unwrap_or_else(|| last_flush + FAR_FUTURE)
    }

    fn flush_due(&self) -> bool {
        self.last_flush().elapsed() >= self.config.max_wait
    }

    fn mark_flushed(&self) {
        *self.last_flush() = Instant::now();
    }

    async fn wait_in_flight(&self) {
        let mut in_flight = self.in_flight.subscribe();
        // The sender lives in `self`, so this only returns once the count is zero.
        let _ = in_flight.wait_for(|n| *n == 0).await;
    }

    fn release_in_flight(&self) {
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }

    fn committed(&self) -> std::sync::MutexGuard<'_, Vec<InfoHash>> {
        self.committed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn last_flush(&self) -> std::sync::MutexGuard<'_, Instant> {
        self.last_flush.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases one in-flight slot when a buffering task finishes.
struct InFlightGuard<'a>(&'a watch::Sender<usize>);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}
