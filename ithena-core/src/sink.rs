//! Batching audit sink with dual-sink dispatch.
//!
//! Producers hand records to [`AuditSink::submit`], which never blocks: the
//! bounded queue drops (with a loud warning) rather than stall the proxied
//! traffic. A single worker task buffers records and flushes on size or age;
//! each flushed batch is dispatched asynchronously to exactly one sink,
//! chosen **at flush time** by probing the token provider: remote HTTP
//! delivery with bearer auth when a token is present, the local store
//! otherwise. Token state can change mid-run, so the choice is never bound at
//! enqueue.
//!
//! Shutdown drains the queue, performs a final flush with the same dispatch
//! rule, and waits for in-flight deliveries.

use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::time::Duration;

use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::auth::TokenProvider;
use crate::record::{rfc3339_nanos, AuditRecord};
use crate::store::LocalStore;
use crate::telemetry;
use crate::PROXY_VERSION;

/// Default observability ingestion endpoint.
pub const DEFAULT_OBSERVE_URL: &str = "https://ithena.one/api/v1/observe";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for the sink. Defaults match production behavior; tests shrink
/// the delays.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Flush as soon as the buffer reaches this many records.
    pub batch_size: usize,
    /// Flush a non-empty buffer older than this.
    pub batch_interval: Duration,
    /// Bounded submission queue depth; overflow drops.
    pub queue_depth: usize,
    /// Maximum additional delivery attempts after the first.
    pub max_retries: u32,
    /// First retry delay; doubles per attempt (1s, 2s, 4s).
    pub retry_base_delay: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// When remote retries are exhausted, persist the batch locally instead
    /// of dropping it.
    pub fallback_to_local: bool,
    /// Local database location; `None` uses the default path.
    pub store_path: Option<PathBuf>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            batch_size: 20,
            batch_interval: Duration::from_secs(15),
            queue_depth: 100,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            fallback_to_local: false,
            store_path: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sink handle
// ─────────────────────────────────────────────────────────────────────────────

struct Job {
    record: AuditRecord,
    observe_url: String,
}

/// Handle to the audit pipeline. Cheap to share by reference; owns the worker
/// task until [`AuditSink::shutdown`].
pub struct AuditSink {
    tx: mpsc::Sender<Job>,
    worker: JoinHandle<()>,
}

impl AuditSink {
    /// Start the sink worker.
    pub fn start(provider: Arc<dyn TokenProvider>, config: SinkConfig) -> AuditSink {
        let (tx, rx) = mpsc::channel(config.queue_depth);

        let worker = SinkWorker {
            rx,
            buffer: Vec::with_capacity(config.batch_size),
            buffer_url: String::new(),
            last_flush: Instant::now(),
            dispatcher: Dispatcher {
                provider,
                client: reqwest::Client::new(),
                config: config.clone(),
                store: Arc::new(OnceCell::new()),
                local_mode_banner: Arc::new(Once::new()),
            },
            tracker: TaskTracker::new(),
            config,
        };

        AuditSink {
            tx,
            worker: tokio::spawn(worker.run()),
        }
    }

    /// Queue a record for delivery. Never blocks: a full queue drops the
    /// record with a warning.
    ///
    /// Fills `id`, `timestamp`, and `proxy_version` when the producer left
    /// them empty.
    pub fn submit(&self, mut record: AuditRecord, observe_url: &str) {
        if record.id.is_empty() {
            record.id = Uuid::new_v4().to_string();
        }
        if record.timestamp.is_empty() {
            record.timestamp = rfc3339_nanos(chrono::Utc::now());
        }
        if record.proxy_version.is_none() {
            record.proxy_version = Some(PROXY_VERSION.to_string());
        }

        telemetry::track_record(&record);

        let record_id = record.id.clone();
        let job = Job {
            record,
            observe_url: observe_url.to_string(),
        };
        match self.tx.try_send(job) {
            Ok(()) => tracing::debug!(record_id, "queued audit record"),
            Err(_) => tracing::warn!(record_id, "audit queue full, dropping record"),
        }
    }

    /// Drain the queue, flush the remaining buffer, and wait for in-flight
    /// deliveries to settle.
    pub async fn shutdown(self) {
        let AuditSink { tx, worker } = self;
        drop(tx);
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "sink worker did not shut down cleanly");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────────────────────────

struct SinkWorker {
    rx: mpsc::Receiver<Job>,
    buffer: Vec<AuditRecord>,
    /// Endpoint the current buffer is bound to. One buffer, one endpoint.
    buffer_url: String,
    last_flush: Instant,
    dispatcher: Dispatcher,
    tracker: TaskTracker,
    config: SinkConfig,
}

impl SinkWorker {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.batch_interval / 2);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                job = self.rx.recv() => match job {
                    Some(job) => self.absorb(job),
                    // Channel closed and drained: final flush below.
                    None => break,
                },
                _ = ticker.tick() => {
                    if !self.buffer.is_empty()
                        && self.last_flush.elapsed() >= self.config.batch_interval
                    {
                        tracing::debug!(size = self.buffer.len(), "batch interval reached, flushing");
                        self.flush();
                    }
                }
            }
        }

        self.flush();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::debug!("audit sink worker stopped");
    }

    /// Add a record to the buffer, flushing first if the endpoint changed and
    /// again if the size threshold is reached.
    fn absorb(&mut self, job: Job) {
        if !self.buffer.is_empty() && job.observe_url != self.buffer_url {
            tracing::debug!(
                old = %self.buffer_url,
                new = %job.observe_url,
                "observe endpoint changed, flushing current buffer"
            );
            self.flush();
        }
        if self.buffer.is_empty() {
            self.buffer_url = job.observe_url;
        }
        self.buffer.push(job.record);

        if self.buffer.len() >= self.config.batch_size {
            tracing::debug!(size = self.buffer.len(), "buffer full, flushing");
            self.flush();
        }
    }

    /// Snapshot-and-clear the buffer and dispatch the batch asynchronously.
    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.config.batch_size));
        let url = std::mem::take(&mut self.buffer_url);
        self.last_flush = Instant::now();

        let dispatcher = self.dispatcher.clone();
        self.tracker.spawn(async move {
            dispatcher.dispatch(batch, url).await;
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Dispatcher {
    provider: Arc<dyn TokenProvider>,
    client: reqwest::Client,
    config: SinkConfig,
    /// Lazily-initialized shared store handle; `None` inside the cell means
    /// initialization failed once and local batches are lost for this run.
    store: Arc<OnceCell<Option<Arc<LocalStore>>>>,
    local_mode_banner: Arc<Once>,
}

impl Dispatcher {
    /// Deliver one batch to exactly one sink, chosen by current auth state.
    async fn dispatch(&self, batch: Vec<AuditRecord>, observe_url: String) {
        if batch.is_empty() {
            return;
        }

        let token = {
            let provider = self.provider.clone();
            match tokio::task::spawn_blocking(move || provider.token()).await {
                Ok(Ok(token)) => token,
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "token lookup failed, storing batch locally");
                    None
                }
                Err(e) => {
                    tracing::warn!(error = %e, "token lookup task failed, storing batch locally");
                    None
                }
            }
        };

        match token {
            Some(token) => {
                if !self.deliver_remote(&batch, &observe_url, &token).await
                    && self.config.fallback_to_local
                {
                    tracing::warn!(
                        size = batch.len(),
                        "remote delivery exhausted, falling back to local store"
                    );
                    self.store_locally(batch).await;
                }
            }
            None => self.store_locally(batch).await,
        }
    }

    /// POST the batch with retries and exponential backoff. Returns whether
    /// any attempt succeeded.
    async fn deliver_remote(&self, batch: &[AuditRecord], observe_url: &str, token: &str) -> bool {
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.config.retry_base_delay * 2u32.pow(attempt - 1);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    size = batch.len(),
                    "retrying batch delivery"
                );
                tokio::time::sleep(delay).await;
            }

            let result = self
                .client
                .post(observe_url)
                .bearer_auth(token)
                .timeout(self.config.request_timeout)
                .json(&batch)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(size = batch.len(), status = %resp.status(), "batch delivered");
                    return true;
                }
                Ok(resp) => {
                    tracing::warn!(attempt, status = %resp.status(), "batch delivery rejected");
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "batch delivery request failed");
                }
            }
        }

        tracing::warn!(
            size = batch.len(),
            attempts = self.config.max_retries + 1,
            "giving up on batch delivery"
        );
        false
    }

    /// Persist the batch to the local store, initializing it on first use.
    async fn store_locally(&self, batch: Vec<AuditRecord>) {
        self.local_mode_banner.call_once(|| {
            eprintln!(
                "---------------------------------------------------------------------"
            );
            eprintln!("INFO: Not authenticated. Storing logs locally.");
            eprintln!("      Use 'ithena-cli logs show' to view them.");
            eprintln!(
                "---------------------------------------------------------------------"
            );
        });

        let store = self
            .store
            .get_or_init(|| {
                let path = self.config.store_path.clone();
                async move {
                    let open = tokio::task::spawn_blocking(move || match path {
                        Some(path) => LocalStore::open(&path),
                        None => LocalStore::open_default(),
                    })
                    .await;
                    match open {
                        Ok(Ok(store)) => Some(Arc::new(store)),
                        Ok(Err(e)) => {
                            tracing::error!(error = %e, "failed to initialize local log store; local logs will be lost");
                            None
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "local store init task failed; local logs will be lost");
                            None
                        }
                    }
                }
            })
            .await;

        let Some(store) = store.clone() else {
            tracing::warn!(size = batch.len(), "local store unavailable, batch lost");
            return;
        };

        let first_id = batch.first().map(|r| r.id.clone()).unwrap_or_default();
        let size = batch.len();
        let result = tokio::task::spawn_blocking(move || store.save_batch(&batch)).await;
        match result {
            Ok(Ok(())) => tracing::debug!(size, "batch stored locally"),
            Ok(Err(e)) => {
                tracing::warn!(size, first_id, error = %e, "failed to store batch locally")
            }
            Err(e) => tracing::warn!(size, first_id, error = %e, "local store task failed"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
