use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use otelly_core::config::Config;
use otelly_core::error::{OtellyError, Result};
use otelly_core::model::{ResourceLogs, ResourceSpans};
use otelly_store::Store;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{Bus, Topic};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub channel_capacity: usize,
    pub publish_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            publish_timeout: Duration::from_secs(1),
        }
    }
}

impl From<&Config> for PipelineConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            channel_capacity: cfg.channel_capacity,
            publish_timeout: cfg.publish_timeout,
        }
    }
}

/// What happened to one received batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub groups: usize,
    pub failed_groups: usize,
    pub persisted: usize,
    pub delivered: bool,
    /// Why nothing reached a subscriber. Never fatal.
    pub publish_error: Option<OtellyError>,
}

/// Persists batches and announces what was stored.
#[derive(Clone)]
struct Ingestor {
    store: Store,
    bus: Bus,
    publish_timeout: Duration,
}

impl Ingestor {
    async fn process_spans(&self, batch: Vec<ResourceSpans>) -> BatchOutcome {
        let (outcome, persisted) = persist_groups(&self.store, batch, Store::insert_spans).await;
        self.announce(&self.bus.spans, outcome, persisted).await
    }

    async fn process_logs(&self, batch: Vec<ResourceLogs>) -> BatchOutcome {
        let (outcome, persisted) = persist_groups(&self.store, batch, Store::insert_logs).await;
        self.announce(&self.bus.logs, outcome, persisted).await
    }

    async fn announce<T: Send>(
        &self,
        topic: &Topic<Vec<T>>,
        mut outcome: BatchOutcome,
        persisted: Vec<T>,
    ) -> BatchOutcome {
        if persisted.is_empty() {
            return outcome;
        }
        match topic.publish(persisted, self.publish_timeout).await {
            Ok(()) => outcome.delivered = true,
            Err(e) => outcome.publish_error = Some(e),
        }
        outcome
    }
}

/// Writes every resource group on its own blocking task. A failed group is
/// logged and left out; its siblings still commit.
async fn persist_groups<G, T>(
    store: &Store,
    groups: Vec<G>,
    write: fn(&Store, &G) -> Result<Vec<T>>,
) -> (BatchOutcome, Vec<T>)
where
    G: Send + 'static,
    T: Send + 'static,
{
    let mut outcome = BatchOutcome {
        groups: groups.len(),
        ..BatchOutcome::default()
    };

    let mut tasks = JoinSet::new();
    for group in groups {
        let store = store.clone();
        tasks.spawn_blocking(move || write(&store, &group));
    }

    let mut persisted = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(items)) => persisted.extend(items),
            Ok(Err(e)) => {
                outcome.failed_groups += 1;
                warn!(error = %e, "failed to persist resource group");
            }
            Err(e) => {
                outcome.failed_groups += 1;
                warn!(error = %e, "resource group writer panicked");
            }
        }
    }

    outcome.persisted = persisted.len();
    (outcome, persisted)
}

#[derive(Clone)]
pub struct Pipeline {
    ingest: Ingestor,
    spans_tx: mpsc::Sender<Vec<ResourceSpans>>,
    logs_tx: mpsc::Sender<Vec<ResourceLogs>>,
    cancel: CancellationToken,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Pipeline {
    pub fn new(store: Store, bus: Bus, cfg: PipelineConfig, cancel: CancellationToken) -> Self {
        let (spans_tx, spans_rx) = mpsc::channel(cfg.channel_capacity.max(1));
        let (logs_tx, logs_rx) = mpsc::channel(cfg.channel_capacity.max(1));
        let ingest = Ingestor {
            store,
            bus,
            publish_timeout: cfg.publish_timeout,
        };

        let span_worker = tokio::spawn(run_worker("spans", spans_rx, cancel.clone(), {
            let ingest = ingest.clone();
            move |batch| {
                let ingest = ingest.clone();
                async move { ingest.process_spans(batch).await }
            }
        }));
        let log_worker = tokio::spawn(run_worker("logs", logs_rx, cancel.clone(), {
            let ingest = ingest.clone();
            move |batch| {
                let ingest = ingest.clone();
                async move { ingest.process_logs(batch).await }
            }
        }));

        Self {
            ingest,
            spans_tx,
            logs_tx,
            cancel,
            workers: Arc::new(Mutex::new(vec![span_worker, log_worker])),
        }
    }

    /// Queues a batch for the span worker. Waits for room in the queue.
    pub async fn submit_spans(&self, batch: Vec<ResourceSpans>) -> Result<()> {
        submit(&self.cancel, &self.spans_tx, batch, "spans").await
    }

    pub async fn submit_logs(&self, batch: Vec<ResourceLogs>) -> Result<()> {
        submit(&self.cancel, &self.logs_tx, batch, "logs").await
    }

    /// Persists and publishes `batch` on the caller's task.
    pub async fn process_spans(&self, batch: Vec<ResourceSpans>) -> BatchOutcome {
        self.ingest.process_spans(batch).await
    }

    pub async fn process_logs(&self, batch: Vec<ResourceLogs>) -> BatchOutcome {
        self.ingest.process_logs(batch).await
    }

    /// Cancels the workers and waits for the batches they are writing.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let workers = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => {
                warn!("pipeline worker list poisoned");
                return;
            }
        };
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "pipeline worker failed");
            }
        }
    }
}

async fn submit<B>(
    cancel: &CancellationToken,
    tx: &mpsc::Sender<Vec<B>>,
    batch: Vec<B>,
    topic: &'static str,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(OtellyError::Ingest(format!(
            "pipeline shutting down, {topic} batch refused"
        )));
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OtellyError::Ingest(format!(
            "pipeline shutting down, {topic} batch refused"
        ))),
        sent = tx.send(batch) => sent.map_err(|_| {
            OtellyError::Ingest(format!("{topic} worker stopped"))
        }),
    }
}

async fn run_worker<B, F, Fut>(
    topic: &'static str,
    mut rx: mpsc::Receiver<Vec<B>>,
    cancel: CancellationToken,
    handle: F,
) where
    F: Fn(Vec<B>) -> Fut,
    Fut: Future<Output = BatchOutcome>,
{
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            batch = rx.recv() => {
                let Some(batch) = batch else { break };
                let outcome = handle(batch).await;
                report(topic, &outcome);
            }
        }
    }

    rx.close();
    let mut dropped = 0;
    while let Ok(batch) = rx.try_recv() {
        dropped += batch.len();
    }
    if dropped > 0 {
        warn!(topic, dropped_groups = dropped, "dropping queued batches at shutdown");
    }
    info!(topic, "ingest worker stopped");
}

fn report(topic: &'static str, outcome: &BatchOutcome) {
    match &outcome.publish_error {
        Some(OtellyError::PublishTimeout(waited)) => warn!(
            topic,
            persisted = outcome.persisted,
            waited = ?waited,
            "no subscriber took the update in time; consumers will re-query"
        ),
        Some(e) => debug!(topic, persisted = outcome.persisted, error = %e, "update not published"),
        None => debug!(
            topic,
            groups = outcome.groups,
            failed_groups = outcome.failed_groups,
            persisted = outcome.persisted,
            delivered = outcome.delivered,
            "batch processed"
        ),
    }
}
