//! Worker Pool
//!
//! A fixed fleet of workers consuming a single bounded request channel.
//! Each request is a [`Commander`]: one work item plus the reply channel and
//! submission index used by the orchestrator to reassemble ordered results.
//!
//! Stopping is cooperative: the done signal stops workers from picking up
//! new requests, while in-flight probes run to completion (their own
//! timeouts are the only thing that kills a running probe).

use super::dedup::Deduplicator;
use super::types::{Outcome, ResultRecord, WorkItem, ERROR_CODE_FAILURE, ERROR_CODE_SUCCESS};
use crate::config::Context;
use crate::probe;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Capacity of the request channel; `submit` blocks once this many requests
/// are queued.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// One queued execution request.
pub struct Commander {
    /// Submission index within the batch; echoed back with the result.
    pub seq: usize,
    pub item: WorkItem,
    pub reply: mpsc::Sender<(usize, ResultRecord)>,
}

pub struct Pipeline {
    request_tx: mpsc::Sender<Commander>,
    request_rx: Arc<Mutex<mpsc::Receiver<Commander>>>,
    done_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn new(capacity: usize) -> Self {
        let (request_tx, request_rx) = mpsc::channel(capacity);
        let (done_tx, _) = watch::channel(false);

        Pipeline {
            request_tx,
            request_rx: Arc::new(Mutex::new(request_rx)),
            done_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the worker fleet. Each worker owns a clone of the context and
    /// the batch deduplicator.
    pub async fn run(&self, worker_num: usize, ctx: Arc<Context>, dedup: Arc<Deduplicator>) {
        let mut handles = self.handles.lock().await;
        for worker_id in 0..worker_num {
            let rx = self.request_rx.clone();
            let done_rx = self.done_tx.subscribe();
            let ctx = ctx.clone();
            let dedup = dedup.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, rx, done_rx, ctx, dedup).await;
            }));
        }
        tracing::debug!("pipeline started with {} workers", worker_num);
    }

    /// Queues one request; blocks while the channel is at capacity.
    pub async fn submit(&self, commander: Commander) -> Result<()> {
        self.request_tx
            .send(commander)
            .await
            .map_err(|_| anyhow::anyhow!("pipeline is stopped"))
    }

    /// Signals workers to exit once the current request finishes. Idempotent.
    pub fn stop(&self) {
        self.done_tx.send_replace(true);
    }

    /// Returns after every worker has exited.
    pub async fn wait(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!("worker join failed: {}", e);
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Commander>>>,
    mut done_rx: watch::Receiver<bool>,
    ctx: Arc<Context>,
    dedup: Arc<Deduplicator>,
) {
    tracing::trace!("worker {} started", worker_id);

    loop {
        if *done_rx.borrow() {
            break;
        }

        // Hold the receiver lock only while waiting for one request; the
        // lock is what distributes work across the fleet.
        let commander = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = done_rx.changed() => break,
                request = rx.recv() => match request {
                    Some(commander) => commander,
                    None => break,
                },
            }
        };

        execute(&ctx, &dedup, commander).await;
    }

    tracing::trace!("worker {} exited", worker_id);
}

/// Runs one request: consult the deduplicator, execute on a miss, and send
/// the stamped result back.
async fn execute(ctx: &Context, dedup: &Deduplicator, commander: Commander) {
    let Commander { seq, item, reply } = commander;

    let outcome = match dedup.lookup(item.fingerprint()) {
        Some(memoized) => memoized,
        None => {
            let outcome = probe::execute_item(ctx, &item).await;
            dedup.record(item.fingerprint(), outcome.clone());
            outcome
        }
    };

    let record = build_record(&item, outcome);
    if reply.send((seq, record)).await.is_err() {
        tracing::warn!("result receiver dropped for {}", item.input);
    }
}

fn build_record(item: &WorkItem, outcome: Outcome) -> ResultRecord {
    let error_code = if outcome.error.is_some() {
        ERROR_CODE_FAILURE
    } else {
        ERROR_CODE_SUCCESS
    };

    ResultRecord {
        input: item.input.clone(),
        name: item.name.clone(),
        error_code: error_code.to_string(),
        content: outcome.content,
        ts: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
    }
}
