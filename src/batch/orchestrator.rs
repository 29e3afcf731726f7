//! Batch Orchestrator
//!
//! Drives one batch through the pool: fan out every item up front, collect
//! results from a shared reply channel, and reassemble them into submission
//! order by index. Items sharing a fingerprint are held back until the first
//! occurrence lands in the deduplicator, which guarantees at most one probe
//! per distinct input without serializing the rest of the batch.

use super::format;
use super::sink;
use crate::config::{Context, OutputFormat};
use crate::pipeline::dedup::Deduplicator;
use crate::pipeline::pool::{Commander, Pipeline, DEFAULT_CHANNEL_CAPACITY};
use crate::pipeline::types::{Batch, ResultRecord};

use anyhow::{Context as _, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Executes a batch and returns one record per item, in submission order.
pub async fn run_batch(ctx: &Arc<Context>, batch: Batch) -> Result<Vec<ResultRecord>> {
    let total = batch.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let batch_id = Uuid::new_v4();
    let started = std::time::Instant::now();
    tracing::debug!("batch {} started with {} item(s)", batch_id, total);

    let dedup = Arc::new(Deduplicator::new());
    let pool = Pipeline::new(DEFAULT_CHANNEL_CAPACITY);
    pool.run(ctx.worker_num, ctx.clone(), dedup).await;

    let (reply_tx, mut reply_rx) = mpsc::channel(total);

    // First occurrence of each fingerprint is submitted immediately;
    // duplicates wait for its result so they hit the memoized outcome.
    let mut deferred: HashMap<String, Vec<usize>> = HashMap::new();
    let mut submitted: HashSet<&str> = HashSet::with_capacity(total);
    for (seq, item) in batch.items.iter().enumerate() {
        if submitted.contains(item.fingerprint()) {
            deferred
                .entry(item.fingerprint().to_string())
                .or_default()
                .push(seq);
            continue;
        }
        submitted.insert(item.fingerprint());
        pool.submit(Commander {
            seq,
            item: item.clone(),
            reply: reply_tx.clone(),
        })
        .await?;
    }

    let mut slots: Vec<Option<ResultRecord>> = vec![None; total];
    let mut received = 0usize;
    while received < total {
        let (seq, record) = reply_rx
            .recv()
            .await
            .context("pipeline closed before the batch completed")?;
        received += 1;

        if batch.policy.exit_on_failure && record.is_failure() {
            tracing::error!(
                "batch {} item {} failed under exit-on-failure policy: {}",
                batch_id,
                record.input,
                record.content.trim_end()
            );
            pool.stop();
            std::process::exit(1);
        }

        if let Some(waiting) = deferred.remove(&record.input) {
            for seq in waiting {
                pool.submit(Commander {
                    seq,
                    item: batch.items[seq].clone(),
                    reply: reply_tx.clone(),
                })
                .await?;
            }
        }

        slots[seq] = Some(record);
    }

    pool.stop();
    pool.wait().await;

    tracing::debug!("batch {} completed in {:?}", batch_id, started.elapsed());

    slots
        .into_iter()
        .enumerate()
        .map(|(seq, slot)| slot.ok_or_else(|| anyhow::anyhow!("missing result for item {}", seq)))
        .collect()
}

/// Runs a batch and renders the response body in the configured format,
/// forwarding json output to the Elasticsearch sink when one is configured.
/// Sink failures are logged, never returned.
pub async fn respond(ctx: &Arc<Context>, batch: Batch) -> Result<String> {
    let records = run_batch(ctx, batch).await?;

    match ctx.format {
        OutputFormat::Json => {
            let rendered = format::render_json(ctx, &records);
            let body = serde_json::to_string(&rendered).context("failed to marshal response")?;

            if let Some(es) = &ctx.es {
                if let Err(e) = sink::forward_bulk(ctx, es, &rendered).await {
                    tracing::warn!("elasticsearch forwarding failed: {}", e);
                }
            }

            Ok(body)
        }
        OutputFormat::Plain => Ok(format::render_plain(&records)),
    }
}
