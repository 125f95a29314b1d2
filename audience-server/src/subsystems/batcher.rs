//! Debounced per-identity batches
//!
//! Photos are queued by identity. Every `tick_seconds` one task drains the identities
//! that have been quiet for `reply_delay_minutes`, runs each image through the pipeline
//! and posts all of that identity's summaries as one message. Whatever is still queued
//! at shutdown is flushed regardless of the delay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use audience_core::config::BatchingConfig;
use bytes::Bytes;
use tokio::sync::{broadcast, Mutex};

use super::pipeline::{local_date, Pipeline};
use crate::telegram::SummarySink;

#[derive(Debug)]
struct PendingBatch {
    images: Vec<Bytes>,
    last_update: Instant,
}

#[derive(Debug, Default)]
pub struct PendingBatches {
    batches: Mutex<HashMap<String, PendingBatch>>,
}

impl PendingBatches {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, identity: &str, image: Bytes) {
        self.push_at(identity, image, Instant::now()).await
    }

    pub async fn push_at(&self, identity: &str, image: Bytes, now: Instant) {
        let mut batches = self.batches.lock().await;
        let batch = batches
            .entry(identity.to_string())
            .or_insert_with(|| PendingBatch {
                images: Vec::new(),
                last_update: now,
            });
        batch.images.push(image);
        batch.last_update = now;
    }

    /// Remove and return every batch idle for at least `delay`.
    pub async fn take_due(&self, now: Instant, delay: Duration) -> Vec<(String, Vec<Bytes>)> {
        let mut batches = self.batches.lock().await;
        let due: Vec<String> = batches
            .iter()
            .filter(|(_, b)| now.saturating_duration_since(b.last_update) >= delay)
            .map(|(identity, _)| identity.clone())
            .collect();

        due.into_iter()
            .filter_map(|identity| {
                batches
                    .remove(&identity)
                    .map(|batch| (identity, batch.images))
            })
            .collect()
    }

    pub async fn pending_images(&self) -> usize {
        self.batches.lock().await.values().map(|b| b.images.len()).sum()
    }
}

/// Process every due batch and send one message per identity. Returns the number of
/// identities flushed.
pub async fn flush_due(
    batches: &PendingBatches,
    pipeline: &Pipeline,
    sink: &dyn SummarySink,
    delay: Duration,
    timezone_offset_hours: i32,
) -> usize {
    let due = batches.take_due(Instant::now(), delay).await;
    let flushed = due.len();

    for (identity, images) in due {
        let date = local_date(timezone_offset_hours);
        let mut lines = Vec::with_capacity(images.len());
        for image in &images {
            let report = pipeline.process_image(image, &identity, date).await;
            lines.push(report.summary);
        }

        tracing::info!(identity = %identity, images = images.len(), "Batch flushed");
        if let Err(e) = sink.send_summary(&lines.join("\n")).await {
            tracing::error!(identity = %identity, error = %e, "Failed to send batch summary");
        }
    }

    flushed
}

pub async fn run_batch_loop(
    batches: Arc<PendingBatches>,
    pipeline: Arc<Pipeline>,
    sink: Arc<dyn SummarySink>,
    config: BatchingConfig,
    timezone_offset_hours: i32,
    mut shutdown: broadcast::Receiver<()>,
) {
    let delay = Duration::from_secs(config.reply_delay_minutes * 60);
    let mut ticker = tokio::time::interval(Duration::from_secs(config.tick_seconds.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(
        "Batch loop started (tick: {}s, reply delay: {}min)",
        config.tick_seconds,
        config.reply_delay_minutes
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let flushed = flush_due(&batches, &pipeline, sink.as_ref(), delay, timezone_offset_hours).await;
                if flushed == 0 {
                    tracing::debug!("No batch due");
                }
            }
            _ = shutdown.recv() => {
                let pending = batches.pending_images().await;
                if pending > 0 {
                    tracing::info!(pending = pending, "Flushing queued images before shutdown");
                    flush_due(&batches, &pipeline, sink.as_ref(), Duration::ZERO, timezone_offset_hours).await;
                }
                tracing::info!("Batch loop shutting down");
                break;
            }
        }
    }
}
