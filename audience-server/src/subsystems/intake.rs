//! Telegram photo intake
//!
//! Turns updates (from the webhook or from long polling) into pipeline submissions.
//! Only photos posted in the configured group are handled. With batching enabled the
//! photo is queued for its identity, otherwise it is processed and answered at once.

use std::sync::Arc;
use std::time::Duration;

use audience_core::config::IdentityConfig;
use audience_core::{resolve_identity, summarize, IdentitySource};
use tokio::sync::broadcast;

use super::batcher::PendingBatches;
use super::pipeline::{local_date, Pipeline};
use crate::telegram::{Message, SummarySink, TelegramClient, Update};

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    Ignored,
    Queued { identity: String },
    Processed { identity: String, summary: String },
}

pub struct Intake {
    pub pipeline: Arc<Pipeline>,
    pub telegram: Arc<TelegramClient>,
    pub sink: Arc<dyn SummarySink>,
    pub batches: Option<Arc<PendingBatches>>,
    pub identity: IdentityConfig,
    pub timezone_offset_hours: i32,
}

/// Where the photo sits relative to forum topics.
pub fn identity_source(message: &Message) -> IdentitySource<'_> {
    if let Some(topic) = message
        .reply_to_message
        .as_ref()
        .and_then(|reply| reply.forum_topic_created.as_ref())
    {
        return IdentitySource::TopicCreation(&topic.name);
    }
    match message.message_thread_id {
        Some(thread_id) if message.is_topic_message => IdentitySource::Thread(thread_id),
        _ => IdentitySource::Unresolved,
    }
}

impl Intake {
    pub async fn handle_update(&self, update: &Update) -> anyhow::Result<IntakeOutcome> {
        let message = match &update.message {
            Some(m) if m.chat.id == self.telegram.group_id() => m,
            _ => return Ok(IntakeOutcome::Ignored),
        };
        let photo = match message.largest_photo() {
            Some(p) => p,
            None => return Ok(IntakeOutcome::Ignored),
        };

        let identity = resolve_identity(identity_source(message), &self.identity);
        tracing::info!(
            identity = %identity,
            message_id = message.message_id,
            "Photo received"
        );

        let image = match self.telegram.download_photo(&photo.file_id).await {
            Ok(image) => image,
            Err(e) => {
                tracing::error!(identity = %identity, error = %e, "Photo download failed");
                let summary = summarize(local_date(self.timezone_offset_hours), &identity, 0);
                self.sink.send_summary(&summary).await?;
                return Ok(IntakeOutcome::Processed { identity, summary });
            }
        };

        if let Some(batches) = &self.batches {
            batches.push(&identity, image).await;
            return Ok(IntakeOutcome::Queued { identity });
        }

        let report = self
            .pipeline
            .process_image(&image, &identity, local_date(self.timezone_offset_hours))
            .await;
        self.sink.send_summary(&report.summary).await?;

        Ok(IntakeOutcome::Processed {
            identity,
            summary: report.summary,
        })
    }
}

pub async fn run_polling_loop(
    intake: Arc<Intake>,
    poll_timeout_seconds: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    if let Err(e) = intake.telegram.delete_webhook().await {
        tracing::warn!("Could not clear webhook before polling: {}", e);
    }
    tracing::info!("Telegram polling started (timeout: {}s)", poll_timeout_seconds);

    let mut offset: Option<i64> = None;
    loop {
        tokio::select! {
            result = intake.telegram.get_updates(offset, poll_timeout_seconds) => {
                match result {
                    Ok(updates) => {
                        for update in updates {
                            offset = Some(update.update_id + 1);
                            if let Err(e) = intake.handle_update(&update).await {
                                tracing::error!(update_id = update.update_id, error = %e, "Update handling failed");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("getUpdates failed: {}", e);
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Telegram polling shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(value: serde_json::Value) -> Message {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_reply_to_topic_creation_uses_topic_name() {
        let m = message(serde_json::json!({
            "message_id": 9,
            "chat": {"id": 1},
            "message_thread_id": 4,
            "is_topic_message": true,
            "reply_to_message": {
                "message_id": 4,
                "chat": {"id": 1},
                "forum_topic_created": {"name": "SUIVI Lea"}
            }
        }));
        assert_eq!(identity_source(&m), IdentitySource::TopicCreation("SUIVI Lea"));
    }

    #[test]
    fn test_topic_message_without_reply_uses_thread_id() {
        let m = message(serde_json::json!({
            "message_id": 9,
            "chat": {"id": 1},
            "message_thread_id": 4,
            "is_topic_message": true
        }));
        assert_eq!(identity_source(&m), IdentitySource::Thread(4));
    }

    #[test]
    fn test_plain_group_message_is_unresolved() {
        let m = message(serde_json::json!({
            "message_id": 9,
            "chat": {"id": 1},
            "message_thread_id": 2
        }));
        assert_eq!(identity_source(&m), IdentitySource::Unresolved);
    }
}
