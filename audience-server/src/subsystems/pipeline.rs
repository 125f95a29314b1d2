//! Screenshot → observations → summary.
//!
//! One submission runs start to finish: normalize, OCR, classify, extract, then for each
//! readable handle reconcile against the store and append. Nothing here returns an
//! error: every submission ends in exactly one summary line.

use std::sync::Arc;

use audience_core::normalize::preprocess_for_ocr;
use audience_core::{
    classify, extract_all, reconcile, summarize, Observation, ObservationStore, OcrEngine,
    Platform,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

const TEXT_PREVIEW_CHARS: usize = 120;

/// Calendar date at `offset_hours` from UTC.
pub fn local_date(offset_hours: i32) -> NaiveDate {
    (Utc::now() + Duration::hours(offset_hours as i64)).date_naive()
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    pub identity: String,
    pub date: NaiveDate,
    pub platform: Platform,
    pub observations: Vec<Observation>,
    pub summary: String,
}

impl SubmissionReport {
    pub fn recorded(&self) -> usize {
        self.observations.len()
    }
}

#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn ObservationStore>,
    ocr: Arc<dyn OcrEngine>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn ObservationStore>, ocr: Arc<dyn OcrEngine>) -> Self {
        Self { store, ocr }
    }

    pub fn store(&self) -> &Arc<dyn ObservationStore> {
        &self.store
    }

    pub async fn process_image(
        &self,
        image: &[u8],
        identity: &str,
        date: NaiveDate,
    ) -> SubmissionReport {
        let text = self.read_text(image).await;
        self.process_text(&text, identity, date).await
    }

    /// Run everything after OCR on already-recognized text.
    ///
    /// Concurrent calls for the same account and identity may reconcile against the same
    /// previous observation (see [`reconcile`]).
    pub async fn process_text(&self, text: &str, identity: &str, date: NaiveDate) -> SubmissionReport {
        let platform = classify(text);
        let mut observations = Vec::new();

        for account in extract_all(text) {
            if !account.is_parsed() {
                debug!(account = %account.account, identity = %identity, "No follower count next to handle, skipped");
                continue;
            }

            let evolution =
                reconcile(self.store.as_ref(), &account.account, identity, account.followers).await;
            let observation = Observation::new(
                date,
                identity,
                platform,
                account.account,
                account.followers,
                evolution,
            );

            match self.store.append(&observation).await {
                Ok(()) => observations.push(observation),
                Err(e) => warn!(
                    account = %observation.account,
                    identity = %identity,
                    error = %e,
                    "Failed to append observation"
                ),
            }
        }

        let summary = summarize(date, identity, observations.len());
        info!(
            identity = %identity,
            platform = %platform,
            recorded = observations.len(),
            "Submission processed"
        );

        SubmissionReport {
            identity: identity.to_string(),
            date,
            platform,
            observations,
            summary,
        }
    }

    /// Normalized image through the OCR engine. Any failure reads as no text.
    async fn read_text(&self, image: &[u8]) -> String {
        let png = match preprocess_for_ocr(image) {
            Ok(png) => png,
            Err(e) => {
                warn!(error = %e, "Image could not be normalized");
                return String::new();
            }
        };

        match self.ocr.recognize_text(&png).await {
            Ok(text) => {
                let preview: String = text.chars().take(TEXT_PREVIEW_CHARS).collect();
                debug!(engine = self.ocr.name(), preview = %preview, "OCR text");
                text
            }
            Err(e) => {
                warn!(engine = self.ocr.name(), error = %e, "OCR failed");
                String::new()
            }
        }
    }
}
