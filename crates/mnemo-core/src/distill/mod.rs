//! Transcript distillation.
//!
//! `Distiller` turns a raw transcript into a `RecordDraft` by delegating to an
//! extraction collaborator, then validating the payload. Timeouts and
//! transient collaborator errors are retried with exponential backoff; a
//! payload that fails validation is never retried. Nothing is written here.

pub mod box_extractor;
pub mod extractor;
pub mod heuristic;
pub mod payload;

use std::time::Duration;

use mnemo_types::config::ExtractionConfig;
use mnemo_types::error::DistillationError;
use mnemo_types::record::{Category, Metadata, MetadataValue, RecordDraft, TagSet};

pub use box_extractor::BoxExtractor;
pub use extractor::Extractor;
pub use heuristic::HeuristicExtractor;

/// Metadata key naming the collaborator that produced a record.
pub const META_EXTRACTOR: &str = "extractor";

/// Caller-supplied hints for a distillation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistillHints {
    /// Category of the resulting record. Defaults to `context_snapshot`.
    pub category: Option<Category>,
    /// Extra tags, merged after the extracted topics.
    pub tags: Vec<String>,
    /// Extra metadata merged into the record.
    pub metadata: Metadata,
}

/// Timeout and retry policy for collaborator calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistillerPolicy {
    /// Bound on a single collaborator call.
    pub timeout: Duration,
    /// Retries after a timed-out or transient failure.
    pub max_retries: u32,
    /// Base backoff, doubled on each retry.
    pub backoff: Duration,
}

impl Default for DistillerPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl From<&ExtractionConfig> for DistillerPolicy {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries,
            ..Default::default()
        }
    }
}

/// Converts transcripts into record drafts.
#[derive(Debug)]
pub struct Distiller {
    extractor: BoxExtractor,
    policy: DistillerPolicy,
}

impl Distiller {
    pub fn new(extractor: BoxExtractor, policy: DistillerPolicy) -> Self {
        Self { extractor, policy }
    }

    pub fn extractor_name(&self) -> &str {
        self.extractor.name()
    }

    /// Distill `transcript` into a draft.
    ///
    /// `EmptyTranscript` for blank input, `Timeout` when every attempt timed
    /// out, `ExtractionFailed` for collaborator errors and schema failures.
    #[tracing::instrument(
        skip(self, transcript, hints),
        fields(extractor = self.extractor.name(), transcript_len = transcript.len())
    )]
    pub async fn distill(
        &self,
        transcript: &str,
        hints: &DistillHints,
    ) -> Result<RecordDraft, DistillationError> {
        if transcript.trim().is_empty() {
            return Err(DistillationError::EmptyTranscript);
        }

        let raw = self.extract_with_retry(transcript).await?;
        let content = payload::parse_payload(&raw).map_err(|e| {
            tracing::warn!(
                error = %e,
                content_preview = %raw.chars().take(200).collect::<String>(),
                "extraction payload failed validation"
            );
            DistillationError::ExtractionFailed(e.to_string())
        })?;

        let mut tags: TagSet = content.key_topics.iter().map(String::as_str).collect();
        tags.extend(hints.tags.iter().map(String::as_str));

        let mut metadata = hints.metadata.clone();
        metadata.insert(
            META_EXTRACTOR.to_string(),
            MetadataValue::Text(self.extractor.name().to_string()),
        );

        Ok(RecordDraft {
            category: hints.category.unwrap_or_default(),
            tags,
            content,
            transcript_length: transcript.chars().count() as u64,
            metadata,
        })
    }

    async fn extract_with_retry(&self, transcript: &str) -> Result<String, DistillationError> {
        let mut attempt = 0;
        loop {
            let last = match tokio::time::timeout(self.policy.timeout, self.extractor.extract(transcript))
                .await
            {
                Ok(Ok(raw)) => return Ok(raw),
                Ok(Err(e)) if e.is_transient() => DistillationError::ExtractionFailed(e.to_string()),
                Ok(Err(e)) => return Err(DistillationError::ExtractionFailed(e.to_string())),
                Err(_) => DistillationError::Timeout(self.policy.timeout),
            };

            if attempt >= self.policy.max_retries {
                return Err(last);
            }
            let delay = self.policy.backoff * 2u32.saturating_pow(attempt);
            tracing::warn!(attempt, error = %last, ?delay, "extraction attempt failed; retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
