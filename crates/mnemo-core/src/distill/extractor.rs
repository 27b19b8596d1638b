//! Extractor trait: the structured-extraction collaborator.
//!
//! An extractor receives a raw transcript and answers with a JSON object
//! carrying `summary`, `key_topics`, `action_items`, `learnings`,
//! `code_snippets` and `decisions`. Parsing and validation belong to the
//! distiller, so every implementation is held to the same schema.

use mnemo_types::error::ExtractionError;

/// The fixed schema every extractor is asked to produce.
pub const EXTRACTION_SCHEMA: &str = r#"{
  "summary": "string, two or three sentences describing what the conversation achieved",
  "key_topics": ["short lower-case topic keywords"],
  "action_items": ["follow-up tasks that remain open"],
  "learnings": ["facts or techniques discovered during the conversation"],
  "code_snippets": [{"language_hint": "language or null", "text": "the code"}],
  "decisions": [{"choice": "what was decided", "rationale": "why"}]
}"#;

/// Trait for structured-extraction collaborators.
///
/// Implementations live in this crate (`HeuristicExtractor`) and in
/// mnemo-infra (`AnthropicExtractor`). Uses native async fn in traits (RPITIT).
pub trait Extractor: Send + Sync {
    /// Name recorded in the `extractor` metadata key of distilled records.
    fn name(&self) -> &str;

    /// Extract the raw JSON payload for `transcript`.
    fn extract(
        &self,
        transcript: &str,
    ) -> impl std::future::Future<Output = Result<String, ExtractionError>> + Send;
}
