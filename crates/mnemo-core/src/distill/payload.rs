//! Extraction payload parsing and validation.
//!
//! Collaborators often wrap their JSON in prose or a Markdown code fence, so
//! the outermost object is sliced out before strict parsing. A code snippet
//! or a decision may be a bare string; any other shape mismatch is a schema
//! failure.

use serde::Deserialize;

use mnemo_types::error::ExtractionError;
use mnemo_types::record::{CodeSnippet, Decision, RecordContent};

#[derive(Debug, Deserialize)]
struct RawPayload {
    summary: String,
    #[serde(default)]
    key_topics: Vec<String>,
    #[serde(default)]
    action_items: Vec<String>,
    #[serde(default)]
    learnings: Vec<String>,
    #[serde(default)]
    code_snippets: Vec<RawSnippet>,
    #[serde(default, alias = "decisions_made")]
    decisions: Vec<RawDecision>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSnippet {
    Text(String),
    Full {
        #[serde(default, alias = "language")]
        language_hint: Option<String>,
        #[serde(alias = "code")]
        text: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDecision {
    Text(String),
    Full {
        #[serde(alias = "decision")]
        choice: String,
        #[serde(default, alias = "reason")]
        rationale: String,
    },
}

/// Slice the outermost JSON object out of `raw`.
fn json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

fn clean(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a collaborator response into record content.
pub fn parse_payload(raw: &str) -> Result<RecordContent, ExtractionError> {
    let json = json_object(raw)
        .ok_or_else(|| ExtractionError::Malformed("no JSON object in response".to_string()))?;
    let payload: RawPayload =
        serde_json::from_str(json).map_err(|e| ExtractionError::Malformed(e.to_string()))?;

    let summary = payload.summary.trim().to_string();
    if summary.is_empty() {
        return Err(ExtractionError::Malformed("summary is empty".to_string()));
    }

    let code_snippets = payload
        .code_snippets
        .into_iter()
        .map(|s| match s {
            RawSnippet::Text(text) => CodeSnippet {
                language_hint: None,
                text,
            },
            RawSnippet::Full {
                language_hint,
                text,
            } => CodeSnippet {
                language_hint: language_hint.filter(|l| !l.trim().is_empty()),
                text,
            },
        })
        .filter(|s| !s.text.trim().is_empty())
        .collect();

    let decisions = payload
        .decisions
        .into_iter()
        .map(|d| match d {
            RawDecision::Text(choice) => Decision {
                choice,
                rationale: String::new(),
            },
            RawDecision::Full { choice, rationale } => Decision { choice, rationale },
        })
        .filter(|d| !d.choice.trim().is_empty())
        .collect();

    Ok(RecordContent {
        summary,
        key_topics: clean(payload.key_topics),
        action_items: clean(payload.action_items),
        learnings: clean(payload.learnings),
        code_snippets,
        decisions,
    })
}
