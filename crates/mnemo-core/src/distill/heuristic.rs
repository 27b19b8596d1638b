//! Offline keyword/marker extractor.
//!
//! Used when no completion service is configured. It never fails on a
//! non-empty transcript: every list is filled from line markers and the
//! summary falls back to a fixed sentence when nothing qualifies.

use serde_json::json;

use mnemo_types::error::ExtractionError;

use super::extractor::Extractor;

const MAX_ITEMS: usize = 10;
const MAX_SNIPPETS: usize = 5;
const SUMMARY_LINES: usize = 3;
const SUMMARY_SCAN: usize = 10;
const MIN_SUMMARY_LINE: usize = 20;

const TOPIC_KEYWORDS: &[&str] = &[
    "api",
    "database",
    "function",
    "class",
    "error",
    "bug",
    "feature",
    "implementation",
    "test",
    "memory",
    "hook",
    "agent",
    "directive",
    "execution",
    "mcp",
    "claude",
];

const ACTION_MARKERS: &[&str] = &["todo", "[ ]", "need to", "should", "must"];

const LEARNING_MARKERS: &[&str] = &[
    "learned",
    "discovered",
    "found that",
    "realized",
    "insight:",
    "important:",
    "note:",
];

const DECISION_MARKERS: &[&str] = &[
    "decided to",
    "chosen",
    "selected",
    "going with",
    "will use",
    "opted for",
];

/// Keyword and marker based extraction with no network dependency.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicExtractor;

impl HeuristicExtractor {
    pub fn new() -> Self {
        Self
    }

    fn summary(transcript: &str) -> String {
        let lines: Vec<&str> = transcript
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(SUMMARY_SCAN)
            .filter(|l| l.chars().count() > MIN_SUMMARY_LINE && !l.starts_with('#') && !l.starts_with("```"))
            .take(SUMMARY_LINES)
            .collect();
        if lines.is_empty() {
            "Brief conversation".to_string()
        } else {
            lines.join(" ")
        }
    }

    fn topics(transcript: &str) -> Vec<String> {
        let lower = transcript.to_lowercase();
        TOPIC_KEYWORDS
            .iter()
            .filter(|k| lower.contains(*k))
            .take(MAX_ITEMS)
            .map(|k| k.to_string())
            .collect()
    }

    /// Prose lines (outside code fences) containing any of `markers`.
    fn marked_lines(transcript: &str, markers: &[&str]) -> Vec<String> {
        let mut in_fence = false;
        let mut hits = Vec::new();
        for line in transcript.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with("```") {
                in_fence = !in_fence;
                continue;
            }
            if in_fence || trimmed.is_empty() {
                continue;
            }
            let lower = trimmed.to_lowercase();
            if markers.iter().any(|m| lower.contains(m)) {
                hits.push(trimmed.to_string());
                if hits.len() == MAX_ITEMS {
                    break;
                }
            }
        }
        hits
    }

    fn snippets(transcript: &str) -> Vec<serde_json::Value> {
        let mut snippets = Vec::new();
        let mut current: Option<(Option<String>, Vec<&str>)> = None;
        for line in transcript.lines() {
            let trimmed = line.trim();
            if let Some(fence) = trimmed.strip_prefix("```") {
                match current.take() {
                    Some((language_hint, body)) => {
                        if !body.is_empty() {
                            snippets.push(json!({
                                "language_hint": language_hint,
                                "text": body.join("\n"),
                            }));
                            if snippets.len() == MAX_SNIPPETS {
                                break;
                            }
                        }
                    }
                    None => {
                        let hint = fence.trim();
                        let hint = (!hint.is_empty()).then(|| hint.to_string());
                        current = Some((hint, Vec::new()));
                    }
                }
            } else if let Some((_, body)) = current.as_mut() {
                body.push(line);
            }
        }
        snippets
    }

    /// Build the extraction payload for `transcript`.
    pub fn payload(transcript: &str) -> serde_json::Value {
        json!({
            "summary": Self::summary(transcript),
            "key_topics": Self::topics(transcript),
            "action_items": Self::marked_lines(transcript, ACTION_MARKERS),
            "learnings": Self::marked_lines(transcript, LEARNING_MARKERS),
            "code_snippets": Self::snippets(transcript),
            "decisions": Self::marked_lines(transcript, DECISION_MARKERS),
        })
    }
}

impl Extractor for HeuristicExtractor {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn extract(&self, transcript: &str) -> Result<String, ExtractionError> {
        Ok(Self::payload(transcript).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distill::payload::parse_payload;

    const TRANSCRIPT: &str = "\
# Session notes
We spent the afternoon wiring the memory hook into the agent loop.
The database layer now retries once before falling back to local files.
I learned that sqlite WAL mode lets readers proceed during writes.
We decided to keep the flag file per session.
TODO: add a reconcile command
```rust
fn main() {
    // should not count as an action item
}
```
Note: the api key comes from the environment.
";

    #[tokio::test]
    async fn test_extract_produces_valid_payload() {
        let raw = HeuristicExtractor.extract(TRANSCRIPT).await.unwrap();
        let content = parse_payload(&raw).unwrap();

        assert!(content.summary.starts_with("We spent the afternoon"));
        assert!(content.summary.contains("database layer"));
        for topic in ["memory", "hook", "agent", "database", "api"] {
            assert!(content.key_topics.contains(&topic.to_string()), "missing {topic}");
        }
        assert_eq!(content.action_items, vec!["TODO: add a reconcile command"]);
        assert_eq!(content.learnings.len(), 2);
        assert_eq!(content.decisions[0].choice, "We decided to keep the flag file per session.");
        assert_eq!(content.code_snippets.len(), 1);
        assert_eq!(content.code_snippets[0].language_hint.as_deref(), Some("rust"));
        assert!(content.code_snippets[0].text.contains("fn main()"));
    }

    #[test]
    fn test_summary_fallback_for_short_lines() {
        assert_eq!(HeuristicExtractor::summary("hi\nok\n"), "Brief conversation");
    }

    #[test]
    fn test_limits() {
        let transcript: String = (0..30).map(|i| format!("TODO item {i}\n")).collect();
        assert_eq!(
            HeuristicExtractor::marked_lines(&transcript, ACTION_MARKERS).len(),
            MAX_ITEMS
        );

        let fences: String = (0..8).map(|i| format!("```\nline {i}\n```\n")).collect();
        assert_eq!(HeuristicExtractor::snippets(&fences).len(), MAX_SNIPPETS);
    }
}
