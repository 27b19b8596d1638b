//! Anthropic Messages API types.
//!
//! Only the subset the extractor needs: a single user turn in, text
//! content blocks out.

use serde::{Deserialize, Serialize};

/// Request body for the Anthropic Messages API.
#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub messages: Vec<MessageParam>,
    pub temperature: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageParam {
    pub role: String,
    pub content: String,
}

/// Non-streaming response body.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse {
    pub content: Vec<ContentBlock>,
}

/// A content block in a response.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

impl MessagesResponse {
    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_text_skips_other_blocks() {
        let response: MessagesResponse = serde_json::from_str(
            r#"{"content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "{\"summary\":"},
                {"type": "text", "text": " \"x\"}"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(response.text(), "{\"summary\": \"x\"}");
    }
}
