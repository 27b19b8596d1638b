//! AnthropicExtractor -- [`Extractor`] backed by the Anthropic Messages API.
//!
//! Sends the transcript as a single user turn with the fixed extraction
//! schema in the system prompt, temperature 0, and returns the text of the
//! reply for the distiller to validate.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is only exposed
//! when building request headers.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use mnemo_core::distill::Extractor;
use mnemo_core::distill::extractor::EXTRACTION_SCHEMA;
use mnemo_types::error::ExtractionError;

use super::types::{MessageParam, MessagesRequest, MessagesResponse};

const MAX_TOKENS: u32 = 4_096;

pub struct AnthropicExtractor {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl AnthropicExtractor {
    /// The Anthropic API version header value.
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(api_key: SecretString, model: String) -> Result<Self, ExtractionError> {
        // Overall deadline is the distiller's; only bound the connect here.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ExtractionError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
            model,
        })
    }

    /// Override the base URL (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, transcript: &str) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            system: format!(
                "You distill conversation transcripts into durable knowledge records. \
                 Respond with exactly one JSON object matching this schema and nothing else:\n{EXTRACTION_SCHEMA}"
            ),
            messages: vec![MessageParam {
                role: "user".to_string(),
                content: format!("<transcript>\n{transcript}\n</transcript>"),
            }],
            temperature: 0.0,
        }
    }
}

impl Extractor for AnthropicExtractor {
    fn name(&self) -> &str {
        "anthropic"
    }

    #[tracing::instrument(skip(self, transcript), fields(model = %self.model))]
    async fn extract(&self, transcript: &str) -> Result<String, ExtractionError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&self.request(transcript))
            .send()
            .await
            .map_err(|e| ExtractionError::Transport(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => ExtractionError::AuthenticationFailed,
                429 => ExtractionError::RateLimited,
                code => ExtractionError::Status { status: code, body },
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::Malformed(format!("failed to parse response: {e}")))?;
        let text = parsed.text();
        if text.trim().is_empty() {
            return Err(ExtractionError::Malformed("response has no text".to_string()));
        }
        Ok(text)
    }
}
