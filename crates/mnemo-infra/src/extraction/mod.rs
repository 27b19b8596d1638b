//! Extraction collaborators and their selection from configuration.

pub mod anthropic;
pub mod types;

use secrecy::SecretString;

use mnemo_core::distill::{BoxExtractor, HeuristicExtractor};
use mnemo_types::config::{ExtractionConfig, ExtractorKind};

pub use anthropic::AnthropicExtractor;

/// Build the configured extractor, reading the API key from the environment.
pub fn build_extractor(config: &ExtractionConfig) -> BoxExtractor {
    build_extractor_with(config, |name| std::env::var(name).ok())
}

/// Build the configured extractor with an explicit key lookup.
///
/// Falls back to the heuristic extractor (with a warning) when the HTTP
/// extractor is selected but no key is available or the client cannot be
/// built.
pub fn build_extractor_with(
    config: &ExtractionConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> BoxExtractor {
    match config.provider {
        ExtractorKind::Heuristic => BoxExtractor::new(HeuristicExtractor),
        ExtractorKind::Anthropic => {
            let Some(key) = lookup(&config.api_key_env).filter(|k| !k.trim().is_empty()) else {
                tracing::warn!(
                    env = %config.api_key_env,
                    "API key not set; falling back to heuristic extraction"
                );
                return BoxExtractor::new(HeuristicExtractor);
            };
            match AnthropicExtractor::new(SecretString::from(key), config.model.clone()) {
                Ok(extractor) => BoxExtractor::new(extractor.with_base_url(config.base_url.as_str())),
                Err(e) => {
                    tracing::warn!(error = %e, "falling back to heuristic extraction");
                    BoxExtractor::new(HeuristicExtractor)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_by_default() {
        let extractor = build_extractor_with(&ExtractionConfig::default(), |_| None);
        assert_eq!(extractor.name(), "heuristic");
    }

    #[test]
    fn test_anthropic_with_key() {
        let config = ExtractionConfig {
            provider: ExtractorKind::Anthropic,
            ..Default::default()
        };
        let extractor = build_extractor_with(&config, |name| {
            (name == "ANTHROPIC_API_KEY").then(|| "sk-test".to_string())
        });
        assert_eq!(extractor.name(), "anthropic");
    }

    #[test]
    fn test_anthropic_without_key_falls_back() {
        let config = ExtractionConfig {
            provider: ExtractorKind::Anthropic,
            ..Default::default()
        };
        let extractor = build_extractor_with(&config, |_| Some("  ".to_string()));
        assert_eq!(extractor.name(), "heuristic");
    }
}
