//! BoxExtractor -- object-safe dynamic dispatch wrapper for Extractor.
//!
//! Same blanket-impl pattern as `BoxRecordBackend`.

use std::future::Future;
use std::pin::Pin;

use mnemo_types::error::ExtractionError;

use super::extractor::Extractor;

/// Object-safe version of [`Extractor`] with a boxed future.
pub trait ExtractorDyn: Send + Sync {
    fn name(&self) -> &str;

    fn extract_boxed<'a>(
        &'a self,
        transcript: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, ExtractionError>> + Send + 'a>>;
}

/// Blanket implementation: any `Extractor` automatically implements `ExtractorDyn`.
impl<T: Extractor> ExtractorDyn for T {
    fn name(&self) -> &str {
        Extractor::name(self)
    }

    fn extract_boxed<'a>(
        &'a self,
        transcript: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, ExtractionError>> + Send + 'a>> {
        Box::pin(self.extract(transcript))
    }
}

/// Type-erased extractor for runtime selection (heuristic vs HTTP).
pub struct BoxExtractor {
    inner: Box<dyn ExtractorDyn + Send + Sync>,
}

impl BoxExtractor {
    /// Wrap a concrete `Extractor` in a type-erased box.
    pub fn new<T: Extractor + 'static>(extractor: T) -> Self {
        Self {
            inner: Box::new(extractor),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn extract(&self, transcript: &str) -> Result<String, ExtractionError> {
        self.inner.extract_boxed(transcript).await
    }
}

impl std::fmt::Debug for BoxExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxExtractor")
            .field("name", &self.name())
            .finish()
    }
}
