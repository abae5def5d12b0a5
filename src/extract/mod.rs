//! The document extraction engine boundary.
//!
//! Extraction is an opaque, long-running call supplied by the embedder: it
//! either returns a result or fails. It is the dominant cost of a job and
//! is always invoked inside a worker, behind the shared circuit breaker.
//!
//! Retries imply the engine may see the same payload more than once
//! (at-least-once semantics); implementations must tolerate re-processing.

use crate::job::PayloadRef;
use futures::future::BoxFuture;
use std::path::PathBuf;
use thiserror::Error;

/// Result of a successful extraction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractOutput {
    /// Where the converted document was written.
    pub result_path: PathBuf,

    /// Size of the converted output in bytes.
    pub bytes: u64,
}

/// Error returned by the extraction engine.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The engine rejected or failed to process the payload.
    #[error("extraction failed: {0}")]
    Engine(String),

    /// The payload could not be read.
    #[error("payload unreadable: {0}")]
    Payload(String),
}

/// The extraction engine contract.
///
/// Implementations may be slow (seconds to minutes per call); the worker
/// bounds every call with the configured hard job timeout.
pub trait Extractor: Send + Sync {
    /// Converts the referenced document, returning the output location.
    fn extract<'a>(
        &'a self,
        payload: &'a PayloadRef,
    ) -> BoxFuture<'a, Result<ExtractOutput, ExtractError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoExtractor;

    impl Extractor for EchoExtractor {
        fn extract<'a>(
            &'a self,
            payload: &'a PayloadRef,
        ) -> BoxFuture<'a, Result<ExtractOutput, ExtractError>> {
            Box::pin(async move {
                Ok(ExtractOutput {
                    result_path: payload.path.with_extension("out"),
                    bytes: payload.size_bytes,
                })
            })
        }
    }

    #[tokio::test]
    async fn test_extractor_trait_object() {
        let extractor: Box<dyn Extractor> = Box::new(EchoExtractor);
        let payload = PayloadRef::new("/data/in/report.docx", 1024);

        let output = extractor.extract(&payload).await.unwrap();
        assert_eq!(output.bytes, 1024);
        assert_eq!(output.result_path, PathBuf::from("/data/in/report.out"));
    }

    #[test]
    fn test_error_display() {
        let err = ExtractError::Engine("parser crashed".to_string());
        assert_eq!(format!("{}", err), "extraction failed: parser crashed");
    }
}
