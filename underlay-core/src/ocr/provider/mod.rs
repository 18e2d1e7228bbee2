//! OCR provider boundary.
//!
//! The pipeline only depends on the [`OcrProvider`] trait and the parsed
//! [`schema`] model; the AWS Textract client lives behind it and tests plug
//! in stubs.

pub mod schema;
pub mod textract;

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use schema::OcrDocument;

/// Retry ceiling for transient provider errors.
const MAX_ATTEMPTS: u32 = 3;
/// Exponential backoff base, in seconds.
const BACKOFF_BASE_SECS: u64 = 2;

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    /// The provider rejected the request parameters, e.g. a page needing
    /// more than its memory limit.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("unsupported document: {0}")]
    UnsupportedDocument(String),
    /// Connection-level failure (TLS, DNS, timeouts); retrying the same
    /// request tends to fail the same way.
    #[error("transport error: {0}")]
    Transport(String),
    /// Generic provider-side error (throttling, internal errors).
    #[error("provider error: {0}")]
    Transient(String),
}

impl OcrError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, OcrError::Transient(_))
    }
}

#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Runs text detection on a single-page PDF.
    async fn detect_document_text(&self, document: &[u8]) -> Result<OcrDocument, OcrError>;
}

/// Calls the provider with bounded exponential backoff on transient errors.
pub async fn call_with_backoff(
    provider: &dyn OcrProvider,
    document: &[u8],
) -> Result<OcrDocument, OcrError> {
    let mut attempt = 1;
    loop {
        match provider.detect_document_text(document).await {
            Ok(result) => return Ok(result),
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                let wait = Duration::from_secs(BACKOFF_BASE_SECS.pow(attempt));
                warn!("backing off {wait:?} after attempt {attempt}: {err}");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider double returning canned documents, one per call.
    pub struct StubProvider {
        responses: Vec<Result<OcrDocument, OcrError>>,
        calls: AtomicUsize,
    }

    impl StubProvider {
        pub fn new(responses: Vec<Result<OcrDocument, OcrError>>) -> Self {
            Self {
                responses,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OcrProvider for StubProvider {
        async fn detect_document_text(&self, _document: &[u8]) -> Result<OcrDocument, OcrError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.get(call.min(self.responses.len().saturating_sub(1))) {
                Some(Ok(doc)) => Ok(doc.clone()),
                Some(Err(err)) => Err(clone_error(err)),
                None => Ok(OcrDocument::default()),
            }
        }
    }

    fn clone_error(err: &OcrError) -> OcrError {
        match err {
            OcrError::InvalidParameter(m) => OcrError::InvalidParameter(m.clone()),
            OcrError::UnsupportedDocument(m) => OcrError::UnsupportedDocument(m.clone()),
            OcrError::Transport(m) => OcrError::Transport(m.clone()),
            OcrError::Transient(m) => OcrError::Transient(m.clone()),
        }
    }
}
