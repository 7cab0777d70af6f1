//! Typed boundary around the black-box transcription function. The model
//! itself is out of scope; this module only defines the call shape the GPU
//! worker uses.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::model::TranscriptionResult;

#[derive(Error, Debug)]
pub enum TranscribeError {
    #[error("transcription failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, opus_path: &Path) -> Result<TranscriptionResult, TranscribeError>;
}

/// Calls an external speech-to-text service over HTTP. The service's model
/// internals are out of scope; this is purely a typed client for the
/// black-box boundary.
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTranscriber {
    pub fn new(endpoint: String) -> Self {
        HttpTranscriber {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, opus_path: &Path) -> Result<TranscriptionResult, TranscribeError> {
        let bytes = tokio::fs::read(opus_path)
            .await
            .map_err(|e| TranscribeError::Failed(format!("reading clip: {}", e)))?;

        let response = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| TranscribeError::Failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TranscribeError::Failed(format!(
                "transcription service returned {}",
                response.status()
            )));
        }

        response
            .json::<TranscriptionResult>()
            .await
            .map_err(|e| TranscribeError::Failed(format!("decoding response: {}", e)))
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;

    /// Deterministic fake used by GPU worker tests; never touches a real
    /// model.
    pub struct FakeTranscriber {
        pub text: String,
        pub language: String,
        pub confidence: f64,
        pub fail: bool,
    }

    impl FakeTranscriber {
        pub fn succeeding(text: &str) -> Self {
            FakeTranscriber {
                text: text.to_string(),
                language: "en".to_string(),
                confidence: 0.9,
                fail: false,
            }
        }

        pub fn failing() -> Self {
            FakeTranscriber {
                text: String::new(),
                language: String::new(),
                confidence: 0.0,
                fail: true,
            }
        }
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(&self, _opus_path: &Path) -> Result<TranscriptionResult, TranscribeError> {
            if self.fail {
                return Err(TranscribeError::Failed("fake failure".to_string()));
            }
            Ok(TranscriptionResult {
                text: self.text.clone(),
                language: self.language.clone(),
                confidence: self.confidence,
            })
        }
    }
}
