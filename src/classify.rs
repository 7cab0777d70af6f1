//! Typed boundary around the black-box classification function, plus
//! defensive parsing of its output.
//!
//! Upstream classifiers return free-form, occasionally malformed JSON.
//! Rather than duck-typed attribute access, callers get an explicit tagged
//! result: `Valid` carries a parsed `ClassificationResult`, `Invalid` carries
//! the raw string so the caller can log it without ever feeding it into SQL
//! parameters.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::model::ClassificationResult;

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("classification failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<ParsedClassification, ClassifyError>;
}

/// Calls an external content-classification service over HTTP. The raw
/// response body is parsed defensively via `parse_classification` rather
/// than deserialized directly, since the service's output is not trusted
/// to be well-formed.
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpClassifier {
    pub fn new(endpoint: String) -> Self {
        HttpClassifier {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<ParsedClassification, ClassifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| ClassifyError::Failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClassifyError::Failed(format!(
                "classification service returned {}",
                response.status()
            )));
        }

        let raw = response
            .text()
            .await
            .map_err(|e| ClassifyError::Failed(format!("reading response body: {}", e)))?;

        Ok(parse_classification(&raw))
    }
}

/// Tagged result of parsing the classifier's raw output.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedClassification {
    Valid(ClassificationResult),
    Invalid(String),
}

/// Parses the classifier's raw text output defensively: missing keys
/// default to `false`/`0.0`/`None`; invalid JSON gets one repair attempt
/// (extract the first `{...}` substring) before being treated as `Invalid`.
pub fn parse_classification(raw: &str) -> ParsedClassification {
    if let Some(result) = try_parse(raw) {
        return ParsedClassification::Valid(result);
    }

    if let Some(repaired) = extract_braces(raw) {
        if let Some(result) = try_parse(&repaired) {
            return ParsedClassification::Valid(result);
        }
    }

    ParsedClassification::Invalid(raw.to_string())
}

fn try_parse(raw: &str) -> Option<ClassificationResult> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;

    let flagged = object.get("flagged").and_then(Value::as_bool).unwrap_or(false);
    let score = object
        .get("score")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    let category = object
        .get("category")
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    Some(ClassificationResult {
        flagged,
        score,
        category,
    })
}

fn extract_braces(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(raw[start..=end].to_string())
}

#[cfg(test)]
pub mod fake {
    use super::*;

    pub struct FakeClassifier {
        pub raw_output: String,
        pub fail: bool,
    }

    impl FakeClassifier {
        pub fn returning(raw_output: &str) -> Self {
            FakeClassifier {
                raw_output: raw_output.to_string(),
                fail: false,
            }
        }

        pub fn failing() -> Self {
            FakeClassifier {
                raw_output: String::new(),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl Classifier for FakeClassifier {
        async fn classify(&self, _text: &str) -> Result<ParsedClassification, ClassifyError> {
            if self.fail {
                return Err(ClassifyError::Failed("fake failure".to_string()));
            }
            Ok(parse_classification(&self.raw_output))
        }
    }
}
