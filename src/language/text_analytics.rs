//! Azure Text Analytics language classifier

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::LanguageClassifier;
use crate::{Error, Result};

/// API path appended to the resource endpoint
const LANGUAGES_PATH: &str = "/text/analytics/v3.1/languages";

#[derive(Serialize)]
struct LanguagesRequest<'a> {
    documents: [Document<'a>; 1],
}

#[derive(Serialize)]
struct Document<'a> {
    id: &'static str,
    text: &'a str,
}

#[derive(Deserialize)]
struct LanguagesResponse {
    #[serde(default)]
    documents: Vec<DocumentResult>,
    #[serde(default)]
    errors: Vec<DocumentError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentResult {
    detected_language: DetectedLanguage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectedLanguage {
    iso6391_name: String,
    #[serde(default)]
    confidence_score: f64,
}

#[derive(Deserialize)]
struct DocumentError {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Classifies text with the Text Analytics `languages` endpoint
pub struct TextAnalyticsClassifier {
    client: reqwest::Client,
    url: String,
    key: String,
}

impl TextAnalyticsClassifier {
    /// Create a classifier for a Language resource
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Resource endpoint, e.g. `https://myres.cognitiveservices.azure.com`
    /// * `key` - Resource subscription key
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint or key is empty
    pub fn new(endpoint: &str, key: String) -> Result<Self> {
        let endpoint = endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(Error::Config(
                "language endpoint required for detection".to_string(),
            ));
        }
        if key.is_empty() {
            return Err(Error::Config("language key required for detection".to_string()));
        }

        Ok(Self {
            client: crate::http::client()?,
            url: format!("{endpoint}{LANGUAGES_PATH}"),
            key,
        })
    }
}

#[async_trait]
impl LanguageClassifier for TextAnalyticsClassifier {
    async fn classify(&self, text: &str) -> Result<String> {
        let request = LanguagesRequest {
            documents: [Document { id: "1", text }],
        };

        let response = self
            .client
            .post(&self.url)
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Language(format!(
                "Text Analytics error {status}: {body}"
            )));
        }

        let result: LanguagesResponse = response.json().await?;

        if let Some(failed) = result.errors.first() {
            return Err(Error::Language(format!(
                "{}: {}",
                failed.error.code, failed.error.message
            )));
        }

        let detected = result
            .documents
            .into_iter()
            .next()
            .map(|d| d.detected_language)
            .ok_or_else(|| Error::Language("no document in response".to_string()))?;

        tracing::trace!(
            code = %detected.iso6391_name,
            confidence = detected.confidence_score,
            "text classified"
        );
        Ok(detected.iso6391_name)
    }
}
