use serde::Deserialize;
use serde_json::json;

use super::retry::send_with_retry;
use super::{Backend, BackendFuture};
use crate::error::BackendError;
use crate::language::LanguagePair;

/// A LibreTranslate server, the HTTP front end of Argos Translate.
#[derive(Debug, Clone)]
pub struct LibreTranslate {
    name: String,
    client: reqwest::Client,
    base_url: String,
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LibreResponse {
    #[serde(rename = "translatedText")]
    translated_text: Option<String>,
    error: Option<String>,
}

impl LibreTranslate {
    pub fn new(
        name: impl Into<String>,
        client: reqwest::Client,
        base_url: impl Into<String>,
        key: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key,
        }
    }

    async fn call(&self, text: &str, pair: &LanguagePair) -> Result<String, BackendError> {
        let url = format!("{}/translate", self.base_url);
        let mut body = json!({
            "q": text,
            "source": pair.source,
            "target": pair.target,
            "format": "text"
        });
        if let Some(key) = &self.key {
            body["api_key"] = json!(key);
        }
        let response = send_with_retry(&self.name, || self.client.post(&url).json(&body)).await?;
        parse_response(&response)
    }
}

impl Backend for LibreTranslate {
    fn name(&self) -> &str {
        &self.name
    }

    fn translate<'a>(&'a self, text: &'a str, pair: &'a LanguagePair) -> BackendFuture<'a> {
        Box::pin(self.call(text, pair))
    }
}

fn parse_response(body: &str) -> Result<String, BackendError> {
    let parsed: LibreResponse = serde_json::from_str(body)
        .map_err(|err| BackendError::failed(format!("invalid LibreTranslate response: {}", err)))?;
    if let Some(error) = parsed.error {
        return Err(BackendError::failed(format!("LibreTranslate: {}", error)));
    }
    parsed
        .translated_text
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| BackendError::failed("LibreTranslate returned no translation"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_translated_text() {
        let body = r#"{"translatedText": "Hello __PH_0__"}"#;
        assert_eq!(parse_response(body).expect("parse"), "Hello __PH_0__");
    }

    #[test]
    fn surfaces_service_errors() {
        let err = parse_response(r#"{"error": "tr is not supported"}"#).unwrap_err();
        assert!(err.to_string().contains("tr is not supported"));
        assert!(parse_response(r#"{"translatedText": "  "}"#).is_err());
    }
}
