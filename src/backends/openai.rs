use serde::Deserialize;
use serde_json::json;

use super::retry::send_with_retry;
use super::{Backend, BackendFuture};
use crate::error::BackendError;
use crate::language::LanguagePair;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Any OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAI {
    name: String,
    client: reqwest::Client,
    key: String,
    model: String,
    base_url: String,
}

impl OpenAI {
    pub fn new(name: impl Into<String>, client: reqwest::Client, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client,
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: base_url_from_env(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    async fn call(&self, text: &str, pair: &LanguagePair) -> Result<String, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": system_prompt(pair)},
                {"role": "user", "content": text}
            ]
        });
        let response = send_with_retry(&self.name, || {
            self.client.post(&url).bearer_auth(&self.key).json(&body)
        })
        .await?;
        extract_content(&response)
    }
}

impl Backend for OpenAI {
    fn name(&self) -> &str {
        &self.name
    }

    fn translate<'a>(&'a self, text: &'a str, pair: &'a LanguagePair) -> BackendFuture<'a> {
        Box::pin(self.call(text, pair))
    }
}

fn base_url_from_env() -> String {
    std::env::var("OPENAI_BASE_URL")
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

fn system_prompt(pair: &LanguagePair) -> String {
    format!(
        "Translate the user's message from '{}' to '{}'. \
         Reply with the translation only, without quotes or commentary. \
         Copy tokens shaped like __PH_0__ exactly as they appear and keep them in a sensible position.",
        pair.source, pair.target
    )
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    error: Option<ChatError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatError {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
}

fn extract_content(body: &str) -> Result<String, BackendError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|err| BackendError::failed(format!("failed to parse OpenAI response: {}", err)))?;
    if let Some(error) = parsed.error {
        return Err(BackendError::failed(format!(
            "OpenAI API error: {}",
            format_error_parts(error.message, error.kind, error.code)
        )));
    }
    parsed
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| BackendError::failed("OpenAI returned no content"))
}

fn format_error_parts(
    message: Option<String>,
    kind: Option<String>,
    code: Option<String>,
) -> String {
    let parts: Vec<String> = [
        message,
        kind.map(|kind| format!("type: {}", kind)),
        code.map(|code| format!("code: {}", code)),
    ]
    .into_iter()
    .flatten()
    .filter(|part| !part.trim().is_empty())
    .collect();
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(" | ")
    }
}
