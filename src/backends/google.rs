use serde_json::Value;

use super::retry::send_with_retry;
use super::{Backend, BackendFuture};
use crate::error::BackendError;
use crate::language::LanguagePair;

const DEFAULT_BASE_URL: &str = "https://translate.googleapis.com";

/// Google's public web translation endpoint (the `gtx` client).
#[derive(Debug, Clone)]
pub struct Google {
    name: String,
    client: reqwest::Client,
    base_url: String,
}

impl Google {
    pub fn new(name: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    async fn call(&self, text: &str, pair: &LanguagePair) -> Result<String, BackendError> {
        let url = format!("{}/translate_a/single", self.base_url);
        let body = send_with_retry(&self.name, || {
            self.client.get(&url).query(&[
                ("client", "gtx"),
                ("sl", pair.source.as_str()),
                ("tl", pair.target.as_str()),
                ("dt", "t"),
                ("q", text),
            ])
        })
        .await?;
        parse_response(&body)
    }
}

impl Backend for Google {
    fn name(&self) -> &str {
        &self.name
    }

    fn translate<'a>(&'a self, text: &'a str, pair: &'a LanguagePair) -> BackendFuture<'a> {
        Box::pin(self.call(text, pair))
    }
}

/// The body is a nested array whose first element lists translated
/// sentences as `[translated, original, ...]`.
fn parse_response(body: &str) -> Result<String, BackendError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| BackendError::failed(format!("invalid Google response: {}", err)))?;
    let sentences = value
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::failed("Google response has no sentences"))?;
    let translated: String = sentences
        .iter()
        .filter_map(|sentence| sentence.get(0).and_then(Value::as_str))
        .collect();
    if translated.trim().is_empty() {
        return Err(BackendError::failed("Google returned an empty translation"));
    }
    Ok(translated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_sentence_fragments() {
        let body = r#"[[["Hello ","Merhaba ",null,null,10],["world.","dünya.",null,null,10]],null,"tr"]"#;
        assert_eq!(parse_response(body).expect("parse"), "Hello world.");
    }

    #[test]
    fn rejects_unexpected_shapes() {
        assert!(parse_response("{}").is_err());
        assert!(parse_response("[[]]").is_err());
        assert!(parse_response("not json").is_err());
    }
}
