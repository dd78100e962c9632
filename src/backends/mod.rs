//! Translation backends and the capability they share.
//!
//! Every backend exposes one operation, `translate(text, pair)`, and fails
//! with a [`BackendError`]. The engine tries them in configured order.

use anyhow::{Context, Result, anyhow};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::BackendError;
use crate::language::LanguagePair;
use crate::settings::BackendSettings;

mod command;
mod google;
mod libre;
mod openai;
pub(crate) mod retry;

pub use command::CommandBackend;
pub use google::Google;
pub use libre::LibreTranslate;
pub use openai::OpenAI;

const USER_AGENT: &str = concat!("tree-translator-rust/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = Result<String, BackendError>> + Send + 'a>>;

pub trait Backend: Send + Sync {
    fn name(&self) -> &str;
    fn translate<'a>(&'a self, text: &'a str, pair: &'a LanguagePair) -> BackendFuture<'a>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Google,
    Libre,
    OpenAI,
    Command,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Google => "google",
            BackendKind::Libre => "libre",
            BackendKind::OpenAI => "openai",
            BackendKind::Command => "command",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "google" | "gtx" => Some(BackendKind::Google),
            "libre" | "libretranslate" | "argos" => Some(BackendKind::Libre),
            "openai" | "llm" => Some(BackendKind::OpenAI),
            "command" | "cmd" | "exec" => Some(BackendKind::Command),
            _ => None,
        }
    }
}

pub fn build_chain(entries: &[BackendSettings]) -> Result<Vec<Box<dyn Backend>>> {
    if entries.is_empty() {
        return Err(anyhow!("no translation backends configured"));
    }
    entries
        .iter()
        .enumerate()
        .map(|(pos, entry)| {
            build_backend(entry)
                .with_context(|| format!("invalid backend #{} ({})", pos + 1, entry.kind))
        })
        .collect()
}

pub fn build_backend(entry: &BackendSettings) -> Result<Box<dyn Backend>> {
    let kind = BackendKind::from_name(&entry.kind)
        .ok_or_else(|| anyhow!("unknown backend kind '{}'", entry.kind))?;
    let name = entry
        .name
        .clone()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| kind.as_str().to_string());

    let backend: Box<dyn Backend> = match kind {
        BackendKind::Google => {
            let mut google = Google::new(name, http_client()?);
            if let Some(url) = non_empty(entry.url.as_deref()) {
                google = google.with_base_url(url);
            }
            Box::new(google)
        }
        BackendKind::Libre => {
            let url = non_empty(entry.url.as_deref())
                .ok_or_else(|| anyhow!("libre backend needs a url"))?;
            let key = resolve_key(entry, &["LIBRETRANSLATE_API_KEY"]);
            Box::new(LibreTranslate::new(name, http_client()?, url, key))
        }
        BackendKind::OpenAI => {
            let key = resolve_key(entry, &["OPENAI_API_KEY"])
                .ok_or_else(|| anyhow!("openai backend needs an API key"))?;
            let mut openai = OpenAI::new(name, http_client()?, key);
            if let Some(url) = non_empty(entry.url.as_deref()) {
                openai = openai.with_base_url(url);
            }
            if let Some(model) = non_empty(entry.model.as_deref()) {
                openai = openai.with_model(model);
            }
            Box::new(openai)
        }
        BackendKind::Command => {
            let program = non_empty(entry.program.as_deref())
                .ok_or_else(|| anyhow!("command backend needs a program"))?;
            Box::new(CommandBackend::new(name, program, entry.args.clone()))
        }
    };
    Ok(backend)
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .with_context(|| "failed to build HTTP client")
}

fn resolve_key(entry: &BackendSettings, default_envs: &[&str]) -> Option<String> {
    if let Some(key) = non_empty(entry.api_key.as_deref()) {
        return Some(key.to_string());
    }
    if let Some(env) = non_empty(entry.api_key_env.as_deref()) {
        return get_env(env);
    }
    default_envs.iter().find_map(|env| get_env(env))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: &str) -> BackendSettings {
        BackendSettings {
            kind: kind.to_string(),
            ..BackendSettings::default()
        }
    }

    #[test]
    fn kind_names_and_aliases() {
        assert_eq!(BackendKind::from_name("Google"), Some(BackendKind::Google));
        assert_eq!(BackendKind::from_name("argos"), Some(BackendKind::Libre));
        assert_eq!(BackendKind::from_name("exec"), Some(BackendKind::Command));
        assert_eq!(BackendKind::from_name("marian"), None);
        assert_eq!(BackendKind::OpenAI.as_str(), "openai");
    }

    #[test]
    fn builds_named_chain_slots() {
        let mut command = entry("command");
        command.name = Some("marian".to_string());
        command.program = Some("marian-translate".to_string());
        let chain = build_chain(&[entry("google"), command]).expect("chain");
        let names: Vec<_> = chain.iter().map(|backend| backend.name().to_string()).collect();
        assert_eq!(names, vec!["google", "marian"]);
    }

    #[test]
    fn rejects_incomplete_entries() {
        assert!(build_chain(&[]).is_err());
        assert!(build_backend(&entry("libre")).is_err());
        assert!(build_backend(&entry("command")).is_err());
        assert!(build_backend(&entry("carrier-pigeon")).is_err());
    }

    #[test]
    fn explicit_key_wins_over_environment() {
        let mut openai = entry("openai");
        openai.api_key = Some("sk-test".to_string());
        assert_eq!(resolve_key(&openai, &["UNSET_TEST_KEY_VAR"]), Some("sk-test".to_string()));
        assert!(build_backend(&openai).is_ok());
    }
}
