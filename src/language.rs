use anyhow::{Result, anyhow};
use std::fmt;
use std::str::FromStr;

/// Source and target language codes, written `tr-en`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn id(&self) -> String {
        format!("{}-{}", self.source, self.target)
    }
}

impl FromStr for LanguagePair {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let raw = value.trim();
        let (source, target) = raw
            .split_once('-')
            .ok_or_else(|| anyhow!("language pair '{}' must look like source-target", raw))?;
        let source = source.trim();
        let target = target.trim();
        if !is_code(source) || !is_code(target) {
            return Err(anyhow!("invalid language pair '{}'", raw));
        }
        Ok(Self::new(source.to_lowercase(), target.to_lowercase()))
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.target)
    }
}

fn is_code(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
