use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub default_languages: Vec<String>,
    pub batch_size: usize,
    pub timeout: Duration,
    pub batch_dir: PathBuf,
    pub state_dir: PathBuf,
    pub backup_dir: Option<PathBuf>,
    pub backup_days: u64,
    pub keep_failed_source: bool,
    pub backends: Vec<BackendSettings>,
    pub languages: BTreeMap<String, LanguageSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_languages: Vec::new(),
            batch_size: 500,
            timeout: Duration::from_secs(60),
            batch_dir: PathBuf::from("messages/batches"),
            state_dir: PathBuf::from("messages"),
            backup_dir: None,
            backup_days: 30,
            keep_failed_source: false,
            backends: Vec::new(),
            languages: BTreeMap::new(),
        }
    }
}

/// One slot of the fallback chain.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BackendSettings {
    pub kind: String,
    pub name: Option<String>,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LanguageSettings {
    pub pair: Option<String>,
    pub source: Option<String>,
    pub target: Option<String>,
    pub transliterate: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    system: Option<SystemSettings>,
    backends: Option<Vec<BackendSettings>>,
    languages: Option<BTreeMap<String, LanguageSettings>>,
}

#[derive(Debug, Default, Deserialize)]
struct SystemSettings {
    languages: Option<Vec<String>>,
    batch_size: Option<usize>,
    timeout_secs: Option<u64>,
    batch_dir: Option<String>,
    state_dir: Option<String>,
    backup_dir: Option<String>,
    backup_days: Option<u64>,
    keep_failed_source: Option<bool>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    settings.merge(parse_settings(DEFAULT_SETTINGS_TOML, Path::new("<default>"))?);
    ensure_home_settings_file()?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(home) = paths::settings_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings.merge(parse_settings(&content, &path)?);
        }
    }

    Ok(settings)
}

fn parse_settings(content: &str, path: &Path) -> Result<SettingsFile> {
    toml::from_str(content).with_context(|| format!("failed to parse settings: {}", path.display()))
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(system) = incoming.system {
            if let Some(languages) = system.languages {
                self.default_languages = languages;
            }
            if let Some(size) = system.batch_size.filter(|size| *size > 0) {
                self.batch_size = size;
            }
            if let Some(secs) = system.timeout_secs.filter(|secs| *secs > 0) {
                self.timeout = Duration::from_secs(secs);
            }
            if let Some(dir) = non_blank(system.batch_dir) {
                self.batch_dir = PathBuf::from(dir);
            }
            if let Some(dir) = non_blank(system.state_dir) {
                self.state_dir = PathBuf::from(dir);
            }
            if let Some(dir) = non_blank(system.backup_dir) {
                self.backup_dir = Some(PathBuf::from(paths::expand_tilde(&dir)));
            }
            if let Some(days) = system.backup_days {
                self.backup_days = days;
            }
            if let Some(keep) = system.keep_failed_source {
                self.keep_failed_source = keep;
            }
        }
        if let Some(backends) = incoming.backends {
            self.backends = backends;
        }
        if let Some(languages) = incoming.languages {
            for (code, language) in languages {
                self.languages
                    .entry(code)
                    .or_default()
                    .merge(language);
            }
        }
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir.clone().unwrap_or_else(paths::backup_dir)
    }
}

impl LanguageSettings {
    fn merge(&mut self, incoming: LanguageSettings) {
        if let Some(pair) = non_blank(incoming.pair) {
            self.pair = Some(pair);
        }
        if let Some(source) = non_blank(incoming.source) {
            self.source = Some(source);
        }
        if let Some(target) = non_blank(incoming.target) {
            self.target = Some(target);
        }
        if let Some(script) = incoming.transliterate {
            self.transliterate = if script.trim().is_empty() {
                None
            } else {
                Some(script)
            };
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = paths::settings_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn embedded_defaults_describe_a_full_setup() {
        with_temp_home(|home| {
            let settings = load_settings(None).expect("settings");
            assert_eq!(settings.default_languages, vec!["en", "sr"]);
            assert_eq!(settings.batch_size, 500);
            assert_eq!(settings.timeout, Duration::from_secs(60));
            assert_eq!(settings.backends.len(), 2);
            assert_eq!(settings.backends[0].kind, "google");
            let sr = &settings.languages["sr"];
            assert_eq!(sr.pair.as_deref(), Some("en-sr"));
            assert_eq!(sr.transliterate.as_deref(), Some("sr-latin"));
            assert!(home.join(".tree-translator-rust/settings.toml").exists());
        });
    }

    #[test]
    fn extra_file_overrides_field_by_field() {
        with_temp_home(|home| {
            let extra = home.join("extra.toml");
            fs::write(
                &extra,
                r#"
[system]
batch_size = 2
keep_failed_source = true

[[backends]]
kind = "command"
name = "marian"
program = "marian-translate"
args = ["{pair}"]

[languages.sr]
transliterate = ""

[languages.de]
pair = "tr-de"
source = "messages/tr.json"
target = "messages/de.json"
"#,
            )
            .expect("write extra");
            let settings = load_settings(Some(&extra)).expect("settings");
            assert_eq!(settings.batch_size, 2);
            assert!(settings.keep_failed_source);
            assert_eq!(settings.timeout, Duration::from_secs(60));
            assert_eq!(settings.backends.len(), 1);
            assert_eq!(settings.backends[0].args, vec!["{pair}"]);
            let sr = &settings.languages["sr"];
            assert_eq!(sr.pair.as_deref(), Some("en-sr"));
            assert_eq!(sr.transliterate, None);
            assert_eq!(settings.languages["de"].pair.as_deref(), Some("tr-de"));
        });
    }

    #[test]
    fn missing_extra_file_is_an_error() {
        with_temp_home(|home| {
            let missing = home.join("nope.toml");
            assert!(load_settings(Some(&missing)).is_err());
        });
    }
}
