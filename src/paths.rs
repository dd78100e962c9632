use std::path::{Path, PathBuf};

const BASE_DIR_ENV: &str = "TREE_TRANSLATOR_RUST_DIR";
const HOME_DIR_NAME: &str = ".tree-translator-rust";

pub(crate) fn settings_dir() -> Option<PathBuf> {
    if let Some(dir) = base_dir_override() {
        return Some(dir);
    }
    home_join(HOME_DIR_NAME)
}

pub(crate) fn backup_dir() -> PathBuf {
    settings_dir()
        .map(|dir| dir.join("backup"))
        .unwrap_or_else(|| PathBuf::from(HOME_DIR_NAME).join("backup"))
}

fn base_dir_override() -> Option<PathBuf> {
    std::env::var(BASE_DIR_ENV)
        .ok()
        .and_then(|value| normalize_dir(&value))
}

fn home_join(suffix: &str) -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(suffix))
        }
    })
}

fn normalize_dir(value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut normalized = PathBuf::new();
    for component in Path::new(&expand_tilde(trimmed)).components() {
        normalized.push(component.as_os_str());
    }
    Some(normalized)
}

pub(crate) fn expand_tilde(value: &str) -> String {
    if value == "~" || value.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            let home = home.trim();
            if home.is_empty() {
                return value.to_string();
            }
            if value == "~" {
                return home.to_string();
            }
            return format!("{}{}", home, &value[1..]);
        }
    }
    value.to_string()
}
