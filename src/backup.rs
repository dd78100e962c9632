use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

const META_FILE_NAME: &str = "meta.json";
const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackupEntry {
    pub id: String,
    pub src: String,
    pub backup: String,
    pub created_at: u64,
    pub expires_at: u64,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct BackupMeta {
    entries: Vec<BackupEntry>,
}

/// Copies of replaced artifacts, tracked in `meta.json` and pruned once
/// they expire.
#[derive(Debug, Clone)]
pub struct Backups {
    dir: PathBuf,
    ttl_days: u64,
}

impl Backups {
    pub fn new(dir: impl Into<PathBuf>, ttl_days: u64) -> Self {
        Self {
            dir: dir.into(),
            ttl_days: if ttl_days == 0 { 30 } else { ttl_days },
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn backup_file(&self, src: &Path) -> Result<BackupEntry> {
        let metadata = fs::metadata(src)
            .with_context(|| format!("failed to read file metadata: {}", src.display()))?;
        if !metadata.is_file() {
            return Err(anyhow::anyhow!(
                "backup source is not a file: {}",
                src.display()
            ));
        }

        let now = now_unix();
        let expires_at = now.saturating_add(self.ttl_days.saturating_mul(SECONDS_PER_DAY));

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create backup dir: {}", self.dir.display()))?;

        let mut meta = self.read_meta()?;
        cleanup_expired(&mut meta, now);

        let file_name = src
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("file");
        let id_seed = format!("{}:{}:{}", now, meta.entries.len(), src.display());
        let id = format!("{:x}", md5::compute(id_seed.as_bytes()));
        let backup_name = format!("{}_{}", id, sanitize_filename_component(file_name));
        let backup_path = self.dir.join(backup_name);

        fs::copy(src, &backup_path).with_context(|| {
            format!(
                "failed to copy backup from {} to {}",
                src.display(),
                backup_path.display()
            )
        })?;

        let entry = BackupEntry {
            id,
            src: src.to_string_lossy().to_string(),
            backup: backup_path.to_string_lossy().to_string(),
            created_at: now,
            expires_at,
        };
        meta.entries.push(entry.clone());
        self.write_meta(&meta)?;
        debug!("backed up {} to {}", src.display(), backup_path.display());
        Ok(entry)
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE_NAME)
    }

    fn read_meta(&self) -> Result<BackupMeta> {
        let path = self.meta_path();
        if !path.exists() {
            return Ok(BackupMeta::default());
        }
        let content = fs::read_to_string(&path).with_context(|| "failed to read backup meta")?;
        let meta = serde_json::from_str(&content).with_context(|| "failed to parse backup meta")?;
        Ok(meta)
    }

    fn write_meta(&self, meta: &BackupMeta) -> Result<()> {
        let path = self.meta_path();
        let content = serde_json::to_string_pretty(meta)?;
        fs::write(&path, content).with_context(|| "failed to write backup meta")?;
        Ok(())
    }
}

fn cleanup_expired(meta: &mut BackupMeta, now: u64) {
    let mut kept = Vec::new();
    for entry in meta.entries.drain(..) {
        let expired = entry.expires_at <= now;
        let backup_path = Path::new(&entry.backup);
        if expired || !backup_path.exists() {
            if backup_path.exists() {
                let _ = fs::remove_file(backup_path);
            }
            continue;
        }
        kept.push(entry);
    }
    meta.entries = kept;
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "file".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn backup_file_creates_meta_entry() {
        let dir = tempdir().expect("tempdir");
        let artifact = dir.path().join("sr.json");
        fs::write(&artifact, "{\"a\": \"zdravo\"}").expect("write file");

        let backups = Backups::new(dir.path().join("backup"), 1);
        let entry = backups.backup_file(&artifact).expect("backup file");
        assert!(Path::new(&entry.backup).exists());
        assert!(entry.backup.ends_with("_sr.json"));
        assert_eq!(entry.src, artifact.to_string_lossy());
        assert!(entry.expires_at >= entry.created_at + SECONDS_PER_DAY - 1);

        let second = backups.backup_file(&artifact).expect("second backup");
        assert_ne!(second.id, entry.id);

        let meta = fs::read_to_string(backups.dir().join(META_FILE_NAME)).expect("read meta");
        assert!(meta.contains(&entry.id));
        assert!(meta.contains(&second.id));
    }

    #[test]
    fn expired_entries_are_pruned() {
        let dir = tempdir().expect("tempdir");
        let stale = dir.path().join("stale_en.json");
        fs::write(&stale, "{}").expect("write");
        let mut meta = BackupMeta {
            entries: vec![BackupEntry {
                id: "old".to_string(),
                src: "en.json".to_string(),
                backup: stale.to_string_lossy().to_string(),
                created_at: 10,
                expires_at: 20,
            }],
        };
        cleanup_expired(&mut meta, 30);
        assert!(meta.entries.is_empty());
        assert!(!stale.exists());
    }
}
