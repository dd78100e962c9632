use anyhow::{Context, Result, anyhow};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Replaces `path` with `contents` in one rename; readers see the old file or the new one.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let temp = write_temp_sibling(path, contents)?;
    temp.persist(path)
        .map_err(|err| anyhow!("failed to replace {}: {}", path.display(), err.error))?;
    Ok(())
}

/// Creates `path` with `contents`, failing if the file already exists.
pub(crate) fn write_new(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        return Err(anyhow!("{} already exists", path.display()));
    }
    let temp = write_temp_sibling(path, contents)?;
    temp.persist_noclobber(path)
        .map_err(|err| anyhow!("failed to create {}: {}", path.display(), err.error))?;
    Ok(())
}

fn write_temp_sibling(path: &Path, contents: &str) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory: {}", dir.display()))?;
    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    temp.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    temp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync temp file for {}", path.display()))?;
    Ok(temp)
}
