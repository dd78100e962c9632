use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::retry::truncate;
use super::{Backend, BackendFuture};
use crate::error::BackendError;
use crate::language::LanguagePair;

/// Runs an external program per string: text on stdin, translation on stdout.
///
/// Arguments may reference `{source}`, `{target}` and `{pair}`. The child
/// is killed when the call is dropped, e.g. after the engine's timeout.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandBackend {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
        }
    }

    fn expand_args(&self, pair: &LanguagePair) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{source}", &pair.source)
                    .replace("{target}", &pair.target)
                    .replace("{pair}", &pair.id())
            })
            .collect()
    }

    async fn call(&self, text: &str, pair: &LanguagePair) -> Result<String, BackendError> {
        let mut child = Command::new(&self.program)
            .args(self.expand_args(pair))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                BackendError::failed(format!("failed to start {}: {}", self.program, err))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await.map_err(|err| {
                BackendError::failed(format!("failed to write to {}: {}", self.program, err))
            })?;
        }

        let output = child.wait_with_output().await.map_err(|err| {
            BackendError::failed(format!("failed to wait for {}: {}", self.program, err))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                truncate(&stderr, 300)
            )));
        }
        let stdout = String::from_utf8(output.stdout).map_err(|_| {
            BackendError::failed(format!("{} produced non UTF-8 output", self.program))
        })?;
        let translated = stdout.trim_end_matches(['\r', '\n']).to_string();
        if translated.trim().is_empty() {
            return Err(BackendError::failed(format!(
                "{} produced no output",
                self.program
            )));
        }
        Ok(translated)
    }
}

impl Backend for CommandBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn translate<'a>(&'a self, text: &'a str, pair: &'a LanguagePair) -> BackendFuture<'a> {
        Box::pin(self.call(text, pair))
    }
}
