use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::time::Duration;

pub mod backends;
pub mod backup;
pub mod batch_store;
pub mod checkpoint;
pub mod collector;
pub mod engine;
pub mod error;
pub mod language;
pub mod logging;
pub mod merger;
mod paths;
pub mod pipeline;
pub mod placeholder;
pub mod scheduler;
pub mod settings;
mod storage;
#[cfg(test)]
mod test_util;
pub mod transliterate;
pub mod tree;

pub use checkpoint::CheckpointState;
pub use engine::{BackendStats, TranslationEngine};
pub use error::{BackendError, PipelineError};
pub use language::LanguagePair;
pub use pipeline::{
    Interrupt, InterruptHandle, LanguageJob, Mode, ResumeChoice, RunContext, RunSummary,
    interrupt_channel,
};
pub use transliterate::Script;

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub languages: Vec<String>,
    pub merge_only: bool,
    pub clear_state: bool,
    pub batch_size: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub settings_path: Option<String>,
    pub transliterate_file: Option<String>,
    pub script: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub report: String,
    pub success: bool,
    pub interrupted: bool,
}

impl Execution {
    fn done(report: String) -> Self {
        Self {
            report,
            success: true,
            interrupted: false,
        }
    }
}

pub async fn run(
    config: Config,
    interrupt: Interrupt,
    decide: &mut dyn FnMut(&CheckpointState) -> ResumeChoice,
) -> Result<Execution> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;
    if let Some(size) = config.batch_size {
        if size == 0 {
            return Err(anyhow!("--batch-size must be at least 1"));
        }
        settings.batch_size = size;
    }
    if let Some(secs) = config.timeout_secs {
        if secs == 0 {
            return Err(anyhow!("--timeout must be at least 1 second"));
        }
        settings.timeout = Duration::from_secs(secs);
    }

    if let Some(file) = config.transliterate_file.as_deref() {
        let script = config.script.as_deref().unwrap_or("sr-latin").parse()?;
        return transliterate_file(Path::new(file), script).map(Execution::done);
    }

    let codes = if config.languages.is_empty() {
        settings.default_languages.clone()
    } else {
        config.languages.clone()
    };
    if codes.is_empty() {
        return Err(anyhow!(
            "no target language given (use --lang or [system] languages)"
        ));
    }
    let jobs = codes
        .iter()
        .map(|code| LanguageJob::from_settings(code, &settings))
        .collect::<Result<Vec<_>>>()?;

    if config.clear_state {
        let store = checkpoint::CheckpointStore::new(&settings.state_dir);
        let mut lines = Vec::new();
        for job in &jobs {
            let removed = store.clear(&job.lang)?;
            lines.push(format!(
                "{}: {}",
                job.lang,
                if removed { "checkpoint cleared" } else { "no checkpoint" }
            ));
        }
        return Ok(Execution::done(lines.join("\n")));
    }

    let mode = if config.merge_only {
        Mode::MergeOnly
    } else {
        Mode::Translate
    };
    let mut context = RunContext::from_settings(&settings, mode, interrupt)?;
    let summary = context.run(&jobs, mode, decide).await;
    Ok(Execution {
        report: format_report(&summary, context.engine.stats()),
        success: summary.success(),
        interrupted: summary.interrupted,
    })
}

fn transliterate_file(path: &Path, script: Script) -> Result<String> {
    let mut document = tree::load_tree(path)?;
    let changed = transliterate::transliterate_tree(&mut document, script);
    if changed > 0 {
        let content = tree::to_pretty_string(&document)?;
        storage::write_atomic(path, &content)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(format!(
        "{}: {} strings converted to {}",
        path.display(),
        changed,
        script.as_str()
    ))
}

pub fn format_report(summary: &RunSummary, stats: &[BackendStats]) -> String {
    let mut lines = Vec::new();
    for job in &summary.jobs {
        let mut line = format!("{}:", job.lang);
        if job.plan.total > 0 {
            line.push_str(&format!(
                " {} batches completed, {} failed, {} strings translated, {} not translated",
                job.completed_batches.len(),
                job.failed_batches.len(),
                job.translated_strings,
                job.failed_strings
            ));
        }
        if let Some(merge) = &job.merge {
            if merge.changed {
                line.push_str(&format!(
                    " merged {} batches ({} strings)",
                    merge.batches, merge.leaves
                ));
            } else {
                line.push_str(" artifact up to date");
            }
        }
        if job.interrupted {
            line.push_str(" interrupted");
        }
        lines.push(line);
        for err in &job.errors {
            lines.push(format!("  error: {}", err));
        }
    }
    let used: Vec<_> = stats
        .iter()
        .filter(|stat| stat.success + stat.failed + stat.timeout > 0)
        .collect();
    if !used.is_empty() {
        lines.push("backends:".to_string());
        for stat in used {
            lines.push(format!("  {}", stat));
        }
    }
    if summary.interrupted {
        lines.push("interrupted: run again to resume".to_string());
    }
    lines.join("\n")
}
