//! Drives one target language at a time through plan, translate, persist,
//! checkpoint and merge.
//!
//! Everything a run touches lives in a [`RunContext`] built per invocation.
//! Interruption arrives through an [`Interrupt`] receiver; the job that
//! notices it saves its checkpoint before returning.

use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::backends;
use crate::backup::Backups;
use crate::batch_store::BatchStore;
use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::collector::{self, StringEntry};
use crate::engine::TranslationEngine;
use crate::language::LanguagePair;
use crate::merger::{self, MergeReport};
use crate::scheduler::{self, Batch, PlanSummary};
use crate::settings::Settings;
use crate::transliterate::Script;
use crate::tree;

/// One target language: where its source comes from and where it lands.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageJob {
    pub lang: String,
    pub pair: LanguagePair,
    pub source: PathBuf,
    pub target: PathBuf,
    pub transliterate: Option<Script>,
}

impl LanguageJob {
    pub fn from_settings(lang: &str, settings: &Settings) -> Result<Self> {
        let lang = lang.trim();
        let entry = settings
            .languages
            .get(lang)
            .ok_or_else(|| anyhow!("language '{}' is not configured in [languages]", lang))?;
        let pair: LanguagePair = entry
            .pair
            .as_deref()
            .ok_or_else(|| anyhow!("language '{}' has no pair", lang))?
            .parse()?;
        let source = entry
            .source
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("messages/{}.json", pair.source)));
        let target = entry
            .target
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("messages/{}.json", lang)));
        let transliterate = entry
            .transliterate
            .as_deref()
            .map(str::parse::<Script>)
            .transpose()
            .with_context(|| format!("language '{}'", lang))?;
        Ok(Self {
            lang: lang.to_string(),
            pair,
            source,
            target,
            transliterate,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub batch_size: usize,
    pub keep_failed_source: bool,
}

impl RunOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            batch_size: settings.batch_size,
            keep_failed_source: settings.keep_failed_source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeChoice {
    Resume,
    Restart,
}

pub struct InterruptHandle(watch::Sender<bool>);

impl InterruptHandle {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

#[derive(Clone)]
pub struct Interrupt(watch::Receiver<bool>);

impl Interrupt {
    /// An interrupt nobody can trigger.
    pub fn never() -> Self {
        interrupt_channel().1
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once triggered; pends forever if the handle is gone.
    pub async fn triggered(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn interrupt_channel() -> (InterruptHandle, Interrupt) {
    let (tx, rx) = watch::channel(false);
    (InterruptHandle(tx), Interrupt(rx))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    pub lang: String,
    pub plan: PlanSummary,
    pub seeded: usize,
    pub completed_batches: Vec<u32>,
    pub failed_batches: Vec<u32>,
    pub translated_strings: usize,
    pub failed_strings: usize,
    pub interrupted: bool,
    pub merge: Option<MergeReport>,
    pub errors: Vec<String>,
}

impl JobReport {
    fn new(lang: &str) -> Self {
        Self {
            lang: lang.to_string(),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        !self.interrupted && self.failed_batches.is_empty() && self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub jobs: Vec<JobReport>,
    pub interrupted: bool,
}

impl RunSummary {
    /// True when every planned batch was persisted and every merge validated.
    pub fn success(&self) -> bool {
        !self.interrupted && self.jobs.iter().all(JobReport::success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Translate,
    MergeOnly,
}

struct BatchOutcome {
    tree: Value,
    translated: usize,
    failed: usize,
    usage: BTreeMap<String, usize>,
}

pub struct RunContext {
    pub engine: TranslationEngine,
    pub batches: BatchStore,
    pub checkpoints: CheckpointStore,
    pub backups: Option<Backups>,
    pub options: RunOptions,
    interrupt: Interrupt,
}

impl RunContext {
    pub fn new(
        engine: TranslationEngine,
        batches: BatchStore,
        checkpoints: CheckpointStore,
        options: RunOptions,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            engine,
            batches,
            checkpoints,
            backups: None,
            options,
            interrupt,
        }
    }

    /// Merging alone needs no backends, so none are built for it.
    pub fn from_settings(settings: &Settings, mode: Mode, interrupt: Interrupt) -> Result<Self> {
        let chain = match mode {
            Mode::Translate => backends::build_chain(&settings.backends)?,
            Mode::MergeOnly => Vec::new(),
        };
        let engine = TranslationEngine::new(chain, settings.timeout);
        let mut context = Self::new(
            engine,
            BatchStore::new(&settings.batch_dir),
            CheckpointStore::new(&settings.state_dir),
            RunOptions::from_settings(settings),
            interrupt,
        );
        context.backups = Some(Backups::new(settings.backup_dir(), settings.backup_days));
        Ok(context)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_triggered()
    }

    /// Runs every job in order. Translation stops at the first interruption;
    /// languages after it are left for the next run.
    pub async fn run(
        &mut self,
        jobs: &[LanguageJob],
        mode: Mode,
        decide: &mut dyn FnMut(&CheckpointState) -> ResumeChoice,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        for job in jobs {
            if self.is_interrupted() {
                summary.interrupted = true;
                break;
            }
            let mut report = match mode {
                Mode::Translate => match self.translate_language(job, decide).await {
                    Ok(report) => report,
                    Err(err) => {
                        error!("'{}': {:#}", job.lang, err);
                        let mut report = JobReport::new(&job.lang);
                        report.errors.push(format!("{:#}", err));
                        summary.jobs.push(report);
                        continue;
                    }
                },
                Mode::MergeOnly => JobReport::new(&job.lang),
            };
            if report.interrupted {
                summary.interrupted = true;
                summary.jobs.push(report);
                break;
            }
            match self.merge_language(job) {
                Ok(merge) => report.merge = Some(merge),
                Err(err) => report.errors.push(format!("{:#}", err)),
            }
            summary.jobs.push(report);
        }
        summary
    }

    /// Translates every string of `job` not yet in its artifact or batches.
    ///
    /// A prior checkpoint is resumed or discarded according to `decide`.
    pub async fn translate_language(
        &mut self,
        job: &LanguageJob,
        decide: &mut dyn FnMut(&CheckpointState) -> ResumeChoice,
    ) -> Result<JobReport> {
        let mut report = JobReport::new(&job.lang);
        let source = tree::load_tree(&job.source)?;
        let entries = collector::collect(&source);
        let existing = tree::load_tree_or_empty(&job.target)?;
        report.seeded = self.seed_cache(&entries, &existing, &job.pair);

        let Some(mut state) = self.prepare_checkpoint(job, decide)? else {
            info!("'{}': interrupted before translation, checkpoint left as is", job.lang);
            report.interrupted = true;
            return Ok(report);
        };
        let emitted = self.batches.load_all(&job.lang)?;
        let mut plan = scheduler::plan(&entries, &existing, &emitted, self.options.batch_size);
        let last = self
            .batches
            .highest_number(&job.lang)?
            .max(state.highest_completed());
        plan.number_after(last);
        report.plan = plan.summary;
        info!("'{}' ({}): {}", job.lang, job.pair, plan.summary);
        if report.seeded > 0 {
            info!("'{}': {} cached translations from {}", job.lang, report.seeded, job.target.display());
        }

        state.total_batches = state.completed_batches.len() + plan.batches.len();
        state.counters.total_keys = plan.summary.total;
        state.counters.skipped_keys = plan.summary.in_artifact + plan.summary.in_batches;
        if plan.is_empty() {
            info!("'{}': nothing left to translate", job.lang);
            return Ok(report);
        }
        self.save_checkpoint(&mut state);

        let total = plan.batches.len();
        for (position, batch) in plan.batches.iter().enumerate() {
            if self.is_interrupted() {
                report.interrupted = true;
                break;
            }
            state.mark_started(batch.number);
            info!(
                "'{}': batch {} ({}/{}, {} strings)",
                job.lang,
                batch.number,
                position + 1,
                total,
                batch.entries.len()
            );
            let started = Instant::now();
            let Some(outcome) = self.translate_batch(job, batch).await? else {
                report.interrupted = true;
                break;
            };

            match self.batches.write(&job.lang, batch.number, &outcome.tree) {
                Ok(_) => {
                    state.mark_completed(batch.number);
                    state.counters.translated_keys += outcome.translated;
                    state.counters.failed_keys += outcome.failed;
                    report.completed_batches.push(batch.number);
                    report.translated_strings += outcome.translated;
                    report.failed_strings += outcome.failed;
                    info!(
                        "'{}': batch {} done in {:.1}s ({})",
                        job.lang,
                        batch.number,
                        started.elapsed().as_secs_f32(),
                        format_usage(&outcome.usage)
                    );
                }
                Err(err) => {
                    error!("{}", err);
                    state.mark_failed(batch.number);
                    report.failed_batches.push(batch.number);
                    report.errors.push(err.to_string());
                }
            }
            self.save_checkpoint(&mut state);
        }

        if report.interrupted {
            warn!(
                "'{}': interrupted, progress saved to {}",
                job.lang,
                self.checkpoints.file_path(&job.lang).display()
            );
            self.save_checkpoint(&mut state);
        }
        Ok(report)
    }

    /// Merges every batch of `job` into its artifact and drops the checkpoint.
    pub fn merge_language(&self, job: &LanguageJob) -> Result<MergeReport> {
        let source = tree::load_tree(&job.source)?;
        let batches = self.batches.load_all(&job.lang)?;
        let report = merger::merge_into_artifact(
            &job.lang,
            &job.target,
            &source,
            &batches,
            self.backups.as_ref(),
        )?;
        if self.checkpoints.clear(&job.lang)? {
            info!("'{}': checkpoint cleared", job.lang);
        }
        Ok(report)
    }

    fn seed_cache(&mut self, entries: &[StringEntry], existing: &Value, pair: &LanguagePair) -> usize {
        let mut seeded = 0;
        for entry in entries {
            if let Some(Value::String(translated)) = tree::get(existing, &entry.path) {
                if self.engine.seed(&entry.text, translated, pair) {
                    seeded += 1;
                }
            }
        }
        seeded
    }

    /// The checkpoint to continue from, or `None` when an interrupt arrived
    /// while the caller was deciding; the stored checkpoint is then kept.
    fn prepare_checkpoint(
        &mut self,
        job: &LanguageJob,
        decide: &mut dyn FnMut(&CheckpointState) -> ResumeChoice,
    ) -> Result<Option<CheckpointState>> {
        let fresh = || {
            CheckpointState::new(&job.lang, &job.source, &job.target, &job.pair.id())
        };
        let Some(prior) = self.checkpoints.load(&job.lang) else {
            return Ok(Some(fresh()));
        };
        if prior.language_pair != job.pair.id() {
            warn!(
                "'{}': checkpoint was for {}, starting over",
                job.lang, prior.language_pair
            );
            self.checkpoints.clear(&job.lang)?;
            return Ok(Some(fresh()));
        }
        let choice = decide(&prior);
        if self.is_interrupted() {
            return Ok(None);
        }
        match choice {
            ResumeChoice::Resume => {
                info!(
                    "'{}': resuming, {} batches completed, {} failed",
                    job.lang,
                    prior.completed_batches.len(),
                    prior.failed_batches.len()
                );
                Ok(Some(prior))
            }
            ResumeChoice::Restart => {
                info!("'{}': discarding checkpoint", job.lang);
                self.checkpoints.clear(&job.lang)?;
                Ok(Some(fresh()))
            }
        }
    }

    async fn translate_batch(&mut self, job: &LanguageJob, batch: &Batch) -> Result<Option<BatchOutcome>> {
        let Self {
            engine, interrupt, options, ..
        } = self;
        let mut outcome = BatchOutcome {
            tree: Value::Null,
            translated: 0,
            failed: 0,
            usage: BTreeMap::new(),
        };
        for entry in &batch.entries {
            if interrupt.is_triggered() {
                return Ok(None);
            }
            let translation = tokio::select! {
                biased;
                _ = interrupt.triggered() => return Ok(None),
                translation = engine.translate(&entry.text, &job.pair) => translation,
            };
            *outcome
                .usage
                .entry(translation.source.label().to_string())
                .or_insert(0) += 1;

            let text = if translation.is_failed() {
                outcome.failed += 1;
                if !options.keep_failed_source {
                    continue;
                }
                translation.text
            } else {
                outcome.translated += 1;
                match job.transliterate {
                    Some(script) => script.apply(&translation.text),
                    None => translation.text,
                }
            };
            tree::insert(&mut outcome.tree, &entry.path, Value::String(text))
                .with_context(|| format!("batch {} for '{}'", batch.number, job.lang))?;
        }
        if outcome.tree.is_null() {
            outcome.tree = Value::Object(Map::new());
        }
        Ok(Some(outcome))
    }

    fn save_checkpoint(&self, state: &mut CheckpointState) {
        if let Err(err) = self.checkpoints.save(state) {
            warn!("{:#}", err);
        }
    }
}

fn format_usage(usage: &BTreeMap<String, usize>) -> String {
    usage
        .iter()
        .map(|(label, count)| format!("{}: {}", label, count))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{Backend, BackendFuture};
    use crate::error::BackendError;
    use serde_json::json;
    use std::fs;
    use std::time::Duration;

    struct Upper;

    impl Backend for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn translate<'a>(&'a self, text: &'a str, _pair: &'a LanguagePair) -> BackendFuture<'a> {
            Box::pin(async move {
                if text.contains("fail") {
                    return Err(BackendError::failed("refused"));
                }
                Ok(text
                    .split(' ')
                    .map(|word| {
                        if word.starts_with("__") {
                            word.to_string()
                        } else {
                            word.to_uppercase()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(" "))
            })
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        job: LanguageJob,
    }

    impl Fixture {
        fn new(source: Value) -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let source_path = dir.path().join("tr.json");
            fs::write(&source_path, serde_json::to_string(&source).unwrap()).expect("write source");
            let job = LanguageJob {
                lang: "en".to_string(),
                pair: LanguagePair::new("tr", "en"),
                source: source_path,
                target: dir.path().join("en.json"),
                transliterate: None,
            };
            Self { dir, job }
        }

        fn context(&self, batch_size: usize, keep_failed_source: bool) -> RunContext {
            let engine = TranslationEngine::new(vec![Box::new(Upper)], Duration::from_secs(5));
            RunContext::new(
                engine,
                BatchStore::new(self.dir.path().join("batches")),
                CheckpointStore::new(self.dir.path()),
                RunOptions {
                    batch_size,
                    keep_failed_source,
                },
                Interrupt::never(),
            )
        }
    }

    fn resume(_: &CheckpointState) -> ResumeChoice {
        ResumeChoice::Resume
    }

    #[tokio::test]
    async fn broken_artifact_stops_the_language_before_planning() {
        let fixture = Fixture::new(json!({"a": "bir", "b": "iki"}));
        let broken = "{\"a\": \"ONE\",";
        fs::write(&fixture.job.target, broken).expect("write");
        let mut context = fixture.context(1, false);
        let summary = context
            .run(std::slice::from_ref(&fixture.job), Mode::Translate, &mut resume)
            .await;
        assert!(!summary.success());
        assert!(summary.jobs[0].errors[0].contains("en.json"));
        assert!(context.batches.list("en").expect("list").is_empty());
        assert!(!context.checkpoints.file_path("en").exists());
        assert_eq!(fs::read_to_string(&fixture.job.target).expect("read"), broken);

        let merged = context
            .run(std::slice::from_ref(&fixture.job), Mode::MergeOnly, &mut resume)
            .await;
        assert!(!merged.success());
        assert_eq!(fs::read_to_string(&fixture.job.target).expect("read"), broken);
    }

    #[tokio::test]
    async fn translates_merges_and_clears_checkpoint() {
        let fixture = Fixture::new(json!({"a": "bir", "b": {"c": "iki {n}"}, "d": 4}));
        let mut context = fixture.context(1, false);
        let summary = context
            .run(std::slice::from_ref(&fixture.job), Mode::Translate, &mut resume)
            .await;
        assert!(summary.success(), "{:?}", summary);
        let report = &summary.jobs[0];
        assert_eq!(report.completed_batches, vec![1, 2]);
        assert_eq!(report.plan.remaining, 2);
        assert_eq!(
            tree::load_tree(&fixture.job.target).expect("artifact"),
            json!({"a": "BIR", "b": {"c": "IKI {n}"}, "d": 4})
        );
        assert!(!context.checkpoints.file_path("en").exists());
    }

    #[tokio::test]
    async fn failed_strings_are_left_out_unless_configured() {
        let fixture = Fixture::new(json!({"ok": "tamam", "bad": "fail here"}));
        let mut context = fixture.context(10, false);
        let report = context
            .translate_language(&fixture.job, &mut resume)
            .await
            .expect("translate");
        assert_eq!(report.failed_strings, 1);
        let batch = tree::load_tree(&context.batches.file_path("en", 1)).expect("batch");
        assert_eq!(batch, json!({"ok": "TAMAM"}));

        let rerun = context
            .translate_language(&fixture.job, &mut resume)
            .await
            .expect("rerun");
        assert_eq!(rerun.plan.remaining, 1);
        assert_eq!(rerun.completed_batches, vec![2]);

        let fixture = Fixture::new(json!({"bad": "fail here"}));
        let mut context = fixture.context(10, true);
        context
            .translate_language(&fixture.job, &mut resume)
            .await
            .expect("translate");
        let batch = tree::load_tree(&context.batches.file_path("en", 1)).expect("batch");
        assert_eq!(batch, json!({"bad": "fail here"}));
    }

    #[tokio::test]
    async fn restart_discards_checkpoint_but_not_batches() {
        let fixture = Fixture::new(json!({"a": "bir", "b": "iki"}));
        let mut context = fixture.context(1, false);
        let mut stale = CheckpointState::new("en", &fixture.job.source, &fixture.job.target, "tr-en");
        stale.mark_completed(9);
        context.checkpoints.save(&mut stale).expect("save");

        let mut asked = 0;
        let mut restart = |_: &CheckpointState| {
            asked += 1;
            ResumeChoice::Restart
        };
        let report = context
            .translate_language(&fixture.job, &mut restart)
            .await
            .expect("translate");
        assert_eq!(asked, 1);
        assert_eq!(report.completed_batches, vec![1, 2]);
        let state = context.checkpoints.load("en").expect("checkpoint");
        assert_eq!(state.completed_batches.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn resumed_numbering_skips_completed_batch_numbers() {
        let fixture = Fixture::new(json!({"a": "bir"}));
        let mut context = fixture.context(1, false);
        let mut prior = CheckpointState::new("en", &fixture.job.source, &fixture.job.target, "tr-en");
        prior.mark_completed(3);
        context.checkpoints.save(&mut prior).expect("save");
        let report = context
            .translate_language(&fixture.job, &mut resume)
            .await
            .expect("translate");
        assert_eq!(report.completed_batches, vec![4]);
    }

    #[tokio::test]
    async fn interrupted_run_saves_checkpoint_without_partial_batch() {
        let fixture = Fixture::new(json!({"a": "bir", "b": "iki"}));
        let engine = TranslationEngine::new(vec![Box::new(Upper)], Duration::from_secs(5));
        let (handle, interrupt) = interrupt_channel();
        let mut context = RunContext::new(
            engine,
            BatchStore::new(fixture.dir.path().join("batches")),
            CheckpointStore::new(fixture.dir.path()),
            RunOptions {
                batch_size: 1,
                keep_failed_source: false,
            },
            interrupt,
        );
        handle.trigger();
        let report = context
            .translate_language(&fixture.job, &mut resume)
            .await
            .expect("translate");
        assert!(report.interrupted);
        assert!(!report.success());
        assert!(context.batches.list("en").expect("list").is_empty());

        let summary = context
            .run(std::slice::from_ref(&fixture.job), Mode::Translate, &mut resume)
            .await;
        assert!(summary.interrupted);
        assert!(summary.jobs.is_empty());
        let state = context.checkpoints.load("en").expect("checkpoint");
        assert_eq!(state.total_batches, 2);
        assert!(state.completed_batches.is_empty());
        assert!(!fixture.job.target.exists());
    }

    #[tokio::test]
    async fn interrupt_while_deciding_keeps_the_checkpoint() {
        let fixture = Fixture::new(json!({"a": "bir", "b": "iki"}));
        let engine = TranslationEngine::new(vec![Box::new(Upper)], Duration::from_secs(5));
        let (handle, interrupt) = interrupt_channel();
        let mut context = RunContext::new(
            engine,
            BatchStore::new(fixture.dir.path().join("batches")),
            CheckpointStore::new(fixture.dir.path()),
            RunOptions {
                batch_size: 1,
                keep_failed_source: false,
            },
            interrupt,
        );
        let mut prior = CheckpointState::new("en", &fixture.job.source, &fixture.job.target, "tr-en");
        prior.mark_completed(4);
        context.checkpoints.save(&mut prior).expect("save");

        let mut restart_after_signal = |_: &CheckpointState| {
            handle.trigger();
            ResumeChoice::Restart
        };
        let report = context
            .translate_language(&fixture.job, &mut restart_after_signal)
            .await
            .expect("translate");
        assert!(report.interrupted);
        assert!(report.completed_batches.is_empty());
        assert!(context.batches.list("en").expect("list").is_empty());
        let state = context.checkpoints.load("en").expect("checkpoint");
        assert_eq!(state.completed_batches.iter().copied().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn jobs_come_from_language_settings() {
        let mut settings = Settings::default();
        settings.languages.insert(
            "sr".to_string(),
            crate::settings::LanguageSettings {
                pair: Some("en-sr".to_string()),
                source: None,
                target: Some("out/sr.json".to_string()),
                transliterate: Some("sr-latin".to_string()),
            },
        );
        let job = LanguageJob::from_settings("sr", &settings).expect("job");
        assert_eq!(job.pair, LanguagePair::new("en", "sr"));
        assert_eq!(job.source, PathBuf::from("messages/en.json"));
        assert_eq!(job.target, PathBuf::from("out/sr.json"));
        assert_eq!(job.transliterate, Some(Script::SerbianLatin));
        assert!(LanguageJob::from_settings("xx", &settings).is_err());
    }
}
