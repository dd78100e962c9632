//! Ordered fallback over translation backends.
//!
//! Each string is protected once, then offered to the backends in order.
//! A backend call runs under the engine's time budget; a timeout, an error
//! or an answer that lost placeholder tokens moves on to the next backend.
//! When every backend fails the original text comes back marked as failed.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::backends::Backend;
use crate::error::BackendError;
use crate::language::LanguagePair;
use crate::placeholder::{self, PlaceholderMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationSource {
    Backend(String),
    Cache,
    Unchanged,
    Failed,
}

impl TranslationSource {
    pub fn label(&self) -> &str {
        match self {
            TranslationSource::Backend(name) => name,
            TranslationSource::Cache => "cache",
            TranslationSource::Unchanged => "skipped",
            TranslationSource::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub text: String,
    pub source: TranslationSource,
}

impl Translation {
    pub fn is_failed(&self) -> bool {
        self.source == TranslationSource::Failed
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendStats {
    pub name: String,
    pub success: usize,
    pub failed: usize,
    pub timeout: usize,
    pub total_time: Duration,
}

impl BackendStats {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn average_time(&self) -> Duration {
        if self.success == 0 {
            Duration::ZERO
        } else {
            self.total_time / self.success as u32
        }
    }
}

impl fmt::Display for BackendStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<12} ok={:<6} failed={:<4} timeout={:<4} avg={:.2}s",
            self.name,
            self.success,
            self.failed,
            self.timeout,
            self.average_time().as_secs_f32()
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineTotals {
    pub translated: usize,
    pub cache_hits: usize,
    pub unchanged: usize,
    pub failed: usize,
}

type CacheKey = (String, String);

pub struct TranslationEngine {
    backends: Vec<Box<dyn Backend>>,
    timeout: Duration,
    cache: HashMap<CacheKey, String>,
    stats: Vec<BackendStats>,
    totals: EngineTotals,
}

impl TranslationEngine {
    pub fn new(backends: Vec<Box<dyn Backend>>, timeout: Duration) -> Self {
        let stats = backends
            .iter()
            .map(|backend| BackendStats::new(backend.name()))
            .collect();
        Self {
            backends,
            timeout,
            cache: HashMap::new(),
            stats,
            totals: EngineTotals::default(),
        }
    }

    /// Per chain slot, in chain order.
    pub fn stats(&self) -> &[BackendStats] {
        &self.stats
    }

    pub fn totals(&self) -> EngineTotals {
        self.totals
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Translates one string. Never fails: exhausting the chain yields the
    /// original text with [`TranslationSource::Failed`].
    pub async fn translate(&mut self, text: &str, pair: &LanguagePair) -> Translation {
        if text.trim().is_empty() {
            self.totals.unchanged += 1;
            return unchanged(text);
        }
        let (protected, map) = placeholder::protect(text);
        if !placeholder::has_translatable_content(&protected, &map) {
            self.totals.unchanged += 1;
            return unchanged(text);
        }

        let key = (protected, pair.id());
        if let Some(cached) = self.cache.get(&key) {
            self.totals.cache_hits += 1;
            return Translation {
                text: placeholder::restore(cached, &map),
                source: TranslationSource::Cache,
            };
        }
        let protected = &key.0;

        for (slot, backend) in self.backends.iter().enumerate() {
            let started = Instant::now();
            let outcome =
                match tokio::time::timeout(self.timeout, backend.translate(protected, pair)).await {
                    Ok(result) => result.and_then(|output| check_tokens(output, &map)),
                    Err(_) => Err(BackendError::Timeout(self.timeout)),
                };
            let stats = &mut self.stats[slot];
            match outcome {
                Ok(output) => {
                    stats.success += 1;
                    stats.total_time += started.elapsed();
                    self.totals.translated += 1;
                    let restored = placeholder::restore(&output, &map);
                    let name = backend.name().to_string();
                    self.cache.insert(key, output);
                    return Translation {
                        text: restored,
                        source: TranslationSource::Backend(name),
                    };
                }
                Err(err) => {
                    if err.is_timeout() {
                        stats.timeout += 1;
                    } else {
                        stats.failed += 1;
                    }
                    debug!("{} failed for {:?}: {}", backend.name(), preview(text), err);
                }
            }
        }

        self.totals.failed += 1;
        warn!("all backends failed for {:?}", preview(text));
        Translation {
            text: text.to_string(),
            source: TranslationSource::Failed,
        }
    }

    /// Records an existing translation so identical source strings reuse it.
    /// Returns false when the pair cannot be aligned placeholder for
    /// placeholder, or the source text is already cached.
    pub fn seed(&mut self, source: &str, translated: &str, pair: &LanguagePair) -> bool {
        if source.trim().is_empty() || translated.trim().is_empty() || translated == source {
            return false;
        }
        let (protected_source, source_map) = placeholder::protect(source);
        if !placeholder::has_translatable_content(&protected_source, &source_map) {
            return false;
        }
        let key = (protected_source, pair.id());
        if self.cache.contains_key(&key) {
            return false;
        }
        let (protected_translation, translation_map) = placeholder::protect(translated);
        if translation_map.len() != source_map.len() {
            return false;
        }
        let Some(rewritten) =
            placeholder::retokenize(&protected_translation, &translation_map, &source_map)
        else {
            return false;
        };
        self.cache.insert(key, rewritten);
        true
    }
}

fn unchanged(text: &str) -> Translation {
    Translation {
        text: text.to_string(),
        source: TranslationSource::Unchanged,
    }
}

fn check_tokens(output: String, map: &PlaceholderMap) -> Result<String, BackendError> {
    if output.trim().is_empty() {
        return Err(BackendError::failed("empty translation"));
    }
    let missing = map.missing_tokens(&output);
    if missing.is_empty() {
        Ok(output)
    } else {
        Err(BackendError::failed(format!(
            "placeholder tokens lost: {}",
            missing.join(", ")
        )))
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 50;
    if text.chars().count() <= MAX {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::BackendFuture;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Prefix(&'static str),
        Fail,
        Hang,
        DropTokens,
    }

    struct Stub {
        name: &'static str,
        behavior: Behavior,
        calls: Arc<AtomicUsize>,
    }

    impl Stub {
        fn boxed(name: &'static str, behavior: Behavior) -> (Box<dyn Backend>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let stub = Stub {
                name,
                behavior,
                calls: calls.clone(),
            };
            (Box::new(stub), calls)
        }
    }

    impl Backend for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn translate<'a>(&'a self, text: &'a str, _pair: &'a LanguagePair) -> BackendFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                match self.behavior {
                    Behavior::Prefix(prefix) => Ok(format!("{}{}", prefix, text)),
                    Behavior::Fail => Err(BackendError::failed("boom")),
                    Behavior::Hang => {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(text.to_string())
                    }
                    Behavior::DropTokens => Ok("nothing left".to_string()),
                }
            })
        }
    }

    fn pair() -> LanguagePair {
        LanguagePair::new("tr", "en")
    }

    #[tokio::test]
    async fn first_success_wins_and_restores_placeholders() {
        let (first, first_calls) = Stub::boxed("first", Behavior::Prefix("EN "));
        let (second, second_calls) = Stub::boxed("second", Behavior::Prefix("X "));
        let mut engine = TranslationEngine::new(vec![first, second], Duration::from_secs(5));
        let out = engine.translate("merhaba {{name}}", &pair()).await;
        assert_eq!(out.text, "EN merhaba {{name}}");
        assert_eq!(out.source, TranslationSource::Backend("first".to_string()));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.stats()[0].success, 1);
    }

    #[tokio::test]
    async fn timeout_falls_through_to_next_backend() {
        let (slow, _) = Stub::boxed("slow", Behavior::Hang);
        let (fast, _) = Stub::boxed("fast", Behavior::Prefix("ok: "));
        let mut engine = TranslationEngine::new(vec![slow, fast], Duration::from_millis(50));
        let out = engine.translate("selam", &pair()).await;
        assert_eq!(out.text, "ok: selam");
        assert_eq!(out.source.label(), "fast");
        assert_eq!(engine.stats()[0].timeout, 1);
        assert_eq!(engine.stats()[0].failed, 0);
        assert_eq!(engine.stats()[1].success, 1);
    }

    #[tokio::test]
    async fn exhausted_chain_returns_original_text() {
        let (broken, _) = Stub::boxed("broken", Behavior::Fail);
        let (lossy, _) = Stub::boxed("lossy", Behavior::DropTokens);
        let mut engine = TranslationEngine::new(vec![broken, lossy], Duration::from_secs(5));
        let out = engine.translate("kalan {count} gün", &pair()).await;
        assert!(out.is_failed());
        assert_eq!(out.text, "kalan {count} gün");
        assert_eq!(engine.stats()[0].failed, 1);
        assert_eq!(engine.stats()[1].failed, 1);
        assert_eq!(engine.totals().failed, 1);
        assert_eq!(engine.cache_len(), 0);
    }

    #[tokio::test]
    async fn blank_and_placeholder_only_text_skip_backends() {
        let (backend, calls) = Stub::boxed("only", Behavior::Prefix("EN "));
        let mut engine = TranslationEngine::new(vec![backend], Duration::from_secs(5));
        for text in ["", "   ", "{{count}}", "%s / %d", "<br/>", "2024"] {
            let out = engine.translate(text, &pair()).await;
            assert_eq!(out.text, text);
            assert_eq!(out.source, TranslationSource::Unchanged);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cache_reuses_protected_translations() {
        let (backend, calls) = Stub::boxed("only", Behavior::Prefix("EN "));
        let mut engine = TranslationEngine::new(vec![backend], Duration::from_secs(5));
        let first = engine.translate("hoş geldin {user}", &pair()).await;
        let second = engine.translate("hoş geldin {guest}", &pair()).await;
        assert_eq!(first.text, "EN hoş geldin {user}");
        assert_eq!(second.text, "EN hoş geldin {guest}");
        assert_eq!(second.source, TranslationSource::Cache);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let other_pair = LanguagePair::new("tr", "de");
        let third = engine.translate("hoş geldin {user}", &other_pair).await;
        assert_eq!(third.source.label(), "only");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn seeded_translations_skip_backends() {
        let (backend, calls) = Stub::boxed("only", Behavior::Prefix("EN "));
        let mut engine = TranslationEngine::new(vec![backend], Duration::from_secs(5));
        assert!(engine.seed("{a} ile {b}", "{b} and {a}", &pair()));
        assert!(!engine.seed("{a} ile {b}", "{b} und {a}", &pair()));
        assert!(!engine.seed("{x} kaldı", "left", &pair()));

        let out = engine.translate("{c} ile {d}", &pair()).await;
        assert_eq!(out.text, "{d} and {c}");
        assert_eq!(out.source, TranslationSource::Cache);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn untranslated_artifact_values_are_not_seeded() {
        let (backend, calls) = Stub::boxed("only", Behavior::Prefix("EN "));
        let mut engine = TranslationEngine::new(vec![backend], Duration::from_secs(5));
        assert!(!engine.seed("kaydet", "kaydet", &pair()));
        assert_eq!(engine.cache_len(), 0);

        let out = engine.translate("kaydet", &pair()).await;
        assert_eq!(out.text, "EN kaydet");
        assert_eq!(out.source.label(), "only");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
