//! Keeps placeholders and markup away from translation backends.
//!
//! `protect` swaps every protected substring for an ordinal token such as
//! `__PH_0__`; `restore` swaps the tokens back. The marker inside the
//! token is chosen per string so that it never occurs in the input, which
//! keeps `restore(protect(x)) == x` for every `x`.

use regex::Regex;
use std::sync::OnceLock;

const DEFAULT_MARKER: &str = "PH";

fn placeholder_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(concat!(
            r"\{\{.*?\}\}",
            r"|%\{.*?\}",
            r"|%\w",
            r"|\{[0-9]+\}",
            r"|\{[A-Za-z_][A-Za-z0-9_]*\}",
            r"|</?[A-Za-z][^<>]*>",
        ))
        .expect("placeholder pattern is valid")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderMap {
    marker: String,
    originals: Vec<String>,
}

impl PlaceholderMap {
    fn new(marker: String) -> Self {
        Self {
            marker,
            originals: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.originals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }

    pub fn token(&self, index: usize) -> String {
        format!("__{}_{}__", self.marker, index)
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        let index = self.parse_token(token)?;
        self.originals.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (String, &str)> + '_ {
        self.originals
            .iter()
            .enumerate()
            .map(|(index, original)| (self.token(index), original.as_str()))
    }

    /// Tokens that do not appear in `text`, typically dropped by a backend.
    pub fn missing_tokens(&self, text: &str) -> Vec<String> {
        (0..self.originals.len())
            .map(|index| self.token(index))
            .filter(|token| !text.contains(token.as_str()))
            .collect()
    }

    fn prefix(&self) -> String {
        format!("__{}_", self.marker)
    }

    fn parse_token(&self, token: &str) -> Option<usize> {
        let digits = token.strip_prefix(&self.prefix())?.strip_suffix("__")?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    fn push(&mut self, original: &str) -> String {
        let token = self.token(self.originals.len());
        self.originals.push(original.to_string());
        token
    }
}

pub fn protect(text: &str) -> (String, PlaceholderMap) {
    let mut map = PlaceholderMap::new(pick_marker(text));
    let protected = placeholder_regex()
        .replace_all(text, |caps: &regex::Captures<'_>| map.push(&caps[0]))
        .into_owned();
    (protected, map)
}

pub fn restore(text: &str, map: &PlaceholderMap) -> String {
    if map.is_empty() {
        return text.to_string();
    }
    let prefix = map.prefix();
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(&prefix) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + prefix.len()..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 && after[digits..].starts_with("__") {
            let original = after[..digits]
                .parse::<usize>()
                .ok()
                .and_then(|index| map.originals.get(index));
            if let Some(original) = original {
                out.push_str(original);
                rest = &after[digits + 2..];
                continue;
            }
        }
        out.push_str(&prefix);
        rest = after;
    }
    out.push_str(rest);
    out
}

/// True when `protected` has something left to translate once its tokens
/// are removed, i.e. at least one alphabetic character.
pub fn has_translatable_content(protected: &str, map: &PlaceholderMap) -> bool {
    let mut remainder = protected.to_string();
    for (token, _) in map.iter() {
        remainder = remainder.replace(&token, " ");
    }
    remainder.chars().any(char::is_alphabetic)
}

/// Rewrites the tokens of `map` inside `text` into the tokens of `target`,
/// pairing them by the substring they stand for. Returns `None` when a
/// protected substring of `map` has no counterpart left in `target`.
pub(crate) fn retokenize(
    text: &str,
    map: &PlaceholderMap,
    target: &PlaceholderMap,
) -> Option<String> {
    let mut used = vec![false; target.originals.len()];
    let mut replacements = Vec::with_capacity(map.originals.len());
    for original in &map.originals {
        let index = target
            .originals
            .iter()
            .enumerate()
            .position(|(index, candidate)| !used[index] && candidate == original)?;
        used[index] = true;
        replacements.push(target.token(index));
    }
    let bridge = PlaceholderMap {
        marker: map.marker.clone(),
        originals: replacements,
    };
    Some(restore(text, &bridge))
}

fn pick_marker(text: &str) -> String {
    if !text.contains(DEFAULT_MARKER) {
        return DEFAULT_MARKER.to_string();
    }
    (0usize..)
        .map(|n| format!("{}{}", DEFAULT_MARKER, n))
        .find(|marker| !text.contains(marker.as_str()))
        .unwrap_or_else(|| DEFAULT_MARKER.to_string())
}
