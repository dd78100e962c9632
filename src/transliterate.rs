use anyhow::{Result, anyhow};
use serde_json::Value;
use std::str::FromStr;

/// Output scripts a language can be post-filtered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    SerbianLatin,
}

impl Script {
    pub fn as_str(self) -> &'static str {
        match self {
            Script::SerbianLatin => "sr-latin",
        }
    }

    pub fn apply(self, text: &str) -> String {
        match self {
            Script::SerbianLatin => to_serbian_latin(text),
        }
    }
}

impl FromStr for Script {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sr-latin" | "sr-latn" | "serbian-latin" => Ok(Script::SerbianLatin),
            other => Err(anyhow!(
                "unknown transliteration '{}' (expected sr-latin)",
                other
            )),
        }
    }
}

fn serbian_latin(ch: char) -> Option<&'static str> {
    let mapped = match ch {
        'А' => "A",
        'Б' => "B",
        'В' => "V",
        'Г' => "G",
        'Д' => "D",
        'Ђ' => "Đ",
        'Е' => "E",
        'Ж' => "Ž",
        'З' => "Z",
        'И' => "I",
        'Ј' => "J",
        'К' => "K",
        'Л' => "L",
        'Љ' => "Lj",
        'М' => "M",
        'Н' => "N",
        'Њ' => "Nj",
        'О' => "O",
        'П' => "P",
        'Р' => "R",
        'С' => "S",
        'Т' => "T",
        'Ћ' => "Ć",
        'У' => "U",
        'Ф' => "F",
        'Х' => "H",
        'Ц' => "C",
        'Ч' => "Č",
        'Џ' => "Dž",
        'Ш' => "Š",
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'д' => "d",
        'ђ' => "đ",
        'е' => "e",
        'ж' => "ž",
        'з' => "z",
        'и' => "i",
        'ј' => "j",
        'к' => "k",
        'л' => "l",
        'љ' => "lj",
        'м' => "m",
        'н' => "n",
        'њ' => "nj",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'ћ' => "ć",
        'у' => "u",
        'ф' => "f",
        'х' => "h",
        'ц' => "c",
        'ч' => "č",
        'џ' => "dž",
        'ш' => "š",
        _ => return None,
    };
    Some(mapped)
}

pub fn to_serbian_latin(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match serbian_latin(ch) {
            Some(latin) => out.push_str(latin),
            None => out.push(ch),
        }
    }
    out
}

pub fn contains_cyrillic(text: &str) -> bool {
    text.chars().any(|ch| ('\u{0400}'..='\u{04FF}').contains(&ch))
}

/// Rewrites every string leaf in place. Returns how many leaves changed.
pub fn transliterate_tree(tree: &mut Value, script: Script) -> usize {
    let mut changed = 0;
    let mut stack = vec![tree];
    while let Some(node) = stack.pop() {
        match node {
            Value::String(text) => {
                if contains_cyrillic(text) {
                    let converted = script.apply(text);
                    if converted != *text {
                        *text = converted;
                        changed += 1;
                    }
                }
            }
            Value::Array(items) => stack.extend(items.iter_mut()),
            Value::Object(map) => stack.extend(map.values_mut()),
            _ => {}
        }
    }
    changed
}
