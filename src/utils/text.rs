// src/utils/text.rs

//! Text normalization and tokenization.
//!
//! One normalization pass feeds both the content fingerprint and the
//! similarity index, so the two always agree on what "the same text" means.

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{AppError, Result};

/// Compile boilerplate patterns from configuration.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| AppError::config(format!("bad boilerplate pattern '{p}': {e}")))
        })
        .collect()
}

/// Clean extracted body text for storage and display.
///
/// Collapses runs of spaces, converts carriage returns to newlines, and
/// squeezes blank-line runs, without changing case or wording.
pub fn clean_body(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_newlines = 0usize;
    for raw_line in text.replace('\r', "\n").lines() {
        let line = raw_line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            pending_newlines += 1;
            continue;
        }
        if !out.is_empty() {
            // At most one blank line survives between paragraphs
            out.push('\n');
            if pending_newlines > 1 {
                out.push('\n');
            }
        }
        pending_newlines = 0;
        out.push_str(&line);
    }
    out.trim().to_string()
}

/// Normalize body text for fingerprinting and indexing.
///
/// Lowercases, strips configured boilerplate patterns, and collapses all
/// whitespace runs to single spaces. Deterministic: equal inputs always
/// produce equal outputs.
pub fn normalize(text: &str, boilerplate: &[Regex]) -> String {
    let mut s = text.to_lowercase();
    for pattern in boilerplate {
        s = pattern.replace_all(&s, " ").into_owned();
    }
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Tokenize normalized text into index terms.
///
/// Unicode-aware word segmentation, minimum length filter, stopword filter.
pub fn tokenize(text: &str, min_token_length: usize) -> Vec<String> {
    text.unicode_words()
        .filter(|word| word.chars().count() >= min_token_length)
        .filter(|word| !is_stopword(word))
        .map(String::from)
        .collect()
}

/// Check if a word is a common stopword (Russian/English).
fn is_stopword(word: &str) -> bool {
    const STOPWORDS: &[&str] = &[
        // Russian particles and prepositions
        "и", "в", "во", "не", "на", "что", "он", "она", "они", "это", "как", "из", "за", "по",
        "от", "до", "для", "при", "или", "его", "ее", "их", "так", "также", "был", "была", "были",
        // English common words
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
        "do", "does", "did", "will", "would", "could", "should", "may", "might", "can", "must",
        "shall", "of", "to", "in", "for", "on", "with", "at", "by", "from", "as", "or", "and",
        "but", "if", "then", "so", "than", // Common URL/HTML artifacts
        "http", "https", "www", "com", "kz", "html", "php",
    ];
    STOPWORDS.contains(&word)
}
