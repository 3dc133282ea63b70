//! Content fingerprints
//!
//! A fingerprint is the SHA-256 of (normalized title, normalized anchor name,
//! canonical date). It is a pure function of its inputs: re-crawling the same
//! page yields the same value, which makes it a safe upsert key within one
//! source and a candidate-duplicate key across sources.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Words that describe the presentation rather than the work itself
const QUALIFIER_WORDS: &[&str] = &["screening", "showing", "presentation", "special"];

/// Leading articles removed before comparison
const LEADING_ARTICLES: &[&str] = &["the", "a", "an"];

static PARENTHETICAL_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*\d{4}\s*\)").expect("static regex"));

/// Deterministic identity value for an event candidate
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a stored fingerprint string
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical date string used in fingerprints (`YYYY-MM-DD`)
pub fn canonical_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Compute the fingerprint of (title, anchor name, canonical date)
pub fn fingerprint(title: &str, anchor_name: &str, canonical_date: &str) -> ContentFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(normalize_title(title).as_bytes());
    hasher.update(b"\x1f");
    hasher.update(normalize_anchor(anchor_name).as_bytes());
    hasher.update(b"\x1f");
    hasher.update(canonical_date.trim().as_bytes());
    ContentFingerprint(format!("{:x}", hasher.finalize()))
}

/// Normalize an event title for identity comparison
///
/// Lowercases, drops parenthetical years like "(1984)", collapses whitespace,
/// strips one leading article and removes qualifier words. A title made only
/// of qualifier words keeps them rather than normalizing to nothing.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let without_years = PARENTHETICAL_YEAR.replace_all(&lowered, " ");
    let mut words: Vec<&str> = without_years.split_whitespace().collect();

    if words.len() > 1 && LEADING_ARTICLES.contains(&words[0]) {
        words.remove(0);
    }

    let kept: Vec<&str> = words
        .iter()
        .copied()
        .filter(|w| !is_qualifier(w))
        .collect();

    if kept.is_empty() {
        words.join(" ")
    } else {
        kept.join(" ")
    }
}

/// Normalize a venue or source display name
pub fn normalize_anchor(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// URL-safe slug: lowercase alphanumerics joined by single hyphens
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn is_qualifier(word: &str) -> bool {
    let bare = word.trim_matches(|c: char| !c.is_alphanumeric());
    QUALIFIER_WORDS.contains(&bare)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint("Live Jazz Night", "Venue V", "2026-03-01");
        let b = fingerprint("Live Jazz Night", "Venue V", "2026-03-01");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_ignores_cosmetic_differences() {
        let a = fingerprint("The  Big Lebowski (1998) Screening", "The Grand", "2026-05-02");
        let b = fingerprint("big lebowski", "the   grand", "2026-05-02");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_distinguishes_inputs() {
        let base = fingerprint("Trivia Night", "Pub", "2026-03-04");
        assert_ne!(base, fingerprint("Trivia Night", "Pub", "2026-03-11"));
        assert_ne!(base, fingerprint("Trivia Night", "Other Pub", "2026-03-04"));
        assert_ne!(base, fingerprint("Quiz Night", "Pub", "2026-03-04"));
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        assert_ne!(fingerprint("ab", "c", "2026-01-01"), fingerprint("a", "bc", "2026-01-01"));
    }

    #[test]
    fn test_normalize_title_rules() {
        assert_eq!(normalize_title("  The   Godfather (1972) "), "godfather");
        assert_eq!(normalize_title("A Special Presentation of Alien"), "of alien");
        assert_eq!(normalize_title("An Evening With Friends"), "evening with friends");
        assert_eq!(normalize_title("Screening: Metropolis"), "metropolis");
        assert_eq!(normalize_title("Live Jazz Night"), "live jazz night");
    }

    #[test]
    fn test_normalize_title_keeps_single_article_word() {
        assert_eq!(normalize_title("The"), "the");
    }

    #[test]
    fn test_qualifier_only_title_is_kept() {
        assert_eq!(normalize_title("Special Screening"), "special screening");
    }

    #[test]
    fn test_non_parenthetical_numbers_are_kept() {
        assert_eq!(normalize_title("Blade Runner 2049"), "blade runner 2049");
        assert_eq!(normalize_title("Party (21+)"), "party (21+)");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Trivia Night!"), "trivia-night");
        assert_eq!(slugify("  Rock & Roll  (Live) "), "rock-roll-live");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn test_canonical_date_format() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(canonical_date(date), "2026-03-01");
    }
}
