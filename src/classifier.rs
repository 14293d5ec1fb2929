//! Relevance labels for catalog genres.
//!
//! All checks run on an upper-cased copy of the genre title. A genre is worth sampling
//! when it carries a German or Austrian region marker or an adult marker;
//! everything else is skipped before any channel listing is requested.

use rand::seq::SliceRandom;
use rand::Rng;

const GERMAN_PREFIXES: &[&str] = &["DE:", "DE ", "|DE|", "DE|", "GERMANY", "ALEMANHA"];
const GERMAN_TOKENS: &[&str] = &["GERMANY", "DEUTSCHLAND"];

const AUSTRIAN_PREFIXES: &[&str] = &["AT:", "AT ", "|AT|", "AT|", "AUSTRIA"];
const AUSTRIAN_TOKENS: &[&str] = &["AUSTRIA", "ÖSTERREICH"];

const ADULT_PREFIXES: &[&str] = &["[XXX]", "XXX"];
const ADULT_TOKENS: &[&str] = &["ADULT", "XXX"];

fn matches(name: &str, prefixes: &[&str], tokens: &[&str]) -> bool {
    let name = name.trim().to_uppercase();
    prefixes.iter().any(|p| name.starts_with(p)) || tokens.iter().any(|t| name.contains(t))
}

pub fn is_german_region(name: &str) -> bool {
    matches(name, GERMAN_PREFIXES, GERMAN_TOKENS)
}

pub fn is_austrian_region(name: &str) -> bool {
    matches(name, AUSTRIAN_PREFIXES, AUSTRIAN_TOKENS)
}

pub fn is_adult_category(name: &str) -> bool {
    matches(name, ADULT_PREFIXES, ADULT_TOKENS)
}

pub fn is_relevant(name: &str) -> bool {
    is_german_region(name) || is_austrian_region(name) || is_adult_category(name)
}

/// Short label for log lines.
pub fn relevance_label(name: &str) -> &'static str {
    if is_german_region(name) {
        "DE"
    } else if is_austrian_region(name) {
        "AT"
    } else if is_adult_category(name) {
        "XXX"
    } else {
        "-"
    }
}

/// Uniformly random picks into a channel list, drawn independently.
/// Lists no longer than `max_samples` are visited once each, in random order.
pub fn sample_indices(len: usize, max_samples: usize) -> Vec<usize> {
    let mut rng = rand::thread_rng();
    if len <= max_samples {
        let mut all: Vec<usize> = (0..len).collect();
        all.shuffle(&mut rng);
        return all;
    }
    (0..max_samples).map(|_| rng.gen_range(0..len)).collect()
}
