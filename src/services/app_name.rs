//! Platform app names for preview deployments.
//!
//! Names share one global namespace on the platform, so callers check every
//! candidate against live rows (and the platform) before using it.

use lazy_static::lazy_static;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;

pub const MAX_APP_NAME_LEN: usize = 63;
pub const MAX_NAME_ATTEMPTS: usize = 5;
const FALLBACK_PREFIX: &str = "preview";
const SUFFIX_LEN: usize = 6;

lazy_static! {
    static ref INVALID_CHARS: Regex = Regex::new(r"[^a-z0-9-]+").unwrap();
    static ref HYPHEN_RUNS: Regex = Regex::new(r"-{2,}").unwrap();
}

fn slug(input: &str) -> String {
    let lowered = input.to_lowercase();
    let replaced = INVALID_CHARS.replace_all(&lowered, "-");
    let collapsed = HYPHEN_RUNS.replace_all(&replaced, "-");
    collapsed.trim_matches('-').to_string()
}

/// Join `stem` and `tail`, cutting `stem` so the result fits the platform limit.
fn fit(stem: &str, tail: &str) -> String {
    let room = MAX_APP_NAME_LEN.saturating_sub(tail.len());
    let stem: String = stem.chars().take(room).collect();
    let stem = stem.trim_end_matches('-');
    let stem = if stem.is_empty() { FALLBACK_PREFIX } else { stem };
    format!("{}{}", stem, tail)
}

/// `<prefix>-pr-<number>`, sanitized.
pub fn base_name(prefix: &str, pr_number: i32) -> String {
    let prefix = slug(prefix);
    let prefix = if prefix.is_empty() {
        FALLBACK_PREFIX.to_string()
    } else {
        prefix
    };
    fit(&prefix, &format!("-pr-{}", pr_number))
}

pub fn with_random_suffix(base: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    fit(base, &format!("-{}", suffix))
}

/// Names to try in order: the plain name first, then suffixed variants.
pub fn candidates(prefix: &str, pr_number: i32) -> Vec<String> {
    let base = base_name(prefix, pr_number);
    let mut names = Vec::with_capacity(MAX_NAME_ATTEMPTS);
    names.push(base.clone());
    while names.len() < MAX_NAME_ATTEMPTS {
        names.push(with_random_suffix(&base));
    }
    names
}

/// Replacement names after the platform refused the current one.
pub fn suffixed_candidates(prefix: &str, pr_number: i32) -> Vec<String> {
    let base = base_name(prefix, pr_number);
    (0..MAX_NAME_ATTEMPTS)
        .map(|_| with_random_suffix(&base))
        .collect()
}

pub fn is_valid(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_APP_NAME_LEN
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !INVALID_CHARS.is_match(name)
}
