//! Handle and follower-count extraction from OCR text.
//!
//! Extraction is handle-first: every `@handle` opens a window of up to 200 characters,
//! closed early by the next handle, and the follower count is the first number in that window carrying a unit or label
//! (`k`, `m`, `followers`, `abonnés`). OCR often splits a profile header over several
//! lines, and comparison screenshots stack several profiles, so the count is searched
//! near its handle rather than on the same line.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::classify::classify;
use crate::models::{Platform, UNPARSED_FOLLOWERS};

/// Characters scanned after the start of a handle when looking for its follower count.
pub const WINDOW_CHARS: usize = 200;

// --- Compiled regexes ---

// `@` not glued to a preceding word (skips e-mail addresses); a handle never ends on a dot.
static HANDLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^\w@])(?P<handle>@[\w.]*\w)").unwrap()
});

// Runs on case-folded text. Group separators: space, no-break space, narrow no-break space.
static COUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:^|[^\w.,])(?P<number>\d{1,3}(?:[ \x{A0}\x{202F}]\d{3})+(?:[.,]\d+)?|\d+(?:[.,]\d+)?)\s*(?P<unit>followers|abonnés|abonnes|k|m)(?:$|[^\w])",
    )
    .unwrap()
});

/// One handle found in the text, with the slice of text following it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleMatch {
    pub handle: String,
    pub window: String,
}

/// Everything read from one OCR text before any number is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExtraction {
    pub platform_hint: Platform,
    pub handle_matches: Vec<HandleMatch>,
}

/// An account and its follower count, `UNPARSED_FOLLOWERS` when none could be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMatch {
    pub account: String,
    pub followers: i64,
}

impl AccountMatch {
    pub fn is_parsed(&self) -> bool {
        self.followers != UNPARSED_FOLLOWERS
    }
}

pub fn scan(text: &str) -> RawExtraction {
    let handles: Vec<regex::Match> = HANDLE_RE
        .captures_iter(text)
        .filter_map(|caps| caps.name("handle"))
        .collect();

    // A window stops at the next handle so one profile never borrows another's count.
    let handle_matches = handles
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let end = handles.get(i + 1).map_or(text.len(), |next| next.start());
            HandleMatch {
                handle: m.as_str().to_string(),
                window: text[m.start()..end].chars().take(WINDOW_CHARS).collect(),
            }
        })
        .collect();

    RawExtraction {
        platform_hint: classify(text),
        handle_matches,
    }
}

/// Extract every distinct handle with its follower count, in order of first appearance.
///
/// A handle seen several times keeps its first readable count. Handles without a
/// readable count are kept with `UNPARSED_FOLLOWERS` so the caller can skip them.
pub fn extract_all(text: &str) -> Vec<AccountMatch> {
    let mut accounts: Vec<AccountMatch> = Vec::new();

    for handle_match in scan(text).handle_matches {
        let followers = follower_count_near(&handle_match).unwrap_or(UNPARSED_FOLLOWERS);

        match accounts.iter_mut().find(|a| a.account == handle_match.handle) {
            Some(existing) => {
                if !existing.is_parsed() {
                    existing.followers = followers;
                }
            }
            None => accounts.push(AccountMatch {
                account: handle_match.handle,
                followers,
            }),
        }
    }

    accounts
}

fn follower_count_near(handle_match: &HandleMatch) -> Option<i64> {
    let after_handle: String = handle_match
        .window
        .chars()
        .skip(handle_match.handle.chars().count())
        .collect::<String>()
        .to_lowercase();

    let caps = COUNT_RE.captures(&after_handle)?;
    parse_follower_count(caps.name("number")?.as_str(), caps.name("unit")?.as_str())
}

/// Turn a number and the token that followed it into a follower count.
///
/// With `k`/`m` the separator is always decimal (`12,5k` is 12 500). With a label,
/// a separator followed by exactly three digits groups thousands (`1,234 followers`),
/// anything else is decimal.
pub fn parse_follower_count(number: &str, unit: &str) -> Option<i64> {
    let compact: String = number
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{A0}' && *c != '\u{202F}')
        .collect();

    let multiplier = match unit {
        "k" => 1_000.0,
        "m" => 1_000_000.0,
        _ => 1.0,
    };

    let decimal = match compact.rfind([',', '.']) {
        Some(idx) if multiplier == 1.0 && compact.len() - idx - 1 == 3 => {
            compact.replace([',', '.'], "")
        }
        _ => compact.replace(',', "."),
    };

    let value = decimal.parse::<f64>().ok()? * multiplier;
    if !value.is_finite() || value < 0.0 || value >= i64::MAX as f64 {
        return None;
    }
    Some(value.round() as i64)
}
