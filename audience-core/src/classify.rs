//! Platform detection from OCR text.
//!
//! Rules are evaluated top to bottom and the first match wins. The keyword sets overlap
//! (TikTok and Instagram headers both say "followers"), so the table order is part of
//! the behaviour.

use crate::models::Platform;

type Rule = (fn(&str) -> bool, Platform);

const RULES: &[Rule] = &[
    (is_tiktok, Platform::TikTok),
    (is_instagram, Platform::Instagram),
    (is_threads, Platform::Threads),
    (is_twitter, Platform::Twitter),
];

fn is_tiktok(text: &str) -> bool {
    text.contains("followers") && (text.contains("likes") || text.contains("following"))
}

fn is_instagram(text: &str) -> bool {
    text.contains("publications") && text.contains("followers")
}

fn is_threads(text: &str) -> bool {
    text.contains("threads") || text.contains("quoi de neuf")
}

fn is_twitter(text: &str) -> bool {
    (text.contains("abonnements") || text.contains("abonnés")) && text.contains("rejoint")
}

pub fn classify(text: &str) -> Platform {
    let folded = text.to_lowercase();
    RULES
        .iter()
        .find(|(matches, _)| matches(&folded))
        .map(|(_, platform)| *platform)
        .unwrap_or(Platform::Unknown)
}
