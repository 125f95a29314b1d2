//! Who a screenshot belongs to.
//!
//! Screenshots are posted into per-assistant forum topics named like `SUIVI Lea`.
//! The identity is only readable when the photo replies to the topic-creation message;
//! a photo posted inside a topic otherwise carries nothing but the thread id.

use crate::config::IdentityConfig;

/// Where a submitted image came from, as far as identity is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySource<'a> {
    /// Reply to the message that created a topic with this name.
    TopicCreation(&'a str),
    /// Inside a topic whose name is not available.
    Thread(i64),
    /// Anywhere else.
    Unresolved,
}

pub fn resolve_identity(source: IdentitySource<'_>, config: &IdentityConfig) -> String {
    match source {
        IdentitySource::TopicCreation(name) => identity_from_topic_name(Some(name), config),
        IdentitySource::Thread(thread_id) => {
            format!("{} (TopicID: {})", config.unknown_label, thread_id)
        }
        IdentitySource::Unresolved => config.unknown_label.clone(),
    }
}

/// Strip the first matching prefix from a topic name.
///
/// The whole name is kept when no prefix matches or nothing is left after stripping.
pub fn identity_from_topic_name(topic_name: Option<&str>, config: &IdentityConfig) -> String {
    let name = match topic_name {
        Some(n) if !n.is_empty() => n,
        _ => return config.unknown_label.clone(),
    };

    config
        .topic_prefixes
        .iter()
        .filter_map(|prefix| name.strip_prefix(prefix.as_str()))
        .map(str::trim)
        .find(|rest| !rest.is_empty())
        .unwrap_or(name)
        .to_string()
}
