//! Candidate content items observed on the platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A piece of observed content the agent may choose to respond to.
///
/// Read-only within a cycle; never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Platform id. Numeric for ids the publish API accepts; external
    /// scrapers may hand over opaque shortcodes instead.
    pub id: String,

    #[serde(default)]
    pub text: String,

    /// Author handle (without `@`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub is_reply: bool,

    /// Parent item id when this item is itself a reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replied_to_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
}

impl CandidateItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            author: None,
            timestamp: Utc::now(),
            is_reply: false,
            replied_to_id: None,
            permalink: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn as_reply_to(mut self, parent_id: impl Into<String>) -> Self {
        self.is_reply = true;
        self.replied_to_id = Some(parent_id.into());
        self
    }

    /// Whether the id looks like a publish-API id rather than a shortcode.
    pub fn has_numeric_id(&self) -> bool {
        !self.id.is_empty() && self.id.chars().all(|c| c.is_ascii_digit())
    }

    /// Memory scope id of the author, if known.
    pub fn participant_id(&self) -> Option<String> {
        self.author
            .as_deref()
            .filter(|a| !a.is_empty())
            .map(|a| format!("participant_{a}"))
    }

    /// Whether the item was written by `username` (case-insensitive).
    pub fn is_authored_by(&self, username: &str) -> bool {
        self.author
            .as_deref()
            .is_some_and(|a| !username.is_empty() && a.eq_ignore_ascii_case(username))
    }
}
