use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

pub const COUNTER_USER: &str = "user";
pub const COUNTER_PHOTO: &str = "photo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCode {
    /// An alias was resolved to a stable id.
    UidFound,
    /// The alias on record no longer matches the remote profile.
    TokenUpdated,
    /// The alias is unknown to the remote system.
    TokenNotFound,
    /// The stable id is unknown to the remote system.
    UidNotFound,
    /// A listed item disappeared before its detail could be fetched.
    ItemNotFound,
    /// A seed with neither alias nor stable id.
    InvalidSeed,
    /// The remote API answered with an error.
    UnknownError,
    /// The remote API answered with a payload missing required fields.
    MalformedResponse,
    /// The wire trace of a call could not be turned into archive records.
    CaptureFailed,
}

impl MessageCode {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageCode::UidFound => "uid_found",
            MessageCode::TokenUpdated => "token_updated",
            MessageCode::TokenNotFound => "token_not_found",
            MessageCode::UidNotFound => "uid_not_found",
            MessageCode::ItemNotFound => "item_not_found",
            MessageCode::InvalidSeed => "invalid_seed",
            MessageCode::UnknownError => "unknown_error",
            MessageCode::MalformedResponse => "malformed_response",
            MessageCode::CaptureFailed => "capture_failed",
        }
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub code: MessageCode,
    pub message: String,
    /// Local id of the seed the message is about, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_id: Option<String>,
}

/// Aggregated result of a harvest, built per item or seed and merged upwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub infos: Vec<Message>,
    pub warnings: Vec<Message>,
    pub errors: Vec<Message>,
    /// Discovered urls in discovery order. May hold duplicates; see
    /// [`Outcome::deduped_urls`].
    pub urls: Vec<String>,
    pub counters: BTreeMap<String, u64>,
    /// Stable ids discovered for seeds that only had an alias.
    pub uids: BTreeMap<String, String>,
    /// New aliases for seeds whose alias changed remotely.
    pub alias_updates: BTreeMap<String, String>,
}

impl Default for Outcome {
    fn default() -> Self {
        Self {
            success: true,
            infos: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            urls: Vec::new(),
            counters: BTreeMap::new(),
            uids: BTreeMap::new(),
            alias_updates: BTreeMap::new(),
        }
    }
}

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `other` into `self`. Lists keep their order with `other`'s
    /// entries after `self`'s; counters add up.
    pub fn merge(&mut self, other: Outcome) {
        self.success = self.success && other.success;
        self.infos.extend(other.infos);
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
        self.urls.extend(other.urls);
        for (category, count) in other.counters {
            *self.counters.entry(category).or_insert(0) += count;
        }
        self.uids.extend(other.uids);
        self.alias_updates.extend(other.alias_updates);
    }

    pub fn merged(mut self, other: Outcome) -> Outcome {
        self.merge(other);
        self
    }

    pub fn increment_counter(&mut self, category: &str) {
        *self.counters.entry(category.to_string()).or_insert(0) += 1;
    }

    pub fn counter(&self, category: &str) -> u64 {
        self.counters.get(category).copied().unwrap_or(0)
    }

    /// Records a message. Error severity marks the outcome failed.
    pub fn append_message(&mut self, severity: Severity, code: MessageCode, text: impl Into<String>) {
        self.push(severity, code, text.into(), None);
    }

    pub fn append_seed_message(
        &mut self,
        severity: Severity,
        code: MessageCode,
        seed_id: &str,
        text: impl Into<String>,
    ) {
        self.push(severity, code, text.into(), Some(seed_id.to_string()));
    }

    fn push(&mut self, severity: Severity, code: MessageCode, message: String, seed_id: Option<String>) {
        let message = Message {
            code,
            message,
            seed_id,
        };
        match severity {
            Severity::Info => self.infos.push(message),
            Severity::Warning => self.warnings.push(message),
            Severity::Error => {
                self.errors.push(message);
                self.success = false;
            }
        }
    }

    pub fn record_uid(&mut self, seed_id: &str, stable_id: &str) {
        self.uids.insert(seed_id.to_string(), stable_id.to_string());
        self.append_seed_message(
            Severity::Info,
            MessageCode::UidFound,
            seed_id,
            format!("Stable id {stable_id} found for seed {seed_id}"),
        );
    }

    pub fn record_alias_update(&mut self, seed_id: &str, alias: &str) {
        self.alias_updates.insert(seed_id.to_string(), alias.to_string());
        self.append_seed_message(
            Severity::Info,
            MessageCode::TokenUpdated,
            seed_id,
            format!("Alias for seed {seed_id} is now {alias}"),
        );
    }

    pub fn add_url(&mut self, url: impl Into<String>) {
        self.urls.push(url.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Urls with duplicates removed, first occurrence wins.
    pub fn deduped_urls(&self) -> Vec<String> {
        let mut seen = HashSet::with_capacity(self.urls.len());
        self.urls
            .iter()
            .filter(|url| seen.insert(url.as_str()))
            .cloned()
            .collect()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Harvest outcome is {}.", self.success)?;
        write_messages(f, "Informational", &self.infos)?;
        write_messages(f, "Warning", &self.warnings)?;
        write_messages(f, "Error", &self.errors)?;
        if !self.urls.is_empty() {
            write!(f, " Urls: {}.", self.urls.len())?;
        }
        if !self.counters.is_empty() {
            let summary: Vec<String> = self
                .counters
                .iter()
                .map(|(category, count)| format!("{category}={count}"))
                .collect();
            write!(f, " Summary: {}.", summary.join(", "))?;
        }
        Ok(())
    }
}

fn write_messages(f: &mut fmt::Formatter<'_>, name: &str, messages: &[Message]) -> fmt::Result {
    if messages.is_empty() {
        return Ok(());
    }
    write!(f, " {name} messages are:")?;
    for (i, msg) in messages.iter().enumerate() {
        write!(f, " ({}) [{}] {}", i + 1, msg.code, msg.message)?;
    }
    Ok(())
}
