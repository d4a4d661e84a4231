use serde::{Deserialize, Serialize};

pub const DEFAULT_SIZES: [&str; 3] = ["Thumbnail", "Large", "Original"];

/// A single harvest target.
///
/// `alias` is the human-facing name (a username) and `stable_id` the id the
/// remote system never reassigns. A fresh seed carries one of the two; after
/// resolution both are known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed {
    pub id: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub stable_id: Option<String>,
    #[serde(default)]
    pub options: Option<HarvestOptions>,
}

impl Seed {
    pub fn with_alias(id: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            alias: Some(alias.into()),
            stable_id: None,
            options: None,
        }
    }

    pub fn with_stable_id(id: impl Into<String>, stable_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            alias: None,
            stable_id: Some(stable_id.into()),
            options: None,
        }
    }

    /// Attaches a previously known alias to a seed identified by stable id.
    pub fn known_as(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_options(mut self, options: HarvestOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Per-seed options win over the batch options.
    pub fn effective_options<'a>(&'a self, batch: &'a HarvestOptions) -> &'a HarvestOptions {
        self.options.as_ref().unwrap_or(batch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestOptions {
    /// Only harvest items newer than the stored checkpoint.
    pub incremental: bool,
    /// Variant labels whose source url is reported for download.
    pub sizes: Vec<String>,
    /// Listing page size; the remote default when unset.
    pub per_page: Option<u32>,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            incremental: true,
            sizes: DEFAULT_SIZES.iter().map(|s| s.to_string()).collect(),
            per_page: None,
        }
    }
}

impl HarvestOptions {
    pub fn wants_size(&self, label: &str) -> bool {
        self.sizes.iter().any(|size| size == label)
    }
}
