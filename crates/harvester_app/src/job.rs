//! Harvest job files.
//!
//! A job is a RON document naming the collection to archive into, the API
//! credentials and the seeds to harvest:
//!
//! ```ron
//! (
//!     id: "job-1",
//!     collection_id: "c1",
//!     collection_path: "/data/collections/c1",
//!     credentials: (key: "abc"),
//!     seeds: [(id: "s1", alias: Some("justin.littman"))],
//!     options: (sizes: ["Thumbnail", "Original"]),
//! )
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use harvester_core::{HarvestOptions, Seed};
use harvester_engine::ApiSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestJob {
    pub id: String,
    pub collection_id: String,
    pub collection_path: PathBuf,
    #[serde(default)]
    pub credentials: Credentials,
    pub seeds: Vec<Seed>,
    #[serde(default)]
    pub options: HarvestOptions,
    /// Replaces the public API host, e.g. for a recording proxy.
    #[serde(default)]
    pub base_host: Option<String>,
}

impl HarvestJob {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("reading job file {path:?}"))?;
        Self::parse(&content).with_context(|| format!("parsing job file {path:?}"))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let job: HarvestJob = ron::from_str(content)?;
        if job.seeds.is_empty() {
            anyhow::bail!("job {} has no seeds", job.id);
        }
        Ok(job)
    }

    pub fn api_settings(&self) -> ApiSettings {
        let mut settings = ApiSettings {
            api_key: self.credentials.key.clone(),
            ..ApiSettings::default()
        };
        if let Some(host) = &self.base_host {
            settings.base_host = host.trim_end_matches('/').to_string();
        }
        settings
    }
}
