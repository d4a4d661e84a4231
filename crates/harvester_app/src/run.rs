use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use engine_logging::{clear_harvest_id, engine_info, engine_warn, set_harvest_id};
use harvester_core::Outcome;
use harvester_engine::{
    warc_location, ArchiveSink, AuditEntry, CheckpointStore, FlickrApi, Harvester,
    JsonCheckpointStore, MemoryArchive, TransportSettings, WarcWriter,
};
use serde::Serialize;

use crate::job::HarvestJob;

const WARC_TYPE: &str = "flickr";

#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    /// Where `state.json` lives; the collection path when unset.
    pub state_dir: Option<PathBuf>,
    /// Keep records in memory instead of writing a WARC file.
    pub no_archive: bool,
}

/// Everything a finished run hands to downstream reporting.
#[derive(Debug, Serialize)]
pub struct HarvestReport {
    pub job_id: String,
    pub outcome: Outcome,
    /// Discovered urls, duplicates removed.
    pub urls: Vec<String>,
    pub warc_path: Option<PathBuf>,
    pub audit: Vec<AuditEntry>,
}

pub async fn run_job(job: &HarvestJob, settings: &RunSettings) -> anyhow::Result<HarvestReport> {
    set_harvest_id(&job.id);
    let result = harvest(job, settings).await;
    clear_harvest_id();
    result
}

async fn harvest(job: &HarvestJob, settings: &RunSettings) -> anyhow::Result<HarvestReport> {
    engine_info!(
        "Starting harvest of {} seeds into collection {}",
        job.seeds.len(),
        job.collection_id
    );

    let sink: Box<dyn ArchiveSink> = if settings.no_archive {
        Box::new(MemoryArchive::new())
    } else {
        let (warc_id, path) = warc_location(
            &job.collection_path,
            &job.collection_id,
            WARC_TYPE,
            Utc::now(),
        );
        Box::new(WarcWriter::open(&path, &warc_id).context("opening WARC")?)
    };
    let api = FlickrApi::connect(job.api_settings(), TransportSettings::default(), sink)
        .context("building HTTP client")?;

    let state_dir = settings
        .state_dir
        .clone()
        .unwrap_or_else(|| job.collection_path.clone());
    let store = JsonCheckpointStore::open(&state_dir).context("opening harvest state")?;

    let mut harvester = Harvester::new(api, store, job.options.clone());
    let result = harvester.harvest(&job.seeds).await;
    let (api, mut store) = harvester.into_parts();

    // Records captured before a fatal error are still persisted.
    let summary = api.finish().context("closing WARC")?;
    let outcome = result.context("harvest aborted")?;
    store.close().context("saving harvest state")?;

    if !outcome.success {
        engine_warn!("Harvest finished with {} errors", outcome.errors.len());
    }
    engine_info!(
        "Harvest done: {} calls archived to {:?}",
        summary.audit.len(),
        summary.warc_path
    );

    Ok(HarvestReport {
        job_id: job.id.clone(),
        urls: outcome.deduped_urls(),
        outcome,
        warc_path: summary.warc_path,
        audit: summary.audit,
    })
}
