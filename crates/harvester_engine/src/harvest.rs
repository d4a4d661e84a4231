//! Seed-by-seed harvest driver.

use engine_logging::{engine_debug, engine_error, engine_info, engine_warn};
use harvester_core::{
    CursorWalker, HarvestOptions, ItemRef, MessageCode, Outcome, Seed, Severity, COUNTER_PHOTO,
};

use crate::api::{ApiError, RemoteApi};
use crate::archive::ArchiveError;
use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::resolve::resolve;

pub const CHECKPOINT_NAMESPACE: &str = "flickr_harvester";

pub fn checkpoint_key(stable_id: &str) -> String {
    format!("{stable_id}.last_photo_id")
}

/// Failures that end the whole run rather than a single seed.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("checkpoint store failed: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("archive sink failed: {0}")]
    Archive(#[from] ArchiveError),
}

/// Records a non-fatal API failure in `outcome`; archive failures are handed
/// back as fatal.
pub(crate) fn report_api_error(
    outcome: &mut Outcome,
    seed_id: &str,
    err: ApiError,
) -> Result<(), HarvestError> {
    let err = match err {
        ApiError::Archive(archive) => return Err(HarvestError::Archive(archive)),
        other => other,
    };
    let (severity, code) = match &err {
        ApiError::NotFound(_) => (Severity::Warning, MessageCode::ItemNotFound),
        ApiError::MalformedResponse { .. } => (Severity::Error, MessageCode::MalformedResponse),
        ApiError::Capture(_) => (Severity::Error, MessageCode::CaptureFailed),
        _ => (Severity::Error, MessageCode::UnknownError),
    };
    let text = format!("Error returned by API: {err}");
    if severity == Severity::Error {
        engine_error!("{}", text);
    } else {
        engine_warn!("{}", text);
    }
    outcome.append_seed_message(severity, code, seed_id, text);
    Ok(())
}

/// Runs harvests for a batch of seeds against one API session and one
/// checkpoint store, strictly one call at a time.
pub struct Harvester<A, S> {
    api: A,
    store: S,
    options: HarvestOptions,
}

impl<A: RemoteApi, S: CheckpointStore> Harvester<A, S> {
    pub fn new(api: A, store: S, options: HarvestOptions) -> Self {
        Self {
            api,
            store,
            options,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (A, S) {
        (self.api, self.store)
    }

    /// Harvests every seed in order. A failing seed is abandoned and the next
    /// one is started; only store and archive failures abort the batch.
    pub async fn harvest(&mut self, seeds: &[Seed]) -> Result<Outcome, HarvestError> {
        let mut outcome = Outcome::new();
        for seed in seeds {
            let seed_outcome = self.harvest_seed(seed).await?;
            if !seed_outcome.success {
                engine_warn!("Seed {} failed; continuing with next seed", seed.id);
            }
            outcome.merge(seed_outcome);
        }
        engine_info!("{}", outcome);
        Ok(outcome)
    }

    pub async fn harvest_seed(&mut self, seed: &Seed) -> Result<Outcome, HarvestError> {
        let options = seed.effective_options(&self.options).clone();
        engine_info!(
            "Harvesting seed {} (alias {:?}, stable id {:?}). Incremental is {}. Sizes is {:?}",
            seed.id,
            seed.alias,
            seed.stable_id,
            options.incremental,
            options.sizes
        );

        let resolution = resolve(&mut self.api, seed).await?;
        let mut outcome = resolution.outcome;
        let Some(stable_id) = resolution.stable_id else {
            return Ok(outcome);
        };

        let key = checkpoint_key(&stable_id);
        let checkpoint = if options.incremental {
            self.store.get_state(CHECKPOINT_NAMESPACE, &key)?
        } else {
            None
        };

        let mut walker = CursorWalker::new(checkpoint);
        while let Some(page) = walker.next_page() {
            engine_debug!(
                "Fetching page {} of {:?} for {}",
                page,
                walker.total_pages(),
                stable_id
            );
            match self.api.list_items(&stable_id, page, options.per_page).await {
                Ok(listing) => walker.feed(listing),
                Err(err) => {
                    report_api_error(&mut outcome, &seed.id, err)?;
                    return Ok(outcome);
                }
            }
        }
        let listed = walker.items_seen();
        let delta = walker.finish();
        if delta.stale_checkpoint() {
            engine_warn!(
                "Checkpoint for {} not found in listing; harvesting all {} items",
                stable_id,
                delta.len()
            );
        }
        engine_debug!("Harvesting {} of {} listed items", delta.len(), listed);

        for item in delta.items() {
            let item_outcome = self.harvest_item(&seed.id, item, &options).await?;
            let failed = !item_outcome.success;
            outcome.merge(item_outcome);
            if failed {
                engine_warn!(
                    "Stopping seed {} at item {}; checkpoint left unchanged",
                    seed.id,
                    item.id
                );
                return Ok(outcome);
            }
        }

        if let Some(newest) = delta.next_checkpoint() {
            engine_debug!("New last photo id is {}", newest);
            self.store.set_state(CHECKPOINT_NAMESPACE, &key, Some(newest))?;
        }
        Ok(outcome)
    }

    async fn harvest_item(
        &mut self,
        seed_id: &str,
        item: &ItemRef,
        options: &HarvestOptions,
    ) -> Result<Outcome, HarvestError> {
        engine_debug!("Harvesting photo {}", item.id);
        let mut outcome = Outcome::new();

        // The detail call is made for its archive record; its content is not
        // needed here.
        if let Err(err) = self.api.get_item_detail(item).await {
            report_api_error(&mut outcome, seed_id, err)?;
            return Ok(outcome);
        }

        match self.api.get_item_variants(&item.id).await {
            Ok(variants) => {
                for variant in variants {
                    if options.wants_size(&variant.label) {
                        engine_debug!("Adding url for {}", variant.label);
                        outcome.add_url(variant.source);
                    }
                }
            }
            Err(err) => {
                report_api_error(&mut outcome, seed_id, err)?;
                return Ok(outcome);
            }
        }

        outcome.increment_counter(COUNTER_PHOTO);
        Ok(outcome)
    }
}
