use engine_logging::{engine_debug, engine_info, engine_warn};
use harvester_core::{MessageCode, Outcome, Seed, Severity, COUNTER_USER};

use crate::api::{ApiError, RemoteApi};
use crate::harvest::{report_api_error, HarvestError};

/// Identity of a seed after resolution. `stable_id` is `None` when the seed
/// cannot be harvested; `outcome` says why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub stable_id: Option<String>,
    pub alias: Option<String>,
    pub outcome: Outcome,
}

/// Maps a seed's alias to its stable id and checks the alias on file against
/// the remote profile.
///
/// Only archive failures are returned as errors; everything else ends up as a
/// message in the resolution's outcome.
pub async fn resolve<A>(api: &mut A, seed: &Seed) -> Result<Resolution, HarvestError>
where
    A: RemoteApi + ?Sized,
{
    let mut outcome = Outcome::new();
    let unresolved = |outcome: Outcome| Resolution {
        stable_id: None,
        alias: seed.alias.clone(),
        outcome,
    };

    let stable_id = match (&seed.stable_id, &seed.alias) {
        (Some(stable_id), _) => stable_id.clone(),
        (None, Some(alias)) => match api.lookup_id_by_alias(alias).await {
            Ok(stable_id) => {
                engine_info!("Seed {} alias {} resolved to {}", seed.id, alias, stable_id);
                outcome.record_uid(&seed.id, &stable_id);
                stable_id
            }
            Err(ApiError::NotFound(_)) => {
                engine_warn!("Stable id not found for alias {}", alias);
                outcome.append_seed_message(
                    Severity::Warning,
                    MessageCode::TokenNotFound,
                    &seed.id,
                    format!("Stable id not found for alias {alias}"),
                );
                return Ok(unresolved(outcome));
            }
            Err(err) => {
                report_api_error(&mut outcome, &seed.id, err)?;
                return Ok(unresolved(outcome));
            }
        },
        (None, None) => {
            outcome.append_seed_message(
                Severity::Error,
                MessageCode::InvalidSeed,
                &seed.id,
                format!("Seed {} has neither alias nor stable id", seed.id),
            );
            return Ok(unresolved(outcome));
        }
    };

    let profile = match api.get_profile(&stable_id).await {
        Ok(profile) => profile,
        Err(ApiError::NotFound(_)) => {
            engine_warn!("Stable id {} not found", stable_id);
            outcome.append_seed_message(
                Severity::Warning,
                MessageCode::UidNotFound,
                &seed.id,
                format!("Stable id {stable_id} not found"),
            );
            return Ok(unresolved(outcome));
        }
        Err(err) => {
            report_api_error(&mut outcome, &seed.id, err)?;
            return Ok(unresolved(outcome));
        }
    };
    outcome.increment_counter(COUNTER_USER);

    if seed.alias.as_deref() != Some(profile.alias.as_str()) {
        engine_debug!(
            "Alias for seed {} changed from {:?} to {}",
            seed.id,
            seed.alias,
            profile.alias
        );
        outcome.record_alias_update(&seed.id, &profile.alias);
    }

    Ok(Resolution {
        stable_id: Some(stable_id),
        alias: Some(profile.alias),
        outcome,
    })
}
