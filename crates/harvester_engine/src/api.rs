use harvester_core::{ItemRef, ListingPage};

use crate::archive::ArchiveError;
use crate::capture::CaptureError;
use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub stable_id: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDetail {
    pub id: String,
    pub secret: String,
    pub title: Option<String>,
    /// Upload time as reported by the remote, seconds since the epoch.
    pub posted: Option<String>,
    pub owner: Option<String>,
}

/// One rendition of an item, e.g. its thumbnail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub label: String,
    pub source: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("malformed response to {method}: {detail}")]
    MalformedResponse { method: String, detail: String },
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
}

/// Operations of the remote listing/detail API used by a harvest.
///
/// Calls take `&mut self`: an implementation owns the run's archive sink and
/// calls are issued strictly one at a time.
#[async_trait::async_trait]
pub trait RemoteApi: Send {
    async fn lookup_id_by_alias(&mut self, alias: &str) -> Result<String, ApiError>;

    async fn get_profile(&mut self, stable_id: &str) -> Result<Profile, ApiError>;

    async fn list_items(
        &mut self,
        stable_id: &str,
        page: u32,
        per_page: Option<u32>,
    ) -> Result<ListingPage, ApiError>;

    async fn get_item_detail(&mut self, item: &ItemRef) -> Result<ItemDetail, ApiError>;

    async fn get_item_variants(&mut self, item_id: &str) -> Result<Vec<Variant>, ApiError>;
}
