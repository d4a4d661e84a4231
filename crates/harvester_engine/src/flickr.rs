//! Flickr REST implementation of [`RemoteApi`].
//!
//! Every call goes through [`capture`], so each one leaves a request/response
//! record pair in the archive sink and an [`AuditEntry`] behind.

use std::path::PathBuf;
use std::sync::Arc;

use engine_logging::engine_debug;
use harvester_core::{ItemRef, ListingPage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::api::{ApiError, ItemDetail, Profile, RemoteApi, Variant};
use crate::archive::{ArchiveError, ArchiveSink};
use crate::audit::AuditEntry;
use crate::capture::{capture, Tracer};
use crate::transport::{
    HttpMethod, HttpTransport, RawResponse, ReqwestTransport, TransportError, TransportSettings,
};

pub const FLICKR_HOST: &str = "https://api.flickr.com";

/// Flickr's error code for an unknown user or photo.
const CODE_NOT_FOUND: i64 = 1;

#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Scheme and host, without trailing slash. Never part of a trace.
    pub base_host: String,
    pub rest_path: String,
    pub api_key: String,
    /// Prefix shared by all method names, stripped for audit.
    pub method_prefix: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_host: FLICKR_HOST.to_string(),
            rest_path: "/services/rest/".to_string(),
            api_key: String::new(),
            method_prefix: "flickr.".to_string(),
        }
    }
}

/// What a finished API session leaves behind.
#[derive(Debug)]
pub struct ArchiveSummary {
    pub audit: Vec<AuditEntry>,
    pub warc_path: Option<PathBuf>,
}

pub struct FlickrApi<T: HttpTransport = ReqwestTransport> {
    transport: T,
    tracer: Tracer,
    settings: ApiSettings,
    sink: Box<dyn ArchiveSink>,
    audit: Vec<AuditEntry>,
}

impl FlickrApi<ReqwestTransport> {
    /// Builds a reqwest transport whose traffic is traced into the sink.
    pub fn connect(
        settings: ApiSettings,
        transport: TransportSettings,
        sink: Box<dyn ArchiveSink>,
    ) -> Result<Self, TransportError> {
        let tracer = Tracer::new();
        let transport =
            ReqwestTransport::new(transport)?.with_interceptor(Arc::new(tracer.clone()));
        Ok(Self::new(transport, tracer, settings, sink))
    }
}

impl<T: HttpTransport> FlickrApi<T> {
    /// `tracer` must be the interceptor registered on `transport`.
    pub fn new(
        transport: T,
        tracer: Tracer,
        settings: ApiSettings,
        sink: Box<dyn ArchiveSink>,
    ) -> Self {
        Self {
            transport,
            tracer,
            settings,
            sink,
            audit: Vec::new(),
        }
    }

    pub fn audit_entries(&self) -> &[AuditEntry] {
        &self.audit
    }

    /// Closes the archive sink and hands back the audit trail.
    pub fn finish(self) -> Result<ArchiveSummary, ArchiveError> {
        let warc_path = self.sink.close()?;
        Ok(ArchiveSummary {
            audit: self.audit,
            warc_path,
        })
    }

    fn request_url(&self, method: &str, params: &[(&str, &str)]) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("method", method);
        query.append_pair("api_key", &self.settings.api_key);
        query.append_pair("format", "json");
        query.append_pair("nojsoncallback", "1");
        for (key, value) in params {
            query.append_pair(key, value);
        }
        format!(
            "{}{}?{}",
            self.settings.base_host.trim_end_matches('/'),
            self.settings.rest_path,
            query.finish()
        )
    }

    async fn call<R: DeserializeOwned>(
        &mut self,
        method: &str,
        params: &[(&str, &str)],
    ) -> Result<R, ApiError> {
        let url = self.request_url(method, params);
        engine_debug!("Calling {} with {:?}", method, params);
        let captured = capture(
            &self.tracer,
            &self.settings.base_host,
            &self.settings.method_prefix,
            self.transport.execute(HttpMethod::Get, &url),
        )
        .await?;
        self.sink.write_pair(&captured.request, &captured.response)?;
        self.audit.push(captured.audit);
        decode(method, &captured.raw)
    }
}

#[async_trait::async_trait]
impl<T: HttpTransport> RemoteApi for FlickrApi<T> {
    async fn lookup_id_by_alias(&mut self, alias: &str) -> Result<String, ApiError> {
        let found: FindByUsername = self
            .call("flickr.people.findByUsername", &[("username", alias)])
            .await
            .map_err(|err| not_found_on_code(err, format!("user {alias}")))?;
        engine_debug!("Looking up username {} returned {}", alias, found.user.nsid);
        Ok(found.user.nsid)
    }

    async fn get_profile(&mut self, stable_id: &str) -> Result<Profile, ApiError> {
        let info: PersonInfo = self
            .call("flickr.people.getInfo", &[("user_id", stable_id)])
            .await
            .map_err(|err| not_found_on_code(err, format!("user id {stable_id}")))?;
        Ok(Profile {
            stable_id: info.person.nsid,
            alias: info.person.username.content,
        })
    }

    async fn list_items(
        &mut self,
        stable_id: &str,
        page: u32,
        per_page: Option<u32>,
    ) -> Result<ListingPage, ApiError> {
        let page_param = page.to_string();
        let per_page_param = per_page.map(|n| n.to_string());
        let mut params = vec![("user_id", stable_id), ("page", page_param.as_str())];
        if let Some(per_page) = per_page_param.as_deref() {
            params.push(("per_page", per_page));
        }
        let listing: PublicPhotos = self.call("flickr.people.getPublicPhotos", &params).await?;
        Ok(ListingPage {
            page: listing.photos.page,
            total_pages: listing.photos.pages,
            items: listing
                .photos
                .photo
                .into_iter()
                .map(|photo| ItemRef::new(photo.id, photo.secret))
                .collect(),
        })
    }

    async fn get_item_detail(&mut self, item: &ItemRef) -> Result<ItemDetail, ApiError> {
        let info: PhotoInfo = self
            .call(
                "flickr.photos.getInfo",
                &[("photo_id", item.id.as_str()), ("secret", item.secret.as_str())],
            )
            .await
            .map_err(|err| not_found_on_code(err, format!("photo {}", item.id)))?;
        let photo = info.photo;
        Ok(ItemDetail {
            id: photo.id,
            secret: photo.secret,
            title: photo.title.map(|title| title.content),
            posted: photo.dates.and_then(|dates| dates.posted),
            owner: photo.owner.map(|owner| owner.nsid),
        })
    }

    async fn get_item_variants(&mut self, item_id: &str) -> Result<Vec<Variant>, ApiError> {
        let sizes: PhotoSizes = self
            .call("flickr.photos.getSizes", &[("photo_id", item_id)])
            .await
            .map_err(|err| not_found_on_code(err, format!("photo {item_id}")))?;
        Ok(sizes
            .sizes
            .size
            .into_iter()
            .map(|size| Variant {
                label: size.label,
                source: size.source,
            })
            .collect())
    }
}

fn not_found_on_code(err: ApiError, what: String) -> ApiError {
    match err {
        ApiError::Remote { code, .. } if code == CODE_NOT_FOUND => ApiError::NotFound(what),
        other => other,
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    stat: String,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

fn decode<R: DeserializeOwned>(method: &str, raw: &RawResponse) -> Result<R, ApiError> {
    if !(200..300).contains(&raw.status) {
        return Err(ApiError::HttpStatus(raw.status));
    }
    let envelope: Envelope =
        serde_json::from_slice(&raw.body).map_err(|err| malformed(method, err))?;
    if envelope.stat != "ok" {
        return Err(ApiError::Remote {
            code: envelope.code.unwrap_or_default(),
            message: envelope.message.unwrap_or_default(),
        });
    }
    serde_json::from_slice(&raw.body).map_err(|err| malformed(method, err))
}

fn malformed(method: &str, err: serde_json::Error) -> ApiError {
    ApiError::MalformedResponse {
        method: method.to_string(),
        detail: err.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(rename = "_content")]
    content: String,
}

#[derive(Debug, Deserialize)]
struct FindByUsername {
    user: FoundUser,
}

#[derive(Debug, Deserialize)]
struct FoundUser {
    nsid: String,
}

#[derive(Debug, Deserialize)]
struct PersonInfo {
    person: Person,
}

#[derive(Debug, Deserialize)]
struct Person {
    nsid: String,
    username: Content,
}

#[derive(Debug, Deserialize)]
struct PublicPhotos {
    photos: PhotoPage,
}

#[derive(Debug, Deserialize)]
struct PhotoPage {
    #[serde(deserialize_with = "lenient_u32")]
    page: u32,
    #[serde(deserialize_with = "lenient_u32")]
    pages: u32,
    photo: Vec<PhotoRef>,
}

#[derive(Debug, Deserialize)]
struct PhotoRef {
    id: String,
    secret: String,
}

#[derive(Debug, Deserialize)]
struct PhotoInfo {
    photo: Photo,
}

#[derive(Debug, Deserialize)]
struct Photo {
    id: String,
    secret: String,
    #[serde(default)]
    title: Option<Content>,
    #[serde(default)]
    dates: Option<PhotoDates>,
    #[serde(default)]
    owner: Option<Owner>,
}

#[derive(Debug, Deserialize)]
struct PhotoDates {
    #[serde(default)]
    posted: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Owner {
    nsid: String,
}

#[derive(Debug, Deserialize)]
struct PhotoSizes {
    sizes: SizeList,
}

#[derive(Debug, Deserialize)]
struct SizeList {
    size: Vec<Size>,
}

#[derive(Debug, Deserialize)]
struct Size {
    label: String,
    source: String,
}

/// Paging fields arrive as numbers or as numeric strings depending on the
/// endpoint.
fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u32),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
