use chrono::{DateTime, Utc};
use engine_logging::engine_warn;
use serde::Serialize;

use crate::archive::ArchiveRecord;

/// Query parameters never surfaced for audit: redundant with `api_method`, or
/// carrying credentials.
const HIDDEN_PARAMS: &[&str] = &[
    "method",
    "format",
    "nojsoncallback",
    "jsoncallback",
    "api_key",
    "api_sig",
    "auth_token",
];

/// Summary of one captured call, derived from its request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub api_method: Option<String>,
    /// Visible query parameters in request order, repeats included.
    pub parameters: Vec<(String, String)>,
    pub request_record_id: String,
    pub response_record_id: String,
}

impl AuditEntry {
    /// `date` is the response's `Date` header; the response record's own
    /// timestamp is used when it is missing or unparseable.
    pub fn derive(
        request: &ArchiveRecord,
        response: &ArchiveRecord,
        date: Option<&str>,
        method_prefix: &str,
    ) -> Self {
        let url = request.target_uri().unwrap_or_default().to_string();
        let query = url.split_once('?').map(|(_, query)| query).unwrap_or("");

        let mut api_method = None;
        let mut parameters = Vec::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == "method" {
                api_method = Some(value.strip_prefix(method_prefix).unwrap_or(&*value).to_string());
            }
            if is_hidden(&key) {
                continue;
            }
            parameters.push((key.into_owned(), value.into_owned()));
        }

        Self {
            timestamp: parse_http_date(date).unwrap_or_else(|| {
                engine_warn!("No usable Date header for {}, using capture time", url);
                response.timestamp()
            }),
            url,
            api_method,
            parameters,
            request_record_id: request.record_id().to_string(),
            response_record_id: response.record_id().to_string(),
        }
    }
}

fn is_hidden(key: &str) -> bool {
    HIDDEN_PARAMS.contains(&key) || key.starts_with("oauth_")
}

fn parse_http_date(date: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(date?.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
