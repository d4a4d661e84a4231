//! Wire trace capture for a single API call.
//!
//! A [`Tracer`] is registered as an [`Interceptor`] on the transport and only
//! records while a [`TraceSession`] is open. [`capture`] opens a session
//! around one call, parses the recorded trace into one request block and one
//! response block, and synthesizes the paired archive records and the audit
//! entry for the call.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use engine_logging::engine_trace;

use crate::api::ApiError;
use crate::archive::ArchiveRecord;
use crate::audit::AuditEntry;
use crate::transport::{
    HttpMethod, Interceptor, RawResponse, RequestHead, ResponseHead, TransportError,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("a capture is already in progress")]
    Overlap,
    #[error("unsupported request method in trace: {0}")]
    UnsupportedMethod(String),
    #[error("malformed trace: {0}")]
    MalformedTrace(String),
    #[error("expected one request and one response block, got {requests} and {responses}")]
    BlockCount { requests: usize, responses: usize },
}

/// One line of a wire trace.
///
/// The textual form is `send: <request head>` with CRLF escaped as `\r\n`,
/// `reply: <status line>` and `header: <name>: <value>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// Complete request head: request line, header lines and the empty line
    /// that ends the head.
    Send(String),
    Reply(String),
    Header { name: String, value: String },
}

impl TraceEvent {
    fn send(head: &RequestHead) -> Self {
        let mut text = head.request_line();
        text.push_str("\r\n");
        for (name, value) in &head.headers {
            text.push_str(&format!("{name}: {value}\r\n"));
        }
        text.push_str("\r\n");
        TraceEvent::Send(text)
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::Send(head) => write!(f, "send: {}", head.replace("\r\n", "\\r\\n")),
            TraceEvent::Reply(status) => write!(f, "reply: {status}"),
            TraceEvent::Header { name, value } => write!(f, "header: {name}: {value}"),
        }
    }
}

impl FromStr for TraceEvent {
    type Err = CaptureError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(rest) = line.strip_prefix("send:") {
            return Ok(TraceEvent::Send(rest.trim_start().replace("\\r\\n", "\r\n")));
        }
        if let Some(rest) = line.strip_prefix("reply:") {
            return Ok(TraceEvent::Reply(rest.trim().to_string()));
        }
        if let Some(rest) = line.strip_prefix("header:") {
            let (name, value) = rest
                .split_once(':')
                .ok_or_else(|| CaptureError::MalformedTrace(format!("header without value: {line}")))?;
            return Ok(TraceEvent::Header {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
            });
        }
        Err(CaptureError::MalformedTrace(format!("unrecognised trace line: {line}")))
    }
}

#[derive(Debug, Default)]
struct TraceState {
    active: bool,
    events: Vec<TraceEvent>,
}

/// Shared trace channel. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct Tracer {
    state: Arc<Mutex<TraceState>>,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables tracing until the returned session is finished or dropped.
    pub fn begin(&self) -> Result<TraceSession, CaptureError> {
        let mut state = lock(&self.state);
        if state.active {
            return Err(CaptureError::Overlap);
        }
        state.active = true;
        state.events.clear();
        Ok(TraceSession {
            state: Arc::clone(&self.state),
        })
    }

    pub fn is_active(&self) -> bool {
        lock(&self.state).active
    }

    fn record(&self, events: impl IntoIterator<Item = TraceEvent>) {
        let mut state = lock(&self.state);
        if state.active {
            state.events.extend(events);
        }
    }
}

impl Interceptor for Tracer {
    fn on_request(&self, head: &RequestHead) {
        self.record([TraceEvent::send(head)]);
    }

    fn on_response(&self, head: &ResponseHead) {
        let reply = TraceEvent::Reply(head.status_line());
        let headers = head.headers.iter().map(|(name, value)| TraceEvent::Header {
            name: name.clone(),
            value: value.clone(),
        });
        self.record(std::iter::once(reply).chain(headers));
    }
}

/// Open trace; tracing is disabled again when this is dropped.
#[derive(Debug)]
pub struct TraceSession {
    state: Arc<Mutex<TraceState>>,
}

impl TraceSession {
    pub fn finish(self) -> Vec<TraceEvent> {
        std::mem::take(&mut lock(&self.state).events)
    }
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.active = false;
        state.events.clear();
    }
}

fn lock(state: &Mutex<TraceState>) -> MutexGuard<'_, TraceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBlock {
    pub method: HttpMethod,
    /// Path and query string from the request line.
    pub target: String,
    /// Full request head, always ending in an empty line.
    pub head: String,
}

impl RequestBlock {
    fn parse(head: &str) -> Result<Self, CaptureError> {
        let request_line = head.split("\r\n").next().unwrap_or_default();
        let (method, rest) = if let Some(rest) = request_line.strip_prefix("GET ") {
            (HttpMethod::Get, rest)
        } else if let Some(rest) = request_line.strip_prefix("POST ") {
            (HttpMethod::Post, rest)
        } else {
            let token = request_line.split_whitespace().next().unwrap_or_default();
            return Err(CaptureError::UnsupportedMethod(token.to_string()));
        };
        let end = rest.rfind(" HTTP/").ok_or_else(|| {
            CaptureError::MalformedTrace(format!("request line without version: {request_line}"))
        })?;
        let mut head = head.trim_end_matches(['\r', '\n']).to_string();
        head.push_str("\r\n\r\n");
        Ok(Self {
            method,
            target: rest[..end].to_string(),
            head,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBlock {
    pub head: String,
    pub date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedTrace {
    pub requests: Vec<RequestBlock>,
    pub responses: Vec<ResponseBlock>,
}

impl ParsedTrace {
    /// The single request/response pair of a well-formed capture.
    pub fn into_pair(self) -> Result<(RequestBlock, ResponseBlock), CaptureError> {
        let (requests, responses) = (self.requests.len(), self.responses.len());
        if requests != 1 || responses != 1 {
            return Err(CaptureError::BlockCount {
                requests,
                responses,
            });
        }
        match (self.requests.into_iter().next(), self.responses.into_iter().next()) {
            (Some(request), Some(response)) => Ok((request, response)),
            _ => Err(CaptureError::BlockCount {
                requests,
                responses,
            }),
        }
    }
}

/// Splits a trace into request and response header blocks, in trace order.
pub fn parse_trace(events: &[TraceEvent]) -> Result<ParsedTrace, CaptureError> {
    let mut parsed = ParsedTrace::default();
    let mut pending: Option<ResponseBlock> = None;
    for event in events {
        match event {
            TraceEvent::Send(head) => {
                if let Some(response) = pending.take() {
                    parsed.responses.push(response);
                }
                parsed.requests.push(RequestBlock::parse(head)?);
            }
            TraceEvent::Reply(status) => {
                if let Some(response) = pending.take() {
                    parsed.responses.push(response);
                }
                pending = Some(ResponseBlock {
                    head: format!("{status}\r\n"),
                    date: None,
                });
            }
            TraceEvent::Header { name, value } => {
                let response = pending.as_mut().ok_or_else(|| {
                    CaptureError::MalformedTrace(format!("header {name} before any reply"))
                })?;
                response.head.push_str(&format!("{name}: {value}\r\n"));
                if name.eq_ignore_ascii_case("date") {
                    response.date = Some(value.clone());
                }
            }
        }
    }
    if let Some(response) = pending {
        parsed.responses.push(response);
    }
    Ok(parsed)
}

/// Result of one captured call.
#[derive(Debug, Clone)]
pub struct Captured {
    pub request: ArchiveRecord,
    pub response: ArchiveRecord,
    pub raw: RawResponse,
    pub audit: AuditEntry,
}

/// Runs `call` with tracing enabled and turns the trace into archive records.
///
/// Tracing is disabled on every exit path. A call that fails in transport
/// yields no records at all.
pub async fn capture<F>(
    tracer: &Tracer,
    base_host: &str,
    method_prefix: &str,
    call: F,
) -> Result<Captured, ApiError>
where
    F: Future<Output = Result<RawResponse, TransportError>>,
{
    let session = tracer.begin()?;
    let result = call.await;
    let events = session.finish();
    let raw = result?;

    engine_trace!("Captured {} trace events", events.len());
    let (request_block, response_block) = parse_trace(&events)?.into_pair()?;
    let target_uri = format!("{}{}", base_host.trim_end_matches('/'), request_block.target);

    let request = ArchiveRecord::request(&target_uri, request_block.head);
    let mut payload = response_block.head.into_bytes();
    payload.extend_from_slice(b"\r\n");
    payload.extend_from_slice(&raw.body);
    let response = ArchiveRecord::response(&target_uri, payload, &request);
    let audit = AuditEntry::derive(
        &request,
        &response,
        response_block.date.as_deref(),
        method_prefix,
    );

    Ok(Captured {
        request,
        response,
        raw,
        audit,
    })
}
