use std::fmt::Write as _;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use engine_logging::{engine_debug, engine_info};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use uuid::Uuid;

use crate::persist::{ensure_output_dir, PersistError};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("archive path has no parent directory: {0:?}")]
    InvalidPath(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Metadata describing the archive itself.
    Warcinfo,
    Request,
    Response,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Warcinfo => "warcinfo",
            RecordKind::Request => "request",
            RecordKind::Response => "response",
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            RecordKind::Warcinfo => "application/warc-fields",
            RecordKind::Request => "application/http; msgtype=request",
            RecordKind::Response => "application/http; msgtype=response",
        }
    }
}

/// Replayable record of one HTTP request or response. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    record_id: String,
    kind: RecordKind,
    target_uri: Option<String>,
    timestamp: DateTime<Utc>,
    payload: Vec<u8>,
    concurrent_to: Option<String>,
}

impl ArchiveRecord {
    pub fn request(target_uri: &str, head: String) -> Self {
        Self::build(
            RecordKind::Request,
            Some(target_uri.to_string()),
            head.into_bytes(),
            None,
        )
    }

    /// A response record, paired with the request it answers.
    pub fn response(target_uri: &str, payload: Vec<u8>, request: &ArchiveRecord) -> Self {
        Self::build(
            RecordKind::Response,
            Some(target_uri.to_string()),
            payload,
            Some(request.record_id.clone()),
        )
    }

    pub fn warcinfo(fields: &[(&str, &str)]) -> Self {
        let mut payload = String::new();
        for (name, value) in fields {
            let _ = write!(payload, "{name}: {value}\r\n");
        }
        Self::build(RecordKind::Warcinfo, None, payload.into_bytes(), None)
    }

    fn build(
        kind: RecordKind,
        target_uri: Option<String>,
        payload: Vec<u8>,
        concurrent_to: Option<String>,
    ) -> Self {
        Self {
            record_id: format!("<urn:uuid:{}>", Uuid::new_v4()),
            kind,
            target_uri,
            timestamp: Utc::now(),
            payload,
            concurrent_to,
        }
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn target_uri(&self) -> Option<&str> {
        self.target_uri.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Id of the request record this response answers.
    pub fn concurrent_to(&self) -> Option<&str> {
        self.concurrent_to.as_deref()
    }

    /// Serializes the record in WARC/1.0 framing.
    pub fn to_warc(&self) -> Vec<u8> {
        let block = self.payload.as_slice();
        let mut out = String::with_capacity(512);
        out.push_str("WARC/1.0\r\n");
        let _ = write!(out, "WARC-Type: {}\r\n", self.kind.as_str());
        let _ = write!(out, "WARC-Record-ID: {}\r\n", self.record_id);
        let _ = write!(
            out,
            "WARC-Date: {}\r\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        if let Some(uri) = &self.target_uri {
            let _ = write!(out, "WARC-Target-URI: {uri}\r\n");
        }
        if let Some(request_id) = &self.concurrent_to {
            let _ = write!(out, "WARC-Concurrent-To: {request_id}\r\n");
        }
        let _ = write!(out, "WARC-Block-Digest: sha256:{}\r\n", hex_digest(block));
        let _ = write!(out, "Content-Type: {}\r\n", self.kind.content_type());
        let _ = write!(out, "Content-Length: {}\r\n", block.len());
        out.push_str("\r\n");
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(block);
        bytes.extend_from_slice(b"\r\n\r\n");
        bytes
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

/// Append-only destination for archive records.
pub trait ArchiveSink: Send {
    fn write_record(&mut self, record: &ArchiveRecord) -> Result<(), ArchiveError>;

    /// Writes a completed request/response pair. Either both records are
    /// written or neither is.
    fn write_pair(
        &mut self,
        request: &ArchiveRecord,
        response: &ArchiveRecord,
    ) -> Result<(), ArchiveError> {
        self.write_record(request)?;
        self.write_record(response)
    }

    /// Finalizes the sink. Returns where the records were persisted, or
    /// `None` when nothing was persisted.
    fn close(self: Box<Self>) -> Result<Option<PathBuf>, ArchiveError>;
}

/// In-memory sink; clones share the same record list.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    records: Arc<Mutex<Vec<ArchiveRecord>>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ArchiveRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ArchiveSink for MemoryArchive {
    fn write_record(&mut self, record: &ArchiveRecord) -> Result<(), ArchiveError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    fn write_pair(
        &mut self,
        request: &ArchiveRecord,
        response: &ArchiveRecord,
    ) -> Result<(), ArchiveError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([request.clone(), response.clone()]);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<Option<PathBuf>, ArchiveError> {
        Ok(None)
    }
}

/// Writes WARC records to a temp file next to `path` and moves it into place
/// on close. A file holding nothing but `warcinfo` records is discarded.
pub struct WarcWriter {
    path: PathBuf,
    tmp: NamedTempFile,
    empty: bool,
}

impl WarcWriter {
    pub fn open(path: &Path, warc_id: &str) -> Result<Self, ArchiveError> {
        let parent = path
            .parent()
            .ok_or_else(|| ArchiveError::InvalidPath(path.to_path_buf()))?;
        ensure_output_dir(parent)?;
        engine_info!("Writing to {:?}", path);
        let mut writer = Self {
            path: path.to_path_buf(),
            tmp: NamedTempFile::new_in(parent)?,
            empty: true,
        };
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        writer.write_record(&ArchiveRecord::warcinfo(&[
            ("software", concat!("harvester_engine/", env!("CARGO_PKG_VERSION"))),
            ("format", "WARC File Format 1.0"),
            ("warc-id", warc_id),
            ("filename", filename.as_str()),
        ]))?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ArchiveSink for WarcWriter {
    fn write_record(&mut self, record: &ArchiveRecord) -> Result<(), ArchiveError> {
        append_whole(&mut self.tmp, &record.to_warc())?;
        if record.kind() != RecordKind::Warcinfo {
            self.empty = false;
        }
        Ok(())
    }

    fn write_pair(
        &mut self,
        request: &ArchiveRecord,
        response: &ArchiveRecord,
    ) -> Result<(), ArchiveError> {
        let mut bytes = request.to_warc();
        bytes.extend_from_slice(&response.to_warc());
        append_whole(&mut self.tmp, &bytes)?;
        self.empty = false;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<Option<PathBuf>, ArchiveError> {
        let WarcWriter {
            path,
            mut tmp,
            empty,
        } = *self;
        if empty {
            engine_debug!("Deleting {:?} since empty.", path);
            tmp.close()?;
            return Ok(None);
        }
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&path).map_err(|e| ArchiveError::Io(e.error))?;
        engine_debug!("Closed {:?}.", path);
        Ok(Some(path))
    }
}

/// Output that can be cut back to an earlier length.
trait Truncate: Write + Seek {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for NamedTempFile {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.as_file().set_len(len)
    }
}

/// Appends `bytes` entirely, or rolls `out` back to where it was.
fn append_whole<W: Truncate>(out: &mut W, bytes: &[u8]) -> io::Result<()> {
    let start = out.stream_position()?;
    if let Err(err) = out.write_all(bytes) {
        out.truncate(start)?;
        out.seek(SeekFrom::Start(start))?;
        return Err(err);
    }
    Ok(())
}

/// Id and path for a new WARC of a collection:
/// `<collection>/YYYY/MM/DD/HH/<collection_id>-<warc_type>-<timestamp>.warc`.
pub fn warc_location(
    collection_path: &Path,
    collection_id: &str,
    warc_type: &str,
    now: DateTime<Utc>,
) -> (String, PathBuf) {
    let warc_id = format!(
        "{collection_id}-{warc_type}-{}",
        now.format("%Y%m%dT%H%M%SZ")
    );
    let path = collection_path
        .join(now.format("%Y").to_string())
        .join(now.format("%m").to_string())
        .join(now.format("%d").to_string())
        .join(now.format("%H").to_string())
        .join(format!("{warc_id}.warc"));
    (warc_id, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warc_framing_carries_pairing_and_length() {
        let request = ArchiveRecord::request("https://h/a", "GET /a HTTP/1.1\r\n".into());
        let response = ArchiveRecord::response("https://h/a", "HTTP/1.1 200 OK\r\n\r\n{}".into(), &request);
        let text = String::from_utf8(response.to_warc()).unwrap();
        assert!(text.starts_with("WARC/1.0\r\nWARC-Type: response\r\n"));
        assert!(text.contains(&format!("WARC-Concurrent-To: {}\r\n", request.record_id())));
        assert!(text.contains("Content-Length: 21\r\n"));
        assert!(text.ends_with("{}\r\n\r\n"));
    }

    #[test]
    fn binary_payload_is_framed_unchanged() {
        let request = ArchiveRecord::request("https://h/a", "GET /a HTTP/1.1\r\n\r\n".into());
        let body = vec![0x3c, 0xe9, 0xff, 0x3e];
        let response = ArchiveRecord::response("https://h/a", body.clone(), &request);
        let warc = response.to_warc();
        assert!(warc.ends_with(&[0x3c, 0xe9, 0xff, 0x3e, b'\r', b'\n', b'\r', b'\n']));
        let digest = format!("WARC-Block-Digest: sha256:{}\r\n", hex_digest(&body));
        assert!(String::from_utf8_lossy(&warc).contains(&digest));
    }

    /// In-memory file that refuses writes past `capacity`.
    struct ShortFile {
        data: io::Cursor<Vec<u8>>,
        capacity: usize,
    }

    impl Write for ShortFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.capacity.saturating_sub(self.data.position() as usize);
            if room == 0 {
                return Err(io::Error::other("no space left on device"));
            }
            self.data.write(&buf[..buf.len().min(room)])
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for ShortFile {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.data.seek(pos)
        }
    }

    impl Truncate for ShortFile {
        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.data.get_mut().truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn failed_pair_write_leaves_no_partial_record() {
        let info = ArchiveRecord::warcinfo(&[("warc-id", "run")]).to_warc();
        let request = ArchiveRecord::request("https://h/a", "GET /a HTTP/1.1\r\n\r\n".into());
        let response = ArchiveRecord::response("https://h/a", b"HTTP/1.1 200 OK\r\n\r\n{}".to_vec(), &request);
        let mut pair = request.to_warc();
        pair.extend_from_slice(&response.to_warc());
        // Room for the warcinfo and the request, but not the response.
        let mut out = ShortFile {
            data: io::Cursor::new(Vec::new()),
            capacity: info.len() + request.to_warc().len() + 10,
        };

        append_whole(&mut out, &info).unwrap();
        assert!(append_whole(&mut out, &pair).is_err());

        assert_eq!(out.data.get_ref(), &info);
        assert_eq!(out.data.position(), info.len() as u64);
    }

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            hex_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
