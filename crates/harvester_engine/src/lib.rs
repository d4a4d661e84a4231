//! Harvester engine: captured API calls, archive records and the harvest driver.
mod api;
mod archive;
mod audit;
mod capture;
mod checkpoint;
mod flickr;
mod harvest;
mod persist;
mod resolve;
mod transport;

pub use api::{ApiError, ItemDetail, Profile, RemoteApi, Variant};
pub use archive::{
    warc_location, ArchiveError, ArchiveRecord, ArchiveSink, MemoryArchive, RecordKind,
    WarcWriter,
};
pub use audit::AuditEntry;
pub use capture::{
    capture, parse_trace, CaptureError, Captured, ParsedTrace, RequestBlock, ResponseBlock,
    TraceEvent, TraceSession, Tracer,
};
pub use checkpoint::{
    CheckpointError, CheckpointStore, JsonCheckpointStore, MemoryCheckpointStore,
    NullCheckpointStore, STATE_FILENAME,
};
pub use flickr::{ApiSettings, ArchiveSummary, FlickrApi, FLICKR_HOST};
pub use harvest::{checkpoint_key, HarvestError, Harvester, CHECKPOINT_NAMESPACE};
pub use persist::{ensure_output_dir, read_if_exists, AtomicFileWriter, PersistError};
pub use resolve::{resolve, Resolution};
pub use transport::{
    HttpMethod, HttpTransport, Interceptor, RawResponse, ReqwestTransport, RequestHead,
    ResponseHead, TransportError, TransportSettings,
};
