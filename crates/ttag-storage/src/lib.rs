//! Persistence and transport for the tagging pipeline: the record store,
//! on-disk copies of raw responses, and the retrying HTTP fetcher.

pub mod archive;
pub mod http;
pub mod records;

pub use archive::{ArchivedBody, ResponseArchive, ResponseBody, LATEST_RESPONSE_FILE};
pub use http::{
    classify_reqwest_error, classify_status, status_error, BackoffPolicy, FetchError,
    FetchedResponse, HttpClientConfig, HttpFetcher, RetryDisposition,
};
pub use records::{
    memory::MemoryRecordStore, postgres::PgRecordStore, DatabaseConfig, RecordStore, StoreError,
};

pub const CRATE_NAME: &str = "ttag-storage";
