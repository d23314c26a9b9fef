//! Persistence and HTTP plumbing for Democracy Watcher: the row-store contract
//! used by the importer, its Postgres and in-memory implementations, a raw page
//! archive and a retrying HTTP fetcher.

mod archive;
mod http;
mod memory;
mod pg;
mod store;

pub use archive::{ArchivedPage, PageArchive};
pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchedResponse,
    HttpClientConfig, HttpFetcher, RetryDisposition,
};
pub use memory::MemoryStore;
pub use pg::PgStore;
pub use store::{
    AnswererRow, ImportStatus, ImportStore, LegislatorInsert, LegislatorSpeechCount, NameIndex,
    SpeechInsert, SpeechWindowRow, StoreError, ANSWERER_SAMPLE_SIZE, ANSWERER_SCAN_LIMIT,
};

pub const CRATE_NAME: &str = "dwatch-storage";
