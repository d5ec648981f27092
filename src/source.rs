//! Record source abstraction.
//!
//! The export only needs one capability from a records server: search for
//! records that carry links, projected to id and links, as a lazily paginated
//! stream.

use futures_util::stream::{self, BoxStream, StreamExt};

use crate::error::FetchError;
use crate::record::Record;

/// Stream of records produced by a [`RecordSource`].
pub type RecordStream<'a> = BoxStream<'a, Result<Record, FetchError>>;

/// Search parameters for the merge export query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    /// Resource type to search, e.g. `Patient`.
    pub resource_type: String,
    /// Only return records that have at least one link.
    pub require_links: bool,
    /// Elements to project; servers may ignore this and return full resources.
    pub elements: Vec<String>,
    /// Requested page size, if any.
    pub page_size: Option<u32>,
}

impl RecordQuery {
    /// Patients with links, projected to `id` and `link`.
    pub fn linked_patients(page_size: Option<u32>) -> Self {
        Self {
            resource_type: "Patient".to_string(),
            require_links: true,
            elements: vec!["id".to_string(), "link".to_string()],
            page_size,
        }
    }
}

/// A searchable repository of records.
///
/// Implementations are created once at startup and shared read-only between
/// runs.
pub trait RecordSource: Send + Sync {
    /// Start a search. Pages are fetched as the stream is polled.
    fn search<'a>(&'a self, query: &'a RecordQuery) -> RecordStream<'a>;
}

/// Fixed, in-memory record source.
///
/// Yields its records regardless of the query. Used for local dry runs and
/// tests.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    records: Vec<Record>,
}

impl InMemorySource {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordSource for InMemorySource {
    fn search<'a>(&'a self, _query: &'a RecordQuery) -> RecordStream<'a> {
        stream::iter(self.records.iter().cloned().map(Ok)).boxed()
    }
}
