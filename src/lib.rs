//! # fhirlink: Merged Patient Export
//!
//! fhirlink scans a FHIR server for patients that have been merged into other
//! patients and writes every merge relationship to a CSV file for data lake
//! ingestion. Each run is a full rebuild; nothing is carried between runs.
//!
//! ## Pipeline
//!
//! - **Record source**: paged `Patient?link:missing=false` search, projected to `id` and `link`
//! - **Link extraction**: keeps `replaced-by` links, reduces references to their last path segment, deduplicates pairs
//! - **CSV export**: fixed `Entity1,Entity1Key,Entity2,Entity2Key` header, one row per pair
//! - **Blob sink**: atomic, no-overwrite commit to Azure Blob Storage or a local directory
//!
//! ## Example
//!
//! ```
//! use fhirlink::{CsvExporter, Link, LinkExtractor, Record};
//!
//! let records = vec![
//!     Record::new("A", vec![Link::replaced_by("Patient/B")]),
//!     Record::new("C", vec![]),
//! ];
//!
//! let extraction = LinkExtractor::default().extract(records);
//! let csv = CsvExporter::default().export(&extraction.pairs).unwrap();
//!
//! assert_eq!(
//!     String::from_utf8(csv).unwrap(),
//!     "Entity1,Entity1Key,Entity2,Entity2Key\n\
//!      AzureAPIforFHIR_Patient,A,AzureAPIforFHIR_Patient,B\n"
//! );
//! ```

// Core modules
pub mod error;
pub mod record;
pub mod extraction;
pub mod serialization;
pub mod source;

// FHIR REST client
pub mod fhir;

// Blob storage sinks
pub mod storage;

// Configuration, job and scheduler
pub mod runtime;

// Re-export key types
pub use error::{ConfigError, ExportError, FetchError, JobError, SinkError};
pub use record::{Link, LinkType, MergePair, Record};
pub use extraction::{target_id_from_reference, Extraction, ExtractionStats, LinkExtractor, MergePairSet, PairOrder};
pub use serialization::{CsvExporter, OutputEncoding, CSV_HEADER, DEFAULT_SYSTEM_LABEL};
pub use source::{InMemorySource, RecordQuery, RecordSource, RecordStream};

pub use fhir::{FhirClient, FhirConfig};
pub use storage::{blob_name, AzureBlobConfig, AzureBlobSink, BlobSink, LocalDirSink};
pub use runtime::{MergeExportJob, RunSummary, Settings};
