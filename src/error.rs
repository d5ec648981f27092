//! Error types for a merge export run.
//!
//! Malformed link data is deliberately absent here: empty or odd references
//! pass through as empty identifiers and never fail a run.

use thiserror::Error;

/// Failure while fetching records from the FHIR server.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("FHIR server returned {status} for {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("could not decode search bundle from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid FHIR url: {0}")]
    InvalidUrl(String),

    /// A `next` link pointed back at a page already fetched in this search.
    #[error("search paging loops back to {url}")]
    PagingLoop { url: String },

    /// Source failures raised by non-HTTP record sources.
    #[error("record source failed: {0}")]
    Source(String),
}

/// Failure while building the CSV document.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("value {value:?} cannot be represented in {encoding} output")]
    Encoding { value: String, encoding: &'static str },

    #[error("value {value:?} contains a comma, quote or line break")]
    Delimiter { value: String },

    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV buffer could not be finalised: {0}")]
    Buffer(String),
}

/// Failure while handing the document to durable storage.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("storage request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("storage returned {status} for {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("blob {0} already exists")]
    AlreadyExists(String),

    #[error("storage I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid storage url: {0}")]
    InvalidUrl(String),
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Any failure that aborts a single export run.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("a previous run is still in progress")]
    AlreadyRunning,
}
