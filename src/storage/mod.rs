//! Blob storage sinks for finished exports.
//!
//! A sink receives the complete CSV document in one call and commits it
//! atomically, so a blob that exists is always a whole export. Commits never
//! overwrite an existing blob.

pub mod azure;
pub mod local;

use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::SinkError;

pub use azure::{AzureBlobConfig, AzureBlobSink};
pub use local::LocalDirSink;

/// Prefix of every export blob name.
pub const BLOB_PREFIX: &str = "merged_patients_";

/// Durable destination for export documents.
#[async_trait]
pub trait BlobSink: Send + Sync {
    /// Create the container if it does not exist yet.
    async fn ensure_container(&self, container: &str) -> Result<(), SinkError>;

    /// Store `bytes` as `blob_name` in one step.
    ///
    /// Returns the location of the stored blob. Fails with
    /// [`SinkError::AlreadyExists`] rather than replacing an existing blob.
    async fn commit(
        &self,
        container: &str,
        blob_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, SinkError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Blob name for an export started at `timestamp`.
///
/// `merged_patients_<yyyyMMdd_HHmmss>.csv`, with `_<suffix>` before the
/// extension when a suffix is given.
pub fn blob_name(timestamp: DateTime<Utc>, suffix: Option<&str>) -> String {
    let stamp = timestamp.format("%Y%m%d_%H%M%S");
    match suffix {
        Some(suffix) if !suffix.is_empty() => format!("{}{}_{}.csv", BLOB_PREFIX, stamp, suffix),
        _ => format!("{}{}.csv", BLOB_PREFIX, stamp),
    }
}

/// Check a container name against Azure Blob naming rules.
///
/// 3-63 characters of lowercase letters, digits and single hyphens, starting
/// and ending with a letter or digit.
pub fn validate_container_name(name: &str) -> Result<(), String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("container name pattern is valid")
    });

    if !(3..=63).contains(&name.len()) {
        return Err(format!(
            "container name '{}' must be 3-63 characters long",
            name
        ));
    }
    if !pattern.is_match(name) {
        return Err(format!(
            "container name '{}' may only contain lowercase letters, digits and single hyphens",
            name
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_blob_name() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 7, 4, 5, 9).unwrap();

        assert_eq!(blob_name(ts, None), "merged_patients_20240307_040509.csv");
        assert_eq!(
            blob_name(ts, Some("1a2b3c4d")),
            "merged_patients_20240307_040509_1a2b3c4d.csv"
        );
        assert_eq!(blob_name(ts, Some("")), "merged_patients_20240307_040509.csv");
    }

    #[test]
    fn test_valid_container_names() {
        assert!(validate_container_name("test").is_ok());
        assert!(validate_container_name("merged-patients").is_ok());
        assert!(validate_container_name("abc").is_ok());
        assert!(validate_container_name("data-lake-2024").is_ok());
    }

    #[test]
    fn test_invalid_container_names() {
        assert!(validate_container_name("ab").is_err());
        assert!(validate_container_name(&"a".repeat(64)).is_err());
        assert!(validate_container_name("Merged").is_err());
        assert!(validate_container_name("-merged").is_err());
        assert!(validate_container_name("merged-").is_err());
        assert!(validate_container_name("merged--patients").is_err());
        assert!(validate_container_name("merged_patients").is_err());
    }
}
