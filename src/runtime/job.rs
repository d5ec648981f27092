//! Merge export job.
//!
//! One run fetches every linked patient, extracts merge pairs, renders the CSV
//! and commits it to the sink. The record source and sink are injected once at
//! startup and shared read-only by every run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::JobError;
use crate::extraction::LinkExtractor;
use crate::runtime::config_loader::JobSettings;
use crate::serialization::CsvExporter;
use crate::source::{RecordQuery, RecordSource};
use crate::storage::{blob_name, BlobSink};

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records_scanned: usize,
    pub pairs_written: usize,
    pub duplicates_collapsed: usize,
    pub empty_targets: usize,
    pub blob_name: String,
    pub location: String,
    pub bytes_written: usize,
}

pub struct MergeExportJob {
    source: Arc<dyn RecordSource>,
    sink: Arc<dyn BlobSink>,
    container: String,
    settings: JobSettings,
    /// Held for the duration of a run; overlapping triggers are skipped.
    run_lock: Mutex<()>,
}

impl MergeExportJob {
    pub fn new(
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn BlobSink>,
        container: impl Into<String>,
        settings: JobSettings,
    ) -> Self {
        Self {
            source,
            sink,
            container: container.into(),
            settings,
            run_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Run one export and report the outcome.
    ///
    /// Fails with [`JobError::AlreadyRunning`] without doing any work when
    /// another run holds the lock. Nothing is committed unless every step
    /// before the commit succeeded.
    pub async fn run_once(&self) -> Result<RunSummary, JobError> {
        let _guard = self.run_lock.try_lock().map_err(|_| JobError::AlreadyRunning)?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let query = RecordQuery::linked_patients(None);
        tracing::info!(%run_id, "Querying records with links");

        let extractor = LinkExtractor::new(self.settings.pair_order);
        let extraction = extractor.extract_stream(self.source.search(&query)).await?;
        let stats = extraction.stats;

        tracing::info!(
            %run_id,
            records = stats.records_scanned,
            pairs = extraction.pairs.len(),
            "Extracted merge pairs"
        );
        if stats.duplicates_collapsed > 0 {
            tracing::warn!(
                %run_id,
                "Collapsed {} duplicate merge pairs",
                stats.duplicates_collapsed
            );
        }

        tracing::info!(%run_id, "Building CSV of merged patients");
        let exporter = CsvExporter::new(self.settings.system_label.clone(), self.settings.encoding);
        let bytes = exporter.export(&extraction.pairs)?;
        let bytes_written = bytes.len();

        self.sink.ensure_container(&self.container).await?;

        let suffix = self
            .settings
            .unique_suffix
            .then(|| Uuid::new_v4().simple().to_string()[..8].to_string());
        let name = blob_name(started_at, suffix.as_deref());

        tracing::info!(%run_id, "Uploading {} to {}", name, self.sink.describe());
        let location = self.sink.commit(&self.container, &name, bytes).await?;

        Ok(RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            records_scanned: stats.records_scanned,
            pairs_written: extraction.pairs.len(),
            duplicates_collapsed: stats.duplicates_collapsed,
            empty_targets: stats.empty_targets,
            blob_name: name,
            location,
            bytes_written,
        })
    }

    /// Run one export, logging instead of returning failures.
    ///
    /// This is what the scheduler calls: a failed run is logged and the next
    /// trigger retries from scratch.
    pub async fn run_logged(&self) -> Option<RunSummary> {
        tracing::info!("Run started at {}", Utc::now());

        let outcome = match self.run_once().await {
            Ok(summary) => {
                tracing::info!(
                    run_id = %summary.run_id,
                    pairs = summary.pairs_written,
                    bytes = summary.bytes_written,
                    "Uploaded {} to {}",
                    summary.blob_name,
                    summary.location
                );
                Some(summary)
            }
            Err(JobError::AlreadyRunning) => {
                tracing::warn!("Skipping trigger: a previous run is still in progress");
                None
            }
            Err(e) => {
                tracing::error!("Run failed at {}: {}", Utc::now(), e);
                None
            }
        };

        tracing::info!("Run completed at {}", Utc::now());
        outcome
    }
}
