//! Settings loader.
//!
//! Settings start from built-in defaults, are overlaid by an optional YAML
//! file, and finally by environment variables (after `.env` is loaded by the
//! binary). The result is validated once at startup.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, FetchError, SinkError};
use crate::extraction::PairOrder;
use crate::fhir::{FhirClient, FhirConfig};
use crate::serialization::{OutputEncoding, DEFAULT_SYSTEM_LABEL};
use crate::storage::{validate_container_name, AzureBlobConfig, AzureBlobSink, BlobSink, LocalDirSink};

const REDACTED: &str = "<redacted>";

/// Complete service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub fhir: FhirSettings,
    pub storage: StorageSettings,
    pub job: JobSettings,
    pub schedule: ScheduleSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FhirSettings {
    pub base_url: String,
    pub bearer_token: Option<String>,
    pub page_size: u32,
    pub timeout_secs: u64,
}

impl Default for FhirSettings {
    fn default() -> Self {
        let defaults = FhirConfig::default();
        Self {
            base_url: defaults.base_url,
            bearer_token: None,
            page_size: defaults.page_size,
            timeout_secs: defaults.timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Azure,
    #[default]
    Local,
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "azure" => Ok(StorageKind::Azure),
            "local" => Ok(StorageKind::Local),
            other => Err(format!("unknown storage kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub kind: StorageKind,
    pub account_url: Option<String>,
    pub sas_token: Option<String>,
    pub container: String,
    pub local_root: PathBuf,
    pub timeout_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            kind: StorageKind::Local,
            account_url: None,
            sas_token: None,
            container: "merged-patients".to_string(),
            local_root: PathBuf::from("./output"),
            timeout_secs: 60,
        }
    }
}

/// Settings that shape a single export run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub system_label: String,
    pub pair_order: PairOrder,
    pub encoding: OutputEncoding,
    /// Append a random suffix to blob names so sub-second reruns cannot collide.
    pub unique_suffix: bool,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            system_label: DEFAULT_SYSTEM_LABEL.to_string(),
            pair_order: PairOrder::Sorted,
            encoding: OutputEncoding::Utf8,
            unique_suffix: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Six-field cron expression (seconds first).
    pub cron: String,
    pub run_on_startup: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            cron: "0 0 */4 * * *".to_string(),
            run_on_startup: true,
        }
    }
}

impl Settings {
    /// Load settings from an optional YAML file and the process environment.
    ///
    /// # Example
    /// ```ignore
    /// use fhirlink::runtime::Settings;
    ///
    /// let settings = Settings::load(Some("config/fhirlink.yaml".as_ref()))?;
    /// println!("Exporting to container {}", settings.storage.container);
    /// ```
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a YAML file; missing keys keep their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Overlay values found through `lookup`, keyed by environment variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FHIR_URL") {
            self.fhir.base_url = v;
        }
        if let Some(v) = lookup("FHIR_BEARER_TOKEN") {
            self.fhir.bearer_token = Some(v).filter(|t| !t.is_empty());
        }
        if let Some(v) = lookup("FHIR_PAGE_SIZE") {
            self.fhir.page_size = parse_value("FHIR_PAGE_SIZE", &v)?;
        }
        if let Some(v) = lookup("FHIR_TIMEOUT_SECS") {
            self.fhir.timeout_secs = parse_value("FHIR_TIMEOUT_SECS", &v)?;
        }

        if let Some(v) = lookup("STORAGE_KIND") {
            self.storage.kind = parse_value("STORAGE_KIND", &v)?;
        }
        if let Some(v) = lookup("AZURE_STORAGE_ACCOUNT_URL") {
            self.storage.account_url = Some(v).filter(|u| !u.is_empty());
        }
        if let Some(v) = lookup("AZURE_STORAGE_SAS_TOKEN") {
            self.storage.sas_token = Some(v).filter(|t| !t.is_empty());
        }
        if let Some(v) = lookup("STORAGE_CONTAINER") {
            self.storage.container = v;
        }
        if let Some(v) = lookup("STORAGE_LOCAL_ROOT") {
            self.storage.local_root = PathBuf::from(v);
        }

        if let Some(v) = lookup("SYSTEM_LABEL") {
            self.job.system_label = v;
        }
        if let Some(v) = lookup("PAIR_ORDER") {
            self.job.pair_order = parse_value("PAIR_ORDER", &v)?;
        }
        if let Some(v) = lookup("OUTPUT_ENCODING") {
            self.job.encoding = parse_value("OUTPUT_ENCODING", &v)?;
        }
        if let Some(v) = lookup("UNIQUE_SUFFIX") {
            self.job.unique_suffix = parse_flag("UNIQUE_SUFFIX", &v)?;
        }

        if let Some(v) = lookup("SCHEDULE_CRON") {
            self.schedule.cron = v;
        }
        if let Some(v) = lookup("RUN_ON_STARTUP") {
            self.schedule.run_on_startup = parse_flag("RUN_ON_STARTUP", &v)?;
        }

        Ok(())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fhir.base_url.trim().is_empty() {
            return Err(invalid("fhir.base_url", "must not be empty"));
        }
        if self.fhir.page_size == 0 {
            return Err(invalid("fhir.page_size", "must be greater than zero"));
        }

        validate_container_name(&self.storage.container)
            .map_err(|message| ConfigError::Invalid {
                key: "storage.container",
                message,
            })?;

        if self.storage.kind == StorageKind::Azure && self.storage.account_url.is_none() {
            return Err(invalid(
                "storage.account_url",
                "required when storage.kind is azure",
            ));
        }

        if self.job.system_label.trim().is_empty() {
            return Err(invalid("job.system_label", "must not be empty"));
        }

        let fields = self.schedule.cron.split_whitespace().count();
        if fields != 6 {
            return Err(invalid(
                "schedule.cron",
                format!(
                    "expected six fields (sec min hour day month weekday), found {}",
                    fields
                ),
            ));
        }

        Ok(())
    }

    /// Copy with secrets replaced, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.fhir.bearer_token.is_some() {
            copy.fhir.bearer_token = Some(REDACTED.to_string());
        }
        if copy.storage.sas_token.is_some() {
            copy.storage.sas_token = Some(REDACTED.to_string());
        }
        copy
    }

    pub fn fhir_config(&self) -> FhirConfig {
        FhirConfig {
            base_url: self.fhir.base_url.clone(),
            bearer_token: self.fhir.bearer_token.clone(),
            page_size: self.fhir.page_size,
            timeout: Duration::from_secs(self.fhir.timeout_secs),
        }
    }

    pub fn build_source(&self) -> Result<FhirClient, FetchError> {
        FhirClient::new(self.fhir_config())
    }

    pub fn build_sink(&self) -> Result<Arc<dyn BlobSink>, SinkError> {
        match self.storage.kind {
            StorageKind::Local => Ok(Arc::new(LocalDirSink::new(&self.storage.local_root))),
            StorageKind::Azure => {
                let account_url = self.storage.account_url.clone().ok_or_else(|| {
                    SinkError::InvalidUrl("storage.account_url is not set".to_string())
                })?;
                let sink = AzureBlobSink::new(AzureBlobConfig {
                    account_url,
                    sas_token: self.storage.sas_token.clone(),
                    timeout: Duration::from_secs(self.storage.timeout_secs),
                })?;
                Ok(Arc::new(sink))
            }
        }
    }
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.into(),
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, format!("'{}': {}", raw, e)))
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(invalid(key, format!("'{}' is not a boolean", other))),
    }
}
