//! CSV serialization of merge pairs.
//!
//! The document is built fully in memory so that a sink only ever sees a
//! complete file.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ExportError;
use crate::extraction::MergePairSet;

/// Fixed header row of the merge export.
pub const CSV_HEADER: [&str; 4] = ["Entity1", "Entity1Key", "Entity2", "Entity2Key"];

/// System label written in both entity columns unless configured otherwise.
pub const DEFAULT_SYSTEM_LABEL: &str = "AzureAPIforFHIR_Patient";

/// Character encoding of the exported bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEncoding {
    #[default]
    Utf8,
    /// 7-bit ASCII; any other character is an [`ExportError::Encoding`].
    Ascii,
}

impl OutputEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            OutputEncoding::Utf8 => "utf8",
            OutputEncoding::Ascii => "ascii",
        }
    }

    fn check(&self, value: &str) -> Result<(), ExportError> {
        match self {
            OutputEncoding::Utf8 => Ok(()),
            OutputEncoding::Ascii if value.is_ascii() => Ok(()),
            OutputEncoding::Ascii => Err(ExportError::Encoding {
                value: value.to_string(),
                encoding: self.name(),
            }),
        }
    }
}

impl FromStr for OutputEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(OutputEncoding::Utf8),
            "ascii" | "us-ascii" => Ok(OutputEncoding::Ascii),
            other => Err(format!("unsupported output encoding '{}'", other)),
        }
    }
}

impl fmt::Display for OutputEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Writes a [`MergePairSet`] as `Entity1,Entity1Key,Entity2,Entity2Key` rows.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    system_label: String,
    encoding: OutputEncoding,
}

impl Default for CsvExporter {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_LABEL, OutputEncoding::default())
    }
}

impl CsvExporter {
    pub fn new(system_label: impl Into<String>, encoding: OutputEncoding) -> Self {
        Self {
            system_label: system_label.into(),
            encoding,
        }
    }

    pub fn system_label(&self) -> &str {
        &self.system_label
    }

    fn check_field(&self, value: &str) -> Result<(), ExportError> {
        if value.contains([',', '"', '\r', '\n']) {
            return Err(ExportError::Delimiter {
                value: value.to_string(),
            });
        }
        self.encoding.check(value)
    }

    /// Serialize the pair set, one row per pair in set order.
    ///
    /// Lines end with `\n` and fields are written verbatim. A label or id
    /// holding a comma, quote or line break is rejected, so every data line
    /// splits into exactly four fields.
    pub fn export(&self, pairs: &MergePairSet) -> Result<Vec<u8>, ExportError> {
        self.check_field(&self.system_label)?;

        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(Vec::new());

        writer.write_record(CSV_HEADER)?;

        for pair in pairs {
            self.check_field(&pair.source_id)?;
            self.check_field(&pair.target_id)?;

            writer.write_record([
                self.system_label.as_str(),
                pair.source_id.as_str(),
                self.system_label.as_str(),
                pair.target_id.as_str(),
            ])?;
        }

        writer
            .into_inner()
            .map_err(|e| ExportError::Buffer(e.error().to_string()))
    }
}
