use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Data formats accepted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    #[default]
    Csv,
    Tsv,
    Scsv,
    Sohsv,
    Psv,
    Txt,
    Raw,
    Tsve,
    Json,
    MultiJson,
    SingleJson,
    Avro,
    ApacheAvro,
    Parquet,
    Orc,
    W3CLogFile,
}

impl DataFormat {
    /// Name used on the wire (`streamFormat`, `format` property).
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Tsv => "tsv",
            DataFormat::Scsv => "scsv",
            DataFormat::Sohsv => "sohsv",
            DataFormat::Psv => "psv",
            DataFormat::Txt => "txt",
            DataFormat::Raw => "raw",
            DataFormat::Tsve => "tsve",
            DataFormat::Json => "json",
            DataFormat::MultiJson => "multijson",
            DataFormat::SingleJson => "singlejson",
            DataFormat::Avro => "avro",
            DataFormat::ApacheAvro => "apacheavro",
            DataFormat::Parquet => "parquet",
            DataFormat::Orc => "orc",
            DataFormat::W3CLogFile => "w3clogfile",
        }
    }

    /// Binary container formats carry their own compression.
    pub fn is_compressible(&self) -> bool {
        !matches!(
            self,
            DataFormat::Avro
                | DataFormat::ApacheAvro
                | DataFormat::Parquet
                | DataFormat::Orc
        )
    }

    /// Formats the service can only map by column name.
    pub fn is_mapping_bound(&self) -> bool {
        matches!(
            self,
            DataFormat::Json
                | DataFormat::MultiJson
                | DataFormat::SingleJson
                | DataFormat::Avro
                | DataFormat::ApacheAvro
                | DataFormat::Parquet
                | DataFormat::Orc
                | DataFormat::W3CLogFile
        )
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which outcomes the service reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReportLevel {
    #[default]
    FailuresOnly,
    None,
    FailuresAndSuccesses,
}

impl ReportLevel {
    pub fn code(&self) -> u8 {
        match self {
            ReportLevel::FailuresOnly => 0,
            ReportLevel::None => 1,
            ReportLevel::FailuresAndSuccesses => 2,
        }
    }
}

/// Where the service writes status reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReportMethod {
    #[default]
    Queue,
    Table,
    QueueAndTable,
}

impl ReportMethod {
    pub fn code(&self) -> u8 {
        match self {
            ReportMethod::Queue => 0,
            ReportMethod::Table => 1,
            ReportMethod::QueueAndTable => 2,
        }
    }

    pub fn uses_table(&self) -> bool {
        matches!(self, ReportMethod::Table | ReportMethod::QueueAndTable)
    }
}

/// Target and options for one ingestion call.
///
/// Plain data: build once and share across calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionProperties {
    pub database: String,
    pub table: String,
    pub format: DataFormat,
    pub mapping_reference: Option<String>,
    /// Reject mapping-bound formats that have no mapping reference.
    pub require_mapping: bool,
    pub flush_immediately: bool,
    pub ignore_first_record: bool,
    pub retain_blob_on_success: bool,
    pub report_level: ReportLevel,
    pub report_method: ReportMethod,
    pub ingest_by_tags: Vec<String>,
    pub drop_by_tags: Vec<String>,
    pub additional_tags: Vec<String>,
    pub ingest_if_not_exists: Vec<String>,
    pub additional_properties: BTreeMap<String, String>,
}

impl IngestionProperties {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            format: DataFormat::default(),
            mapping_reference: None,
            require_mapping: false,
            flush_immediately: false,
            ignore_first_record: false,
            retain_blob_on_success: true,
            report_level: ReportLevel::default(),
            report_method: ReportMethod::default(),
            ingest_by_tags: Vec::new(),
            drop_by_tags: Vec::new(),
            additional_tags: Vec::new(),
            ingest_if_not_exists: Vec::new(),
            additional_properties: BTreeMap::new(),
        }
    }

    pub fn with_format(mut self, format: DataFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_mapping(mut self, mapping_reference: impl Into<String>) -> Self {
        self.mapping_reference = Some(mapping_reference.into());
        self
    }

    pub fn with_flush_immediately(mut self, flush: bool) -> Self {
        self.flush_immediately = flush;
        self
    }

    pub fn with_report(mut self, level: ReportLevel, method: ReportMethod) -> Self {
        self.report_level = level;
        self.report_method = method;
        self
    }

    pub fn with_ingest_by_tag(mut self, tag: impl Into<String>) -> Self {
        self.ingest_by_tags.push(tag.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_properties.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.database.trim().is_empty() {
            return Err(IngestError::InvalidProperties("database is empty".into()));
        }
        if self.table.trim().is_empty() {
            return Err(IngestError::InvalidProperties("table is empty".into()));
        }
        if let Some(mapping) = &self.mapping_reference {
            if mapping.trim().is_empty() {
                return Err(IngestError::InvalidProperties(
                    "mapping reference is empty".into(),
                ));
            }
        }
        if self.require_mapping && self.format.is_mapping_bound() && self.mapping_reference.is_none()
        {
            return Err(IngestError::InvalidProperties(format!(
                "format {} requires a mapping reference",
                self.format
            )));
        }
        if let Some(key) = self.additional_properties.keys().find(|k| k.is_empty()) {
            return Err(IngestError::InvalidProperties(format!(
                "additional property key {key:?} is empty"
            )));
        }
        Ok(())
    }

    /// Tag list in the service's `tags` property form (`ingest-by:`/`drop-by:` prefixes).
    pub fn all_tags(&self) -> Vec<String> {
        self.additional_tags
            .iter()
            .cloned()
            .chain(self.ingest_by_tags.iter().map(|t| format!("ingest-by:{t}")))
            .chain(self.drop_by_tags.iter().map(|t| format!("drop-by:{t}")))
            .collect()
    }
}
