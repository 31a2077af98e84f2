use chrono::{DateTime, NaiveDate, Utc};
use ledger_core::{ChainId, IntegrityViolation};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ReportError;

/// Report format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json, // .json (archival, API consumption)
    Csv,  // .csv (auditor spreadsheets)
}

impl ReportFormat {
    pub fn extension(&self) -> &str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            ReportFormat::Json => "application/json",
            ReportFormat::Csv => "text/csv",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            other => Err(ReportError::UnknownFormat(other.to_string())),
        }
    }
}

/// A renderable report: JSON renders the whole document, CSV one line per row
pub trait Report: Serialize {
    /// Row type of the CSV rendering
    type Row: Serialize;

    /// File name prefix
    const KIND: &'static str;

    /// CSV header, in row field order
    const CSV_HEADER: &'static [&'static str];

    fn report_id(&self) -> Uuid;

    fn chain_id(&self) -> &ChainId;

    fn rows(&self) -> &[Self::Row];
}

/// Integrity verification result for one chain, for operators and auditors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TamperReport {
    pub report_id: Uuid,
    pub chain_id: ChainId,
    pub generated_at: DateTime<Utc>,
    pub valid: bool,
    pub total_entries: u64,
    pub invalid_entry_ids: Vec<Uuid>,
    pub violations: Vec<IntegrityViolation>,
}

impl Report for TamperReport {
    type Row = IntegrityViolation;

    const KIND: &'static str = "tamper";

    const CSV_HEADER: &'static [&'static str] = &["entryId", "sequence", "kind", "detail"];

    fn report_id(&self) -> Uuid {
        self.report_id
    }

    fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    fn rows(&self) -> &[IntegrityViolation] {
        &self.violations
    }
}

/// Retention status of one entry (advisory; nothing is ever deleted)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetentionRow {
    pub entry_id: Uuid,
    pub sequence: u64,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub timestamp: DateTime<Utc>,
    pub retention_years: u32,
    pub expires_on: NaiveDate,
    /// Retention period is over as of the report date
    pub archivable: bool,
}

/// Retention overview of one chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetentionReport {
    pub report_id: Uuid,
    pub chain_id: ChainId,
    pub generated_at: DateTime<Utc>,
    pub as_of: NaiveDate,
    pub rows: Vec<RetentionRow>,
}

impl RetentionReport {
    /// Entries whose retention period is over
    pub fn archivable(&self) -> impl Iterator<Item = &RetentionRow> {
        self.rows.iter().filter(|row| row.archivable)
    }
}

impl Report for RetentionReport {
    type Row = RetentionRow;

    const KIND: &'static str = "retention";

    const CSV_HEADER: &'static [&'static str] = &[
        "entryId",
        "sequence",
        "action",
        "resourceType",
        "resourceId",
        "timestamp",
        "retentionYears",
        "expiresOn",
        "archivable",
    ];

    fn report_id(&self) -> Uuid {
        self.report_id
    }

    fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    fn rows(&self) -> &[RetentionRow] {
        &self.rows
    }
}

/// A report written to disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportFile {
    pub report_id: Uuid,
    pub format: ReportFormat,
    pub file_path: PathBuf,
    pub file_size: u64,
}

/// Report generator configuration
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./data/reports"),
        }
    }
}
