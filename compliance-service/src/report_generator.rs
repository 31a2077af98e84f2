//! Compliance Report Generator
//!
//! Reports over the audit ledger for operators and auditors:
//! - Tamper reports (integrity verification per chain)
//! - Retention reports (archival advisory per entry)
//!
//! Both render as JSON (whole document) or CSV (one line per row).

use chrono::{NaiveDate, Utc};
use ledger_core::{storage::ScannedEntry, ChainId, Ledger, RetentionPolicy};
use uuid::Uuid;

use crate::error::{ReportError, Result};
use crate::types::{
    Report, ReportConfig, ReportFile, ReportFormat, RetentionReport, RetentionRow, TamperReport,
};

/// Compliance report generator bound to one ledger
#[derive(Debug)]
pub struct ComplianceReporter<'a> {
    ledger: &'a Ledger,
    config: ReportConfig,
}

impl<'a> ComplianceReporter<'a> {
    pub fn new(ledger: &'a Ledger, config: ReportConfig) -> Result<Self> {
        // Create output directory
        std::fs::create_dir_all(&config.output_dir)?;

        Ok(Self { ledger, config })
    }

    /// Verify one chain and summarize the result
    pub fn tamper_report(&self, chain: &ChainId) -> Result<TamperReport> {
        let check = self.ledger.verify_detailed(chain)?;

        let report = TamperReport {
            report_id: Uuid::new_v4(),
            chain_id: check.chain_id.clone(),
            generated_at: Utc::now(),
            valid: check.is_valid(),
            total_entries: check.total_entries,
            invalid_entry_ids: check.invalid_entry_ids(),
            violations: check.violations,
        };

        if report.valid {
            tracing::info!(
                chain = %chain,
                entries = report.total_entries,
                "Tamper report: chain intact"
            );
        } else {
            tracing::error!(
                chain = %chain,
                invalid = report.invalid_entry_ids.len(),
                violations = report.violations.len(),
                "Tamper report: chain integrity violated"
            );
        }

        Ok(report)
    }

    /// Tamper reports for every chain in the store
    pub fn tamper_report_all(&self) -> Result<Vec<TamperReport>> {
        self.ledger
            .chains()?
            .iter()
            .map(|chain| self.tamper_report(chain))
            .collect()
    }

    /// Retention status of every readable entry as of a date.
    ///
    /// Unreadable entries are skipped here; the tamper report lists them.
    pub fn retention_report(&self, chain: &ChainId, as_of: NaiveDate) -> Result<RetentionReport> {
        let mut rows = Vec::new();

        for scanned in self.ledger.storage().scan_chain(chain)? {
            let entry = match scanned {
                ScannedEntry::Entry(entry) => entry,
                ScannedEntry::Unreadable { sequence, .. } => {
                    tracing::warn!(chain = %chain, sequence, "Skipping unreadable entry");
                    continue;
                }
            };

            let expires_on = RetentionPolicy::expires_on(&entry.timestamp, entry.retention_years);
            rows.push(RetentionRow {
                entry_id: entry.id,
                sequence: entry.sequence,
                action: entry.action,
                resource_type: entry.resource_type,
                resource_id: entry.resource_id,
                timestamp: entry.timestamp,
                retention_years: entry.retention_years,
                expires_on,
                archivable: as_of > expires_on,
            });
        }

        Ok(RetentionReport {
            report_id: Uuid::new_v4(),
            chain_id: chain.clone(),
            generated_at: Utc::now(),
            as_of,
            rows,
        })
    }

    /// Render a report in the given format
    pub fn render<R: Report>(&self, report: &R, format: ReportFormat) -> Result<Vec<u8>> {
        match format {
            ReportFormat::Json => Ok(serde_json::to_vec_pretty(report)?),
            ReportFormat::Csv => self.render_csv(report),
        }
    }

    fn render_csv<R: Report>(&self, report: &R) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());

        // Explicit header so an empty report still names its columns
        writer.write_record(R::CSV_HEADER)?;
        for row in report.rows() {
            writer.serialize(row)?;
        }

        writer
            .into_inner()
            .map_err(|e| ReportError::Io(e.into_error()))
    }

    /// Render and write a report to the output directory
    pub fn write_report<R: Report>(&self, report: &R, format: ReportFormat) -> Result<ReportFile> {
        let content = self.render(report, format)?;
        let filename = Self::generate_filename::<R>(report, format);
        let file_path = self.config.output_dir.join(filename);

        std::fs::write(&file_path, &content)?;

        tracing::info!(
            path = ?file_path,
            kind = R::KIND,
            mime_type = format.mime_type(),
            "Report written"
        );

        Ok(ReportFile {
            report_id: report.report_id(),
            format,
            file_path,
            file_size: content.len() as u64,
        })
    }

    /// `<kind>_<chain>_<id8>.<ext>`, with the chain id reduced to safe characters
    fn generate_filename<R: Report>(report: &R, format: ReportFormat) -> String {
        let chain: String = report
            .chain_id()
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();

        format!(
            "{}_{}_{}.{}",
            R::KIND,
            chain,
            &report.report_id().simple().to_string()[..8],
            format.extension()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use ledger_core::{AppendRequest, Config, ViolationKind};
    use std::path::Path;
    use tempfile::TempDir;

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.data_dir = dir.join("ledger");
        config
    }

    fn seeded_ledger(dir: &Path) -> (Ledger, ChainId) {
        let ledger = Ledger::open(test_config(dir)).unwrap();
        let chain = ChainId::new("acme/gmbh");
        for (action, resource_type, id) in [
            ("INVOICE_CREATED", "Invoice", "INV-1"),
            ("RECEIPT_FILED", "Receipt", "R-1"),
            ("LETTER_SENT", "BusinessLetter", "L-1"),
        ] {
            ledger
                .append(
                    &chain,
                    AppendRequest::new(action, resource_type, id, "u-1", "seed"),
                )
                .unwrap();
        }
        (ledger, chain)
    }

    fn reporter<'a>(ledger: &'a Ledger, dir: &TempDir) -> ComplianceReporter<'a> {
        ComplianceReporter::new(
            ledger,
            ReportConfig {
                output_dir: dir.path().join("reports"),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_tamper_report_intact_chain() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, chain) = seeded_ledger(dir.path());
        let reporter = reporter(&ledger, &dir);

        let report = reporter.tamper_report(&chain).unwrap();
        assert!(report.valid);
        assert_eq!(report.total_entries, 3);
        assert!(report.violations.is_empty());

        let all = reporter.tamper_report_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].chain_id, chain);
    }

    #[test]
    fn test_tamper_report_flags_edited_entry() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, chain) = seeded_ledger(dir.path());
        let victim = ledger.chain_entries(&chain).unwrap()[1].clone();
        drop(ledger);

        // Edit the stored reason behind the ledger's back
        {
            let mut opts = rocksdb::Options::default();
            opts.set_compaction_style(rocksdb::DBCompactionStyle::Universal);
            let db = rocksdb::DB::open_cf(
                &opts,
                dir.path().join("ledger"),
                ledger_core::Storage::COLUMN_FAMILIES,
            )
            .unwrap();
            let cf = db.cf_handle("entries").unwrap();
            let key = ledger_core::Storage::entry_key(&chain, victim.sequence);
            let mut edited = victim.clone();
            edited.reason = "nothing to see".into();
            db.put_cf(cf, key, serde_json::to_vec(&edited).unwrap())
                .unwrap();
        }

        let ledger = Ledger::open(test_config(dir.path())).unwrap();
        let reporter = reporter(&ledger, &dir);
        let report = reporter.tamper_report(&chain).unwrap();

        assert!(!report.valid);
        assert_eq!(report.invalid_entry_ids, vec![victim.id]);
        assert_eq!(report.violations[0].kind, ViolationKind::HashMismatch);

        let csv = String::from_utf8(reporter.render(&report, ReportFormat::Csv).unwrap()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("entryId,sequence,kind,detail"));
        let row = lines.next().unwrap();
        assert!(row.starts_with(&format!("{},1,HASH_MISMATCH,", victim.id)));
    }

    #[test]
    fn test_retention_report() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, chain) = seeded_ledger(dir.path());
        let reporter = reporter(&ledger, &dir);

        let year = Utc::now().year();
        let today = Utc::now().date_naive();
        let report = reporter.retention_report(&chain, today).unwrap();

        let years: Vec<u32> = report.rows.iter().map(|r| r.retention_years).collect();
        assert_eq!(years, vec![10, 8, 6]);
        assert_eq!(
            report.rows[2].expires_on,
            NaiveDate::from_ymd_opt(year + 6, 12, 31).unwrap()
        );
        assert_eq!(report.archivable().count(), 0);

        let later = NaiveDate::from_ymd_opt(year + 7, 1, 1).unwrap();
        let report = reporter.retention_report(&chain, later).unwrap();
        let archivable: Vec<_> = report.archivable().map(|r| r.resource_id.as_str()).collect();
        assert_eq!(archivable, vec!["L-1"]);
    }

    #[test]
    fn test_empty_csv_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, chain) = seeded_ledger(dir.path());
        let reporter = reporter(&ledger, &dir);

        let report = reporter.tamper_report(&chain).unwrap();
        let csv = reporter.render(&report, ReportFormat::Csv).unwrap();
        assert_eq!(csv, b"entryId,sequence,kind,detail\n");
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, chain) = seeded_ledger(dir.path());
        let reporter = reporter(&ledger, &dir);

        let report = reporter.tamper_report(&chain).unwrap();
        let file = reporter.write_report(&report, ReportFormat::Json).unwrap();

        let name = file.file_path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("tamper_acme_gmbh_"));
        assert!(name.ends_with(".json"));
        assert_eq!(file.report_id, report.report_id);

        let written: TamperReport =
            serde_json::from_slice(&std::fs::read(&file.file_path).unwrap()).unwrap();
        assert_eq!(written, report);
        assert_eq!(file.file_size, std::fs::metadata(&file.file_path).unwrap().len());
    }

    #[test]
    fn test_report_format() {
        assert_eq!("CSV".parse::<ReportFormat>().unwrap(), ReportFormat::Csv);
        assert_eq!(ReportFormat::Json.mime_type(), "application/json");
        assert!(matches!(
            "xlsx".parse::<ReportFormat>(),
            Err(ReportError::UnknownFormat(_))
        ));
    }
}
