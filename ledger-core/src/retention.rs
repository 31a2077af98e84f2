//! Retention classification
//!
//! Maps resource types to the minimum number of years their ledger entries
//! must be preserved. Purely advisory: the ledger never deletes anything,
//! archival tooling reads `retention_years` and [`RetentionPolicy::expires_on`].

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::collections::HashMap;

use crate::config::RetentionConfig;

/// Statutory retention classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionClass {
    /// Books, records, invoices, annual statements, tax filings
    Bookkeeping,
    /// Booking vouchers (receipts)
    Vouchers,
    /// Commercial and business correspondence, contracts
    Correspondence,
}

impl RetentionClass {
    /// Years of retention
    pub fn years(&self) -> u32 {
        match self {
            RetentionClass::Bookkeeping => 10,
            RetentionClass::Vouchers => 8,
            RetentionClass::Correspondence => 6,
        }
    }

    /// Longest class; applied to unknown resource types
    pub fn longest() -> Self {
        RetentionClass::Bookkeeping
    }
}

/// Upper bound for configured retention periods
pub const MAX_RETENTION_YEARS: u32 = 100;

/// Resource type → class. Lookups are case-insensitive.
const RETENTION_TABLE: &[(&str, RetentionClass)] = &[
    ("financialrecord", RetentionClass::Bookkeeping),
    ("invoice", RetentionClass::Bookkeeping),
    ("expense", RetentionClass::Bookkeeping),
    ("banktransaction", RetentionClass::Bookkeeping),
    ("journalentry", RetentionClass::Bookkeeping),
    ("taxreport", RetentionClass::Bookkeeping),
    ("taxfiling", RetentionClass::Bookkeeping),
    ("annualstatement", RetentionClass::Bookkeeping),
    ("inventory", RetentionClass::Bookkeeping),
    ("receipt", RetentionClass::Vouchers),
    ("contract", RetentionClass::Correspondence),
    ("businessletter", RetentionClass::Correspondence),
    ("correspondence", RetentionClass::Correspondence),
    ("datasubject", RetentionClass::Correspondence),
];

/// Retention lookup with startup-time overrides
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    default_years: u32,
    overrides: HashMap<String, u32>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_config(&RetentionConfig::default())
    }
}

impl RetentionPolicy {
    /// Build from configuration
    pub fn from_config(config: &RetentionConfig) -> Self {
        Self {
            // Unknown types never get less than the longest class
            default_years: config.default_years.max(RetentionClass::longest().years()),
            overrides: config
                .overrides
                .iter()
                .map(|(k, v)| (normalize(k), *v))
                .collect(),
        }
    }

    /// Statutory class of a resource type, if listed
    pub fn class_of(resource_type: &str) -> Option<RetentionClass> {
        let key = normalize(resource_type);
        RETENTION_TABLE
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, class)| *class)
    }

    /// Retention years for a resource type
    pub fn years_for(&self, resource_type: &str) -> u32 {
        let key = normalize(resource_type);
        if let Some(years) = self.overrides.get(&key) {
            return *years;
        }
        Self::class_of(&key)
            .map(|class| class.years())
            .unwrap_or(self.default_years)
    }

    /// Last day of retention.
    ///
    /// The period starts at the end of the calendar year in which the entry
    /// was made, so it ends on 31 December of `year + years`. Periods past
    /// the calendar's range saturate to [`NaiveDate::MAX`], never earlier.
    pub fn expires_on(timestamp: &DateTime<Utc>, years: u32) -> NaiveDate {
        i32::try_from(years)
            .ok()
            .and_then(|years| timestamp.year().checked_add(years))
            .and_then(|year| NaiveDate::from_ymd_opt(year, 12, 31))
            .unwrap_or(NaiveDate::MAX)
    }
}

fn normalize(resource_type: &str) -> String {
    resource_type
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
