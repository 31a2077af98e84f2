pub mod error;
pub mod report_generator;
pub mod types;

pub use error::{ReportError, Result};
pub use report_generator::ComplianceReporter;
pub use types::{
    Report, ReportConfig, ReportFile, ReportFormat, RetentionReport, RetentionRow, TamperReport,
};
