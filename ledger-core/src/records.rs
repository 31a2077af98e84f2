//! Guarded financial record types
//!
//! - [`Invoice`]: DRAFT → SENT → {OVERDUE, PAID, CANCELLED}; frozen from SENT on
//! - [`Expense`]: draft → booked → archived; frozen from booked on
//! - [`BankTransaction`]: fully frozen once reconciled

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::lifecycle::{FinancialRecord, LifecyclePolicy};

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    /// Editable
    Draft,
    /// Issued to the customer
    Sent,
    /// Past due date
    Overdue,
    /// Settled
    Paid,
    /// Voided (by a correction invoice)
    Cancelled,
}

impl InvoiceStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::Overdue => "OVERDUE",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outgoing invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Record id
    pub id: String,
    /// Invoice number as printed
    pub number: String,
    /// Billed customer
    pub customer: String,
    /// Date of issue
    pub issue_date: NaiveDate,
    /// Payment due date
    pub due_date: NaiveDate,
    /// ISO 4217 code
    pub currency: String,
    /// Amount before tax
    pub net_amount: Decimal,
    /// VAT
    pub tax_amount: Decimal,
    /// Gross amount
    pub total_amount: Decimal,
    /// Lifecycle state
    pub status: InvoiceStatus,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl FinancialRecord for Invoice {
    const RESOURCE_TYPE: &'static str = "Invoice";

    fn record_id(&self) -> String {
        self.id.clone()
    }

    fn lifecycle_state(&self) -> String {
        self.status.as_str().to_string()
    }

    fn policy() -> LifecyclePolicy {
        LifecyclePolicy::new(Self::RESOURCE_TYPE)
            .state("DRAFT", 0, false)
            .state("SENT", 1, true)
            .state("OVERDUE", 2, true)
            .state("PAID", 3, true)
            .state("CANCELLED", 3, true)
            .allow_when_final(&["status", "updated_at"])
    }
}

/// Expense status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseStatus {
    /// Captured, editable
    Draft,
    /// Posted to the books
    Booked,
    /// Retained, no longer active
    Archived,
}

impl ExpenseStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseStatus::Draft => "draft",
            ExpenseStatus::Booked => "booked",
            ExpenseStatus::Archived => "archived",
        }
    }
}

/// Incoming expense (booking voucher)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    /// Record id
    pub id: String,
    /// Supplier
    pub vendor_name: String,
    /// What was bought
    pub description: String,
    /// Voucher date
    pub expense_date: NaiveDate,
    /// ISO 4217 code
    pub currency: String,
    /// Gross amount
    pub amount: Decimal,
    /// Input VAT
    pub vat_amount: Decimal,
    /// Booking category
    pub category: String,
    /// Lifecycle state
    pub status: ExpenseStatus,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl FinancialRecord for Expense {
    const RESOURCE_TYPE: &'static str = "Expense";

    fn record_id(&self) -> String {
        self.id.clone()
    }

    fn lifecycle_state(&self) -> String {
        self.status.as_str().to_string()
    }

    fn policy() -> LifecyclePolicy {
        LifecyclePolicy::new(Self::RESOURCE_TYPE)
            .state("draft", 0, false)
            .state("booked", 1, true)
            .state("archived", 2, true)
            .allow_when_final(&["status", "updated_at"])
    }
}

/// Imported bank statement line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransaction {
    /// Record id
    pub id: String,
    /// Own account
    pub account_iban: String,
    /// Booking date on the statement
    pub booking_date: NaiveDate,
    /// Signed amount
    pub amount: Decimal,
    /// ISO 4217 code
    pub currency: String,
    /// Payer or payee
    pub counterparty: String,
    /// Remittance information
    pub purpose: String,
    /// Invoice this line was matched to
    pub matched_invoice_id: Option<String>,
    /// Reconciled lines are frozen
    pub is_reconciled: bool,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl FinancialRecord for BankTransaction {
    const RESOURCE_TYPE: &'static str = "BankTransaction";

    fn record_id(&self) -> String {
        self.id.clone()
    }

    fn lifecycle_state(&self) -> String {
        if self.is_reconciled {
            "reconciled".to_string()
        } else {
            "open".to_string()
        }
    }

    fn policy() -> LifecyclePolicy {
        // No allow-list: reconciliation freezes the whole record
        LifecyclePolicy::new(Self::RESOURCE_TYPE)
            .state("open", 0, false)
            .state("reconciled", 1, true)
    }
}
