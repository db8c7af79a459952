//! Type definitions for the Deal Computation Core.
//!
//! # Module Organization
//!
//! - `money` - Precise financial primitives (Money, Rate, MoneyFactor)
//! - `deal_input` - Deal input types (what the desk sends us)
//! - `rules` - State tax rules and reciprocity configuration
//! - `quote` - Calculation results (the immutable quote)
//! - `deal` - Deal aggregate, scenarios, vehicles, lifecycle status

pub mod deal;
pub mod deal_input;
pub mod money;
pub mod quote;
pub mod rules;

pub use deal::{
    Customer, Deal, DealStatus, Scenario, Vehicle, VehicleStatus,
};
pub use deal_input::{
    DealInput, DealType, Fee, FinancingTerms, LeasingTerms, OriginTaxInfo, Product,
    ProductCategory,
};
pub use money::{powi, Money, MoneyFactor, Rate};
pub use quote::{
    AmortizationSummary, AppliedRule, ComputedQuote, FinanceSummary, LeaseSummary, Profit,
    QuoteWarning, TaxLevel, TaxLine, TaxOutcome,
};
pub use rules::{
    LeaseMethod, LeaseTradeInCredit, ReciprocityBehavior, ReciprocityRules, ReciprocityScope,
    RoundingProfile, StateRules, TradeInPolicy, VehicleTaxScheme,
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// US State codes (50 states + DC + territories)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString,
    Display,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum StateCode {
    AL, AK, AZ, AR, CA, CO, CT, DE, DC, FL,
    GA, HI, ID, IL, IN, IA, KS, KY, LA, ME,
    MD, MA, MI, MN, MS, MO, MT, NE, NV, NH,
    NJ, NM, NY, NC, ND, OH, OK, OR, PA, RI,
    SC, SD, TN, TX, UT, VT, VA, WA, WV, WI,
    WY, PR, VI, GU, AS, MP,
}

impl StateCode {
    /// Parse a state code, case-insensitively. None for unknown codes.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    /// Dotted path of the offending field (e.g. `financing.apr`)
    pub field: String,
    /// Human-readable message
    pub message: String,
}

impl FieldIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        FieldIssue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Common error type for all core operations.
///
/// Every variant carries a stable `code()` used at the RPC boundary;
/// the taxonomy maps 1:1 onto the lifecycle manager's failure contract.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum DeskError {
    #[error("validation failed: {}", format_issues(.issues))]
    Validation { issues: Vec<FieldIssue> },

    #[error("negative amount for {field}: {value}")]
    NegativeAmount { field: String, value: String },

    #[error("arithmetic error: {message}")]
    Arithmetic { message: String },

    #[error("no tax jurisdiction found for ZIP {zip}")]
    JurisdictionNotFound { zip: String },

    #[error("no tax rules available for state {state}")]
    UnsupportedState { state: String },

    #[error("invalid tax calculation: {message}")]
    InvalidTaxCalculation { message: String },

    #[error("tax breakdown mismatch: components sum to {component_sum}, total is {total}")]
    BreakdownMismatch {
        component_sum: String,
        total: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("tenant isolation violation on {entity}")]
    MultiTenantViolation { entity: String },

    #[error("vehicle {vehicle_id} is not available (status: {status})")]
    VehicleNotAvailable { vehicle_id: String, status: String },

    #[error("duplicate deal number {deal_number}")]
    DuplicateDealNumber { deal_number: String },

    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("invalid deal state transition: {from} -> {to}")]
    InvalidDealState { from: String, to: String },

    #[error("serialization failure in transaction: {message}")]
    TransactionSerialization { message: String },

    #[error("transaction exceeded {deadline_ms}ms deadline")]
    TransactionTimeout { deadline_ms: u64 },

    #[error("audit log rejected write: {message}")]
    AuditOrdering { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl DeskError {
    pub fn validation(message: impl Into<String>) -> Self {
        DeskError::Validation {
            issues: vec![FieldIssue::new("", message)],
        }
    }

    pub fn validation_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        DeskError::Validation {
            issues: vec![FieldIssue::new(field, message)],
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        DeskError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        DeskError::Internal {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        DeskError::Serialization {
            message: message.into(),
        }
    }

    /// Stable machine-readable code for the RPC boundary.
    pub fn code(&self) -> &'static str {
        match self {
            DeskError::Validation { .. } => "VALIDATION",
            DeskError::NegativeAmount { .. } => "NEGATIVE_AMOUNT",
            DeskError::Arithmetic { .. } => "ARITHMETIC",
            DeskError::JurisdictionNotFound { .. } => "JURISDICTION_NOT_FOUND",
            DeskError::UnsupportedState { .. } => "UNSUPPORTED_STATE",
            DeskError::InvalidTaxCalculation { .. } => "INVALID_TAX_CALCULATION",
            DeskError::BreakdownMismatch { .. } => "BREAKDOWN_MISMATCH",
            DeskError::NotFound { .. } => "NOT_FOUND",
            DeskError::MultiTenantViolation { .. } => "TENANT_VIOLATION",
            DeskError::VehicleNotAvailable { .. } => "VEHICLE_NOT_AVAILABLE",
            DeskError::DuplicateDealNumber { .. } => "DUPLICATE_DEAL_NUMBER",
            DeskError::VersionConflict { .. } => "VERSION_CONFLICT",
            DeskError::InvalidDealState { .. } => "INVALID_DEAL_STATE",
            DeskError::TransactionSerialization { .. } => "TXN_SERIALIZATION",
            DeskError::TransactionTimeout { .. } => "TXN_TIMEOUT",
            DeskError::AuditOrdering { .. } => "AUDIT_ORDERING",
            DeskError::Serialization { .. } => "SERIALIZATION",
            DeskError::Internal { .. } => "INTERNAL",
        }
    }

    /// Suggested HTTP status for transport adapters.
    pub fn http_status(&self) -> u16 {
        match self {
            DeskError::Validation { .. }
            | DeskError::NegativeAmount { .. }
            | DeskError::InvalidTaxCalculation { .. } => 400,
            DeskError::MultiTenantViolation { .. } => 403,
            DeskError::NotFound { .. }
            | DeskError::JurisdictionNotFound { .. }
            | DeskError::UnsupportedState { .. } => 404,
            DeskError::VehicleNotAvailable { .. }
            | DeskError::DuplicateDealNumber { .. }
            | DeskError::VersionConflict { .. }
            | DeskError::InvalidDealState { .. } => 409,
            _ => 500,
        }
    }

    /// Only transient serialization failures are retried by the
    /// lifecycle manager; everything else propagates immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeskError::TransactionSerialization { .. } | DeskError::DuplicateDealNumber { .. }
        )
    }
}

fn format_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|i| {
            if i.field.is_empty() {
                i.message.clone()
            } else {
                format!("{}: {}", i.field, i.message)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for core operations.
pub type DeskResult<T> = Result<T, DeskError>;

/// Dynamic value carried by change-log entries.
///
/// Replaces stringly-typed "any" payloads: every recorded field delta is
/// one of these, and snapshots are canonical JSON with decimal strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Money(Money),
    Rate(Rate),
    String(String),
    Int(i64),
    Bool(bool),
    Json(serde_json::Value),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Money(_) => "money",
            Value::Rate(_) => "rate",
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Json(_) => "json",
        }
    }
}
