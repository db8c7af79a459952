//! # Deal Computation Core
//!
//! A pure, deterministic calculation and lifecycle engine for
//! automotive desking:
//!
//! - **Tax calculations** - Jurisdiction-resolved state/local taxes,
//!   special schemes (TAVT, HUT, privilege tax), interstate reciprocity
//! - **Finance deals** - Loan payments, amortization schedules, dealer
//!   reserve
//! - **Lease deals** - Cap cost, residual, rent charge, per-state tax
//!   timing methods, drive-off
//! - **Deal lifecycle** - Multi-tenant, all-or-nothing persistence with
//!   optimistic locking and an append-only audit ledger
//!
//! ## Architecture
//!
//! ```text
//! DealInput -> validate -> jurisdiction -> state rules
//!           -> tax engine -> finance / lease structure
//!           -> ComputedQuote (immutable, bit-identical on replay)
//!
//! Mutations -> LifecycleManager -> one serializable transaction
//!           -> deal + scenario + vehicle + audit, or nothing
//! ```
//!
//! All calculation is pure and synchronous: the calculators never
//! touch a clock, a store, or the network, so the same input always
//! produces the same quote. Suspension and side effects live at the
//! storage boundary only.
//!
//! ## Precision
//!
//! Every monetary value is a `rust_decimal` newtype. No IEEE-754 float
//! participates in any money or rate computation; construction from
//! native floats does not exist. Final money rounds half-away-from-zero
//! to the cent, and serialized money is a decimal string.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use desk_core::prelude::*;
//!
//! let jurisdictions = JurisdictionStore::with_builtin();
//! let rules = StateRuleStore::with_builtin();
//!
//! let quote = calculate_quote(&input, &jurisdictions, &rules, &EngineConfig::default())?;
//! println!("tax: {}", quote.total_tax);
//! println!("payment: {:?}", quote.monthly_payment());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

// Core modules
pub mod aggregator;
pub mod audit;
pub mod engine;
pub mod finance;
pub mod jurisdiction;
pub mod lease;
pub mod lifecycle;
pub mod rule_store;
pub mod storage;
pub mod tax;
pub mod types;
pub mod validate;

// Re-export commonly used types
pub use types::{
    // Money types
    Money, MoneyFactor, Rate,

    // Deal input
    DealInput, DealType, Fee, FinancingTerms, LeasingTerms, OriginTaxInfo, Product,
    ProductCategory,

    // Rules
    LeaseMethod, ReciprocityBehavior, ReciprocityRules, ReciprocityScope, RoundingProfile,
    StateRules, TradeInPolicy, VehicleTaxScheme,

    // Quote
    AppliedRule, ComputedQuote, FinanceSummary, LeaseSummary, Profit, QuoteWarning, TaxLevel,
    TaxLine, TaxOutcome,

    // Aggregate
    Customer, Deal, DealStatus, Scenario, Vehicle, VehicleStatus,

    // Common
    DeskError, DeskResult, StateCode, Value,
};

pub use aggregator::compute_quote;
pub use audit::{AuditEntry, AuditLedger, ChangeType, PlaybackSnapshot};
pub use engine::{
    calculate_deal_taxes, calculate_quote, calculate_sales_tax, engine_info, engine_version,
    EngineConfig, EngineInfo, SalesTaxRequest, SalesTaxResult,
};
pub use jurisdiction::{Jurisdiction, JurisdictionStore, RateVector};
pub use lifecycle::{
    CreateDealInput, CreatedDeal, CustomerRef, DealPatch, FieldChange, LifecycleConfig,
    LifecycleManager,
};
pub use rule_store::StateRuleStore;
pub use storage::{
    Clock, CurrentUser, IdentityProvider, ManualClock, MemoryStore, StaticIdentity, SystemClock,
};

/// Prelude module for convenient imports
pub mod prelude {
    //! Commonly used types and functions.
    //!
    //! ```rust,ignore
    //! use desk_core::prelude::*;
    //! ```

    pub use crate::engine::{calculate_quote, calculate_sales_tax, EngineConfig};
    pub use crate::jurisdiction::JurisdictionStore;
    pub use crate::lifecycle::{CreateDealInput, CustomerRef, LifecycleManager};
    pub use crate::rule_store::StateRuleStore;
    pub use crate::types::{
        ComputedQuote, DealInput, DealType, DeskError, DeskResult, Money, Rate, StateCode,
    };

    pub use rust_decimal::Decimal;
    pub use rust_decimal_macros::dec;
}
