//! Calculation results: the immutable quote and its tax breakdown.
//!
//! A `ComputedQuote` is a value object. Given the same `DealInput`,
//! jurisdiction, and rules, the aggregator produces a bit-identical
//! quote every time; nothing here is mutated after construction.

use serde::{Deserialize, Serialize};

use super::deal_input::DealType;
use super::money::{Money, MoneyFactor, Rate};
use super::{DeskError, DeskResult};

/// Taxing authority level for one breakdown line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxLevel {
    State,
    County,
    City,
    Township,
    Special,
}

impl TaxLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxLevel::State => "state",
            TaxLevel::County => "county",
            TaxLevel::City => "city",
            TaxLevel::Township => "township",
            TaxLevel::Special => "special",
        }
    }
}

/// One component of the tax breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxLine {
    pub level: TaxLevel,
    pub rate: Rate,
    pub amount: Money,
}

/// A rule the tax engine applied, recorded for auditability.
/// `code` is stable; `detail` is free-form for humans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedRule {
    pub code: String,
    pub detail: String,
}

impl AppliedRule {
    pub fn new(code: impl Into<String>, detail: impl Into<String>) -> Self {
        AppliedRule {
            code: code.into(),
            detail: detail.into(),
        }
    }
}

/// Advisory produced during calculation. Never fails the deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteWarning {
    pub code: String,
    pub message: String,
}

impl QuoteWarning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        QuoteWarning {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Output of the tax engine for one deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxOutcome {
    /// Sale base after discount and base-reducing rebates.
    pub sale_base: Money,
    /// Trade-in credit actually applied to the base.
    pub trade_credit_applied: Money,
    pub taxable_amount: Money,
    /// One line per taxing level, with any reciprocity credit already
    /// netted out, so the lines always sum to `total_tax`.
    pub breakdown: Vec<TaxLine>,
    pub total_tax: Money,
    pub reciprocity_credit: Money,
    /// Portion of tax due at signing (lease upfront methods).
    pub upfront_tax: Money,
    /// Per-payment tax for monthly lease methods.
    pub monthly_tax: Money,
    pub applied_rules: Vec<AppliedRule>,
}

impl TaxOutcome {
    /// Breakdown sanity guard: component sum must reconcile with the
    /// total tax within one cent. Violations fail the calculation.
    pub fn verify_breakdown(&self) -> DeskResult<()> {
        let component_sum = Money::sum(self.breakdown.iter().map(|l| l.amount));
        if !Money::is_equal(component_sum, self.total_tax, rust_decimal_macros::dec!(0.01)) {
            return Err(DeskError::BreakdownMismatch {
                component_sum: component_sum.as_decimal().to_string(),
                total: self.total_tax.as_decimal().to_string(),
            });
        }
        Ok(())
    }
}

/// Amortization roll-up carried on the quote (the full schedule is
/// available from the finance module on demand).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmortizationSummary {
    pub payment_count: u32,
    pub total_of_payments: Money,
    pub total_interest: Money,
    /// Final payment after the cumulative-rounding adjustment.
    pub final_payment: Money,
}

/// Finance-side results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinanceSummary {
    pub amount_financed: Money,
    pub monthly_payment: Money,
    pub apr: Rate,
    pub term_months: u32,
    pub total_of_payments: Money,
    pub total_interest: Money,
    /// Back-end income from the buy-rate spread, when priced.
    pub dealer_reserve: Money,
    pub amortization: AmortizationSummary,
}

/// Lease-side results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseSummary {
    pub gross_cap_cost: Money,
    pub cap_reduction: Money,
    pub adjusted_cap_cost: Money,
    pub residual_value: Money,
    pub monthly_depreciation: Money,
    pub monthly_rent_charge: Money,
    /// Depreciation + rent, before tax.
    pub base_payment: Money,
    pub monthly_tax: Money,
    pub total_payment: Money,
    pub upfront_tax: Money,
    pub drive_off: Money,
    pub term_months: u32,
    pub money_factor: MoneyFactor,
    pub equivalent_apr: Rate,
    /// Populated only for one-pay leases.
    pub one_pay_amount: Option<Money>,
}

/// Deal gross profit split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profit {
    /// Sale price over vehicle cost.
    pub front: Money,
    /// F&I product margin plus reserve.
    pub back: Money,
    pub total: Money,
}

/// The complete, immutable calculation result for one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedQuote {
    pub deal_type: DealType,

    pub sale_base: Money,
    pub net_trade_in: Money,
    pub taxable_amount: Money,
    /// Per-level tax lines, net of reciprocity; sums to `total_tax`.
    pub tax_breakdown: Vec<TaxLine>,
    pub total_tax: Money,
    pub reciprocity_credit: Money,

    pub total_fees: Money,
    pub total_products: Money,
    /// Vehicle + adds + fees + products + tax, before rebates/trade.
    pub cash_price: Money,
    /// What the customer ultimately pays, net of rebates and equity.
    pub out_the_door: Money,

    pub finance: Option<FinanceSummary>,
    pub lease: Option<LeaseSummary>,

    pub profit: Profit,
    pub applied_rules: Vec<AppliedRule>,
    pub warnings: Vec<QuoteWarning>,

    /// Engine version that produced the quote, for replay forensics.
    pub engine_version: String,
}

impl ComputedQuote {
    /// Monthly obligation for the quote, if the deal has one.
    pub fn monthly_payment(&self) -> Option<Money> {
        if let Some(f) = &self.finance {
            return Some(f.monthly_payment);
        }
        self.lease.as_ref().map(|l| l.total_payment)
    }

    /// Canonical JSON for audit snapshots: fixed field order, money as
    /// 2-dp decimal strings. Byte-stable for identical quotes.
    pub fn canonical_json(&self) -> DeskResult<String> {
        serde_json::to_string(self).map_err(|e| DeskError::serialization(e.to_string()))
    }
}
