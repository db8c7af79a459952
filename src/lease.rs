//! Lease structure calculations.
//!
//! # Key Formulas
//!
//! ```text
//! Gross Cap Cost    = Selling Price + Capitalized Fees + Products
//! Cap Reduction     = Cash Down + Rebates + Trade Equity (if allowed)
//! Adjusted Cap Cost = Gross Cap - Cap Reduction
//! Residual          = MSRP * Residual %
//! Depreciation/mo   = (Adjusted Cap - Residual) / Term
//! Rent Charge/mo    = (Adjusted Cap + Residual) * Money Factor
//! Base Payment      = Depreciation + Rent Charge
//! APR               = Money Factor * 2400
//! ```
//!
//! Tax is applied by the lease tax module per the state's timing
//! method; this module owns the untaxed structure and the drive-off.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{
    DealInput, DeskError, DeskResult, FieldIssue, LeaseTradeInCredit, LeasingTerms, Money, Rate,
};

/// Capitalized cost breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapCostBreakdown {
    pub selling_price: Money,
    pub capitalized_fees: Money,
    pub capitalized_products: Money,
    pub capitalized_acquisition_fee: Money,
    pub gross_cap_cost: Money,
    pub cash_down: Money,
    pub rebates_applied: Money,
    pub trade_equity_applied: Money,
    pub total_cap_reduction: Money,
    pub adjusted_cap_cost: Money,
}

/// Untaxed lease structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseStructure {
    pub cap_cost: CapCostBreakdown,
    pub residual_value: Money,
    pub monthly_depreciation: Money,
    pub monthly_rent_charge: Money,
    /// Depreciation + rent, before tax.
    pub base_payment: Money,
    pub term_months: u32,
    pub equivalent_apr: Rate,
}

/// Build the lease structure from the deal input.
///
/// Trade equity joins the cap reduction only when the state's lease
/// rule block allows it; negative equity is capitalized into the gross
/// cap cost (the lessee finances it across the term).
pub fn calculate_lease_structure(
    input: &DealInput,
    terms: &LeasingTerms,
    trade_credit_mode: LeaseTradeInCredit,
) -> DeskResult<LeaseStructure> {
    if terms.term_months == 0 {
        return Err(DeskError::Validation {
            issues: vec![FieldIssue::new("leasing.term_months", "must be at least 1")],
        });
    }
    let term = Decimal::from(terms.term_months);

    let capitalized_fees = Money::sum(
        input
            .fees
            .iter()
            .filter(|f| f.capitalized)
            .map(|f| f.amount),
    );
    let capitalized_products = input.total_products();
    let capitalized_acquisition_fee = if terms.acquisition_fee_capitalized {
        terms.acquisition_fee
    } else {
        Money::ZERO
    };

    let negative_equity = input.negative_equity();
    let gross_cap_cost = terms.selling_price
        + capitalized_fees
        + capitalized_products
        + capitalized_acquisition_fee
        + negative_equity;

    let trade_equity_applied = match trade_credit_mode {
        LeaseTradeInCredit::None => Money::ZERO,
        _ => input.net_trade_equity().clamp_zero(),
    };
    let rebates_applied = input.total_rebates();
    let total_cap_reduction = terms.cash_down + rebates_applied + trade_equity_applied;

    let adjusted_cap_cost = (gross_cap_cost - total_cap_reduction).clamp_zero();

    let residual_value = terms.msrp.apply_percent(terms.residual_percent).round_cents();

    let monthly_depreciation = ((adjusted_cap_cost - residual_value).clamp_zero() / term)
        .round_cents();
    let monthly_rent_charge = ((adjusted_cap_cost + residual_value)
        * terms.money_factor.as_decimal())
    .round_cents();
    let base_payment = monthly_depreciation + monthly_rent_charge;

    Ok(LeaseStructure {
        cap_cost: CapCostBreakdown {
            selling_price: terms.selling_price,
            capitalized_fees,
            capitalized_products,
            capitalized_acquisition_fee,
            gross_cap_cost: gross_cap_cost.round_cents(),
            cash_down: terms.cash_down,
            rebates_applied,
            trade_equity_applied,
            total_cap_reduction: total_cap_reduction.round_cents(),
            adjusted_cap_cost: adjusted_cap_cost.round_cents(),
        },
        residual_value,
        monthly_depreciation,
        monthly_rent_charge,
        base_payment,
        term_months: terms.term_months,
        equivalent_apr: terms.money_factor.to_apr(),
    })
}

/// Amount due at lease signing.
///
/// Cash down, the first payment (with its monthly tax), any upfront
/// tax, non-capitalized fees, the acquisition fee when paid upfront,
/// and the security deposit.
pub fn drive_off(
    input: &DealInput,
    terms: &LeasingTerms,
    first_payment: Money,
    upfront_tax: Money,
) -> Money {
    let upfront_fees = Money::sum(
        input
            .fees
            .iter()
            .filter(|f| !f.capitalized)
            .map(|f| f.amount),
    );
    let acquisition_upfront = if terms.acquisition_fee_capitalized {
        Money::ZERO
    } else {
        terms.acquisition_fee
    };

    (terms.cash_down
        + first_payment
        + acquisition_upfront
        + upfront_tax
        + upfront_fees
        + terms.security_deposit)
        .round_cents()
}

/// Single payment for a one-pay lease: the payment total plus the tax
/// folded in at signing.
pub fn one_pay_amount(base_payment: Money, term_months: u32, total_tax: Money) -> Money {
    (base_payment * Decimal::from(term_months) + total_tax).round_cents()
}
