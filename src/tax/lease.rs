//! Lease tax application.
//!
//! Lease taxation never reuses the retail trade-in policy: the lease
//! rule block decides whether trade equity reduces the taxed base,
//! whether the cap-cost reduction is itself taxed, and when the tax is
//! due. The timing method drives everything else:
//!
//! - `Monthly`: tax each base payment at the combined rate
//! - `UpfrontOnSellingPrice`: one tax on the selling price, at signing
//! - `UpfrontOnPayments`: one tax on the total of base payments
//! - `OnePay`: payments-total tax folded into the single payment
//! - `CapReductionTaxed`: monthly tax plus upfront tax on the reduction

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{distribute_total, TaxContext};
use crate::types::{
    AppliedRule, DeskResult, LeaseMethod, LeaseTradeInCredit, Money, Rate, TaxLevel, TaxLine,
    VehicleTaxScheme,
};

/// Lease-side figures the tax engine needs from the lease calculator.
#[derive(Debug, Clone, Copy)]
pub struct LeaseTaxFigures {
    pub selling_price: Money,
    /// Monthly depreciation + rent charge, before tax.
    pub base_payment: Money,
    pub term_months: u32,
    /// Cash + rebates + equity applied against cap cost.
    pub cap_reduction: Money,
    /// Positive trade equity rolled into the deal.
    pub trade_equity: Money,
}

/// Result of the lease tax calculation.
#[derive(Debug, Clone)]
pub struct LeaseTaxResult {
    pub method: LeaseMethod,
    /// Due at signing.
    pub upfront_tax: Money,
    /// Added to each monthly payment.
    pub monthly_tax: Money,
    /// Lifetime tax across the lease, net of reciprocity.
    pub total_tax: Money,
    /// Credit for tax paid to the origin state, netted from the
    /// upfront portion.
    pub reciprocity_credit: Money,
    /// Per-level split of the net total; always sums to `total_tax`.
    pub breakdown: Vec<TaxLine>,
    pub applied_rules: Vec<AppliedRule>,
}

/// Compute lease tax per the state's timing method.
pub fn compute_lease_tax(
    ctx: TaxContext<'_>,
    figures: &LeaseTaxFigures,
) -> DeskResult<LeaseTaxResult> {
    let lease_rules = &ctx.rules.lease_rules;
    let method = lease_rules.method;
    let mut applied = Vec::new();

    let rate = effective_lease_rate(ctx, &mut applied);
    let term = Decimal::from(figures.term_months);

    // Trade equity reduction of the taxed base, per the lease rule
    // block only. CapCostOnly equity already lowered the payment.
    let base_credit = match lease_rules.trade_in_credit {
        LeaseTradeInCredit::Full => figures.trade_equity,
        LeaseTradeInCredit::FollowRetail => {
            ctx.rules.trade_in_policy.credit_for(figures.trade_equity)
        }
        LeaseTradeInCredit::CapCostOnly | LeaseTradeInCredit::None => Money::ZERO,
    };
    if !base_credit.is_zero() {
        applied.push(AppliedRule::new(
            "LEASE_TRADE_CREDIT",
            format!("trade equity {} reduces the lease tax base", base_credit),
        ));
    }

    let mut upfront_tax = Money::ZERO;
    let mut monthly_tax = Money::ZERO;

    match method {
        LeaseMethod::Monthly | LeaseMethod::CapReductionTaxed => {
            monthly_tax = rate.apply(figures.base_payment).round_cents();
            applied.push(AppliedRule::new(
                "LEASE_TAX_MONTHLY",
                format!("tax {} added to each of {} payments", monthly_tax, figures.term_months),
            ));
        }
        LeaseMethod::UpfrontOnSellingPrice => {
            let base = (figures.selling_price - base_credit).clamp_zero();
            upfront_tax = rate.apply(base).round_cents();
            applied.push(AppliedRule::new(
                "LEASE_TAX_UPFRONT_SELLING_PRICE",
                format!("tax {} due at signing on selling price {}", upfront_tax, base),
            ));
        }
        LeaseMethod::UpfrontOnPayments | LeaseMethod::OnePay => {
            let base = ((figures.base_payment * term) - base_credit).clamp_zero();
            upfront_tax = rate.apply(base).round_cents();
            let code = if method == LeaseMethod::OnePay {
                "LEASE_TAX_ONE_PAY"
            } else {
                "LEASE_TAX_UPFRONT_PAYMENTS"
            };
            applied.push(AppliedRule::new(
                code,
                format!("tax {} on payment total {}", upfront_tax, base),
            ));
        }
    }

    // Cap-cost reduction taxed on top, where the state says so
    let tax_reduction =
        method == LeaseMethod::CapReductionTaxed || lease_rules.tax_cap_reduction;
    if tax_reduction && !figures.cap_reduction.is_zero() {
        let reduction_tax = rate.apply(figures.cap_reduction).round_cents();
        if !reduction_tax.is_zero() {
            upfront_tax = upfront_tax + reduction_tax;
            applied.push(AppliedRule::new(
                "LEASE_CAP_REDUCTION_TAXED",
                format!(
                    "cap reduction {} taxed upfront: {}",
                    figures.cap_reduction, reduction_tax
                ),
            ));
        }
    }

    // Reciprocity nets against the upfront portion; a lease taxed
    // purely monthly has nothing due at signing to credit against.
    let reciprocity_credit = super::reciprocity_credit(ctx, upfront_tax, &mut applied);
    let gross_total = upfront_tax + monthly_tax * term;
    let upfront_tax = (upfront_tax - reciprocity_credit).clamp_zero();
    let total_tax = (gross_total - reciprocity_credit).clamp_zero();

    // Lines split the net total, so they always sum to `total_tax`
    let breakdown = lease_breakdown(ctx, rate, total_tax);

    Ok(LeaseTaxResult {
        method,
        upfront_tax,
        monthly_tax,
        total_tax,
        reciprocity_credit,
        breakdown,
        applied_rules: applied,
    })
}

/// Combined rate for lease taxation: the scheme rate where a special
/// scheme governs vehicles, the jurisdiction total otherwise.
fn effective_lease_rate(ctx: TaxContext<'_>, applied: &mut Vec<AppliedRule>) -> Rate {
    match ctx.rules.vehicle_tax_scheme {
        VehicleTaxScheme::StatePlusLocal => ctx.jurisdiction.total_rate(),
        VehicleTaxScheme::SpecialTavt => {
            let rate = ctx.rules.scheme_rate.unwrap_or(Rate::from_decimal(dec!(0.07)));
            applied.push(AppliedRule::new(
                "LEASE_SCHEME_RATE",
                format!("title ad valorem rate {} governs the lease", rate),
            ));
            rate
        }
        VehicleTaxScheme::SpecialHut => {
            let rate = ctx.rules.scheme_rate.unwrap_or(Rate::from_decimal(dec!(0.03)));
            applied.push(AppliedRule::new(
                "LEASE_SCHEME_RATE",
                format!("highway use rate {} governs the lease", rate),
            ));
            rate
        }
        VehicleTaxScheme::DmvPrivilegeTax => {
            let rate = ctx.rules.scheme_rate.unwrap_or(Rate::from_decimal(dec!(0.005)));
            applied.push(AppliedRule::new(
                "LEASE_SCHEME_RATE",
                format!("privilege tax rate {} governs the lease", rate),
            ));
            rate
        }
    }
}

/// Breakdown lines for the lease total. The payment arithmetic owns
/// the total; lines are a per-level split that reconciles exactly.
fn lease_breakdown(ctx: TaxContext<'_>, rate: Rate, total: Money) -> Vec<TaxLine> {
    if total.is_zero() {
        return vec![];
    }
    match ctx.rules.vehicle_tax_scheme {
        VehicleTaxScheme::StatePlusLocal => distribute_total(total, &ctx.jurisdiction.rates),
        _ => vec![TaxLine {
            level: TaxLevel::State,
            rate,
            amount: total,
        }],
    }
}
