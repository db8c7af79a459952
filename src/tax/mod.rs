//! Tax computation engine.
//!
//! The engine runs a fixed, deterministic step order for every deal:
//!
//! ```text
//! 1. sale base       = price - dealer discount - non-taxable rebates
//! 2. trade credit    per state policy (full/capped/percent/none)
//! 3. taxable amount  = max(0, base - credit) + taxable adds
//! 4. breakdown       one line per taxing level, per rounding profile
//! 5. special scheme  TAVT/HUT/privilege replaces the state line
//! 6. reciprocity     credit for tax paid to the origin state
//! 7. outcome         totals + applied-rule audit trail
//! ```
//!
//! Every rule consulted along the way lands in `applied_rules`, so two
//! desks can reconcile a quote line-by-line against the state manual.
//!
//! # Invariants
//! - The taxable amount is never negative
//! - Trade and rebate credits are never double-applied
//! - `|sum(breakdown) - total tax| <= $0.01`, enforced, not assumed
//! - Reciprocity never drives the total below zero

pub mod lease;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::jurisdiction::{Jurisdiction, RateVector};
use crate::types::{
    AppliedRule, DealInput, DealType, DeskResult, Money, ProductCategory, QuoteWarning, Rate,
    ReciprocityBehavior, ReciprocityScope, RoundingProfile, StateRules, TaxLevel, TaxLine,
    TaxOutcome, TradeInPolicy, VehicleTaxScheme,
};

/// Everything the engine needs for one calculation. Borrowed: the
/// engine is pure and never holds state between calls.
#[derive(Debug, Clone, Copy)]
pub struct TaxContext<'a> {
    pub input: &'a DealInput,
    pub jurisdiction: &'a Jurisdiction,
    pub rules: &'a StateRules,
}

/// Retail (and cash) tax calculation.
pub fn compute_retail_tax(ctx: TaxContext<'_>) -> DeskResult<TaxOutcome> {
    let mut applied = Vec::new();

    let sale_base = build_sale_base(ctx, &mut applied);
    let trade_credit = retail_trade_credit(ctx, sale_base, &mut applied);
    let taxable = build_taxable_amount(ctx, sale_base, trade_credit, &mut applied)?;

    let (mut breakdown, gross_tax) = component_breakdown(ctx, taxable, &mut applied);

    let reciprocity_credit = reciprocity_credit(ctx, gross_tax, &mut applied);
    let total_tax = (gross_tax - reciprocity_credit).clamp_zero();
    net_credit_into_breakdown(&mut breakdown, reciprocity_credit);

    luxury_advisory(ctx, &mut applied);

    let outcome = TaxOutcome {
        sale_base,
        trade_credit_applied: trade_credit,
        taxable_amount: taxable,
        breakdown,
        total_tax,
        reciprocity_credit,
        upfront_tax: Money::ZERO,
        monthly_tax: Money::ZERO,
        applied_rules: applied,
    };
    outcome.verify_breakdown()?;
    Ok(outcome)
}

/// Step 1: sale base. Dealer discount always reduces the base; a
/// rebate reduces it only when the state does not tax that rebate kind.
fn build_sale_base(ctx: TaxContext<'_>, applied: &mut Vec<AppliedRule>) -> Money {
    let input = ctx.input;
    let rules = ctx.rules;

    let mut base = input.vehicle_price - input.dealer_discount;

    if !rules.manufacturer_rebate_taxable && !input.manufacturer_rebate.is_zero() {
        base = base - input.manufacturer_rebate;
        applied.push(AppliedRule::new(
            "MFR_REBATE_NONTAXABLE",
            format!(
                "manufacturer rebate {} reduces the taxable base",
                input.manufacturer_rebate
            ),
        ));
    } else if rules.manufacturer_rebate_taxable && !input.manufacturer_rebate.is_zero() {
        applied.push(AppliedRule::new(
            "MFR_REBATE_TAXABLE",
            format!(
                "manufacturer rebate {} reduces cash owed but not the taxable base",
                input.manufacturer_rebate
            ),
        ));
    }

    if !rules.dealer_rebate_taxable && !input.dealer_rebate.is_zero() {
        base = base - input.dealer_rebate;
        applied.push(AppliedRule::new(
            "DEALER_REBATE_NONTAXABLE",
            format!("dealer rebate {} reduces the taxable base", input.dealer_rebate),
        ));
    }

    base
}

/// Step 2: trade-in credit under the retail policy.
fn retail_trade_credit(
    ctx: TaxContext<'_>,
    sale_base: Money,
    applied: &mut Vec<AppliedRule>,
) -> Money {
    let allowance = ctx.input.trade_allowance;
    if allowance.is_zero() {
        return Money::ZERO;
    }

    let credit = ctx.rules.trade_in_policy.credit_for(allowance);
    // Credit cannot exceed the base and is never negative
    let credit = credit.min(sale_base.clamp_zero()).clamp_zero();

    let note = match &ctx.rules.trade_in_policy {
        TradeInPolicy::Full => format!("full trade-in credit {}", credit),
        TradeInPolicy::Capped { cap } => {
            format!("trade-in credit {} (allowance {} capped at {})", credit, allowance, cap)
        }
        TradeInPolicy::Percent { percent } => {
            format!("trade-in credit {} ({} of allowance)", credit, percent)
        }
        TradeInPolicy::None => "state grants no trade-in tax credit".to_string(),
    };
    applied.push(AppliedRule::new("TRADE_IN_CREDIT", note));

    credit
}

/// Step 3: taxable amount. Each add is governed by its own rule.
fn build_taxable_amount(
    ctx: TaxContext<'_>,
    sale_base: Money,
    trade_credit: Money,
    applied: &mut Vec<AppliedRule>,
) -> DeskResult<Money> {
    let input = ctx.input;
    let rules = ctx.rules;

    let mut taxable = (sale_base - trade_credit).clamp_zero();

    let taxable_fees = taxable_fee_total(ctx, applied);
    taxable = taxable + taxable_fees;

    let taxable_products = taxable_product_total(ctx, applied);
    taxable = taxable + taxable_products;

    if rules.accessories_taxable && !input.accessories_total.is_zero() {
        taxable = taxable + input.accessories_total;
        applied.push(AppliedRule::new(
            "ACCESSORIES_TAXABLE",
            format!("accessories {} added to taxable amount", input.accessories_total),
        ));
    }

    let negative_equity = input.negative_equity();
    if rules.negative_equity_taxable && !negative_equity.is_zero() {
        taxable = taxable + negative_equity;
        applied.push(AppliedRule::new(
            "NEGATIVE_EQUITY_TAXABLE",
            format!("negative equity {} added to taxable amount", negative_equity),
        ));
    }

    if let Some(cap) = rules.scheme_base_cap {
        if taxable > cap {
            applied.push(AppliedRule::new(
                "TAXABLE_BASE_CAPPED",
                format!("taxable base {} capped at {}", taxable, cap),
            ));
            taxable = cap;
        }
    }

    Ok(taxable.clamp_zero())
}

/// Taxable fee total. Doc fees get cap semantics: only the portion
/// within the state cap is taxed.
fn taxable_fee_total(ctx: TaxContext<'_>, applied: &mut Vec<AppliedRule>) -> Money {
    let rules = ctx.rules;
    let mut total = Money::ZERO;

    for fee in &ctx.input.fees {
        if fee.is_doc_fee() {
            if rules.doc_fee_taxable {
                let taxed = fee.amount.apply_cap(rules.doc_fee_cap);
                total = total + taxed;
                if taxed < fee.amount {
                    applied.push(AppliedRule::new(
                        "DOC_FEE_CAPPED",
                        format!("doc fee taxed at capped {} of {}", taxed, fee.amount),
                    ));
                }
            }
            continue;
        }
        if rules.fee_taxable(&fee.code, fee.taxable) {
            total = total + fee.amount;
        }
    }

    if !total.is_zero() {
        applied.push(AppliedRule::new(
            "TAXABLE_FEES",
            format!("taxable fees {} added to taxable amount", total),
        ));
    }
    total
}

/// Taxable product total: explicit flag first, then the state's
/// per-category rules. GAP escapes when separately stated and the
/// state exempts separately-stated GAP.
fn taxable_product_total(ctx: TaxContext<'_>, applied: &mut Vec<AppliedRule>) -> Money {
    let rules = ctx.rules;
    let mut total = Money::ZERO;

    for product in &ctx.input.products {
        let taxable = match product.taxable {
            Some(flag) => flag,
            None => match product.category {
                ProductCategory::Warranty | ProductCategory::Maintenance => {
                    rules.service_contract_taxable
                }
                ProductCategory::Gap => {
                    rules.gap_taxable
                        && !(product.separately_stated && rules.gap_exempt_when_separately_stated)
                }
                _ => rules.accessories_taxable,
            },
        };
        if taxable {
            total = total + product.price;
        }
    }

    if !total.is_zero() {
        applied.push(AppliedRule::new(
            "TAXABLE_PRODUCTS",
            format!("taxable products {} added to taxable amount", total),
        ));
    }
    total
}

/// Steps 4 and 5: per-level breakdown, with the state line replaced by
/// the special scheme where one applies.
fn component_breakdown(
    ctx: TaxContext<'_>,
    taxable: Money,
    applied: &mut Vec<AppliedRule>,
) -> (Vec<TaxLine>, Money) {
    let rules = ctx.rules;
    let rates = &ctx.jurisdiction.rates;
    let profile = rules.rounding_profile;

    applied.push(AppliedRule::new(
        "ROUNDING_PROFILE",
        format!("breakdown uses {} rounding", profile.describe()),
    ));

    let mut lines: Vec<(TaxLevel, Rate, Money)> = Vec::new();

    match rules.vehicle_tax_scheme {
        VehicleTaxScheme::StatePlusLocal => {
            for (level, rate) in rates.components() {
                lines.push((level, rate, taxable * rate.as_decimal()));
            }
        }
        scheme => {
            let (rate, base, name) = special_scheme(rules, scheme, taxable);
            applied.push(AppliedRule::new(
                "SPECIAL_SCHEME",
                format!("{} at {} on {}", name, rate, base),
            ));
            lines.push((TaxLevel::State, rate, base * rate.as_decimal()));

            if rules.vehicle_uses_local_sales_tax {
                for (level, rate) in rates.components() {
                    if level != TaxLevel::State {
                        lines.push((level, rate, taxable * rate.as_decimal()));
                    }
                }
            }
        }
    }

    finalize_breakdown(lines, profile)
}

/// Scheme formula: rate (explicit or default) against the taxable
/// value, base-capped for HUT.
fn special_scheme(
    rules: &StateRules,
    scheme: VehicleTaxScheme,
    taxable: Money,
) -> (Rate, Money, &'static str) {
    match scheme {
        VehicleTaxScheme::SpecialTavt => {
            let rate = rules.scheme_rate.unwrap_or(Rate::from_decimal(dec!(0.07)));
            (rate, taxable, "title ad valorem tax")
        }
        VehicleTaxScheme::SpecialHut => {
            let rate = rules.scheme_rate.unwrap_or(Rate::from_decimal(dec!(0.03)));
            let base = taxable.apply_cap(rules.scheme_base_cap);
            (rate, base, "highway use tax")
        }
        VehicleTaxScheme::DmvPrivilegeTax => {
            let rate = rules.scheme_rate.unwrap_or(Rate::from_decimal(dec!(0.005)));
            (rate, taxable, "dmv privilege tax")
        }
        VehicleTaxScheme::StatePlusLocal => unreachable!("standard scheme has no special formula"),
    }
}

/// Apply the rounding profile to raw (unrounded) component amounts.
///
/// Round-then-sum rounds each line and totals the results. Sum-then-
/// round totals the raw products, rounds once, and reconciles the
/// display lines against that total by adjusting the largest line.
fn finalize_breakdown(
    raw: Vec<(TaxLevel, Rate, Money)>,
    profile: RoundingProfile,
) -> (Vec<TaxLine>, Money) {
    match profile {
        RoundingProfile::RoundThenSum => {
            let lines: Vec<TaxLine> = raw
                .into_iter()
                .map(|(level, rate, amount)| TaxLine {
                    level,
                    rate,
                    amount: amount.round_cents(),
                })
                .collect();
            let total = Money::sum(lines.iter().map(|l| l.amount));
            (lines, total)
        }
        RoundingProfile::SumThenRound => {
            let total = Money::sum(raw.iter().map(|(_, _, a)| *a)).round_cents();
            let mut lines: Vec<TaxLine> = raw
                .into_iter()
                .map(|(level, rate, amount)| TaxLine {
                    level,
                    rate,
                    amount: amount.round_cents(),
                })
                .collect();
            // Reconcile display lines with the authoritative total
            let line_sum = Money::sum(lines.iter().map(|l| l.amount));
            let drift = total - line_sum;
            if !drift.is_zero() {
                if let Some(largest) = lines
                    .iter_mut()
                    .max_by(|a, b| a.amount.as_decimal().cmp(&b.amount.as_decimal()))
                {
                    largest.amount = largest.amount + drift;
                }
            }
            (lines, total)
        }
    }
}

/// Step 6: interstate reciprocity credit. Shared with the lease path,
/// where the credit applies against the upfront portion.
pub(crate) fn reciprocity_credit(
    ctx: TaxContext<'_>,
    gross_tax: Money,
    applied: &mut Vec<AppliedRule>,
) -> Money {
    let rules = &ctx.rules.reciprocity;
    let Some(origin) = &ctx.input.origin_tax_info else {
        return Money::ZERO;
    };

    if !rules.enabled || origin.amount.is_zero() {
        return Money::ZERO;
    }

    let is_lease = ctx.input.deal_type == DealType::Lease;
    let in_scope = match rules.scope {
        ReciprocityScope::RetailOnly => !is_lease,
        ReciprocityScope::Both => !(is_lease && rules.has_lease_exception),
    };
    if !in_scope {
        applied.push(AppliedRule::new(
            "RECIPROCITY_OUT_OF_SCOPE",
            "deal type outside reciprocity scope; no credit".to_string(),
        ));
        return Money::ZERO;
    }

    if let Some(window) = rules.time_window_days {
        let age = (ctx.input.as_of_date - origin.tax_paid_date).num_days();
        if age < 0 || age > i64::from(window) {
            applied.push(AppliedRule::new(
                "RECIPROCITY_WINDOW_EXPIRED",
                format!("origin tax paid {} days ago, window is {} days", age, window),
            ));
            return Money::ZERO;
        }
    }

    let mut credit = match rules.home_state_behavior {
        ReciprocityBehavior::CreditUpToStateRate => origin.amount.min(gross_tax),
        ReciprocityBehavior::CreditFull => origin.amount,
        ReciprocityBehavior::None => Money::ZERO,
    };
    if rules.cap_at_this_states_tax {
        credit = credit.min(gross_tax);
    }

    if credit.is_zero() {
        return Money::ZERO;
    }

    applied.push(AppliedRule::new(
        "RECIPROCITY_CREDIT",
        format!("credit {} for tax paid to {}", credit, origin.state),
    ));
    if rules.require_proof_of_tax_paid && !origin.proof_provided {
        applied.push(AppliedRule::new(
            "RECIPROCITY_PROOF_REQUIRED",
            "state requires proof of tax paid; collect documentation".to_string(),
        ));
    }

    credit
}

/// Luxury advisory: flat-rate states with a threshold still flag
/// high-line units for the desk.
fn luxury_advisory(ctx: TaxContext<'_>, applied: &mut Vec<AppliedRule>) {
    if let Some(threshold) = ctx.rules.luxury_threshold {
        if ctx.input.vehicle_price >= threshold {
            applied.push(AppliedRule::new(
                "LUXURY_VEHICLE",
                "Luxury vehicle tax applied".to_string(),
            ));
        }
    }
}

/// Net a reciprocity credit into the breakdown lines, state line
/// first, so the published lines always sum to the net total. A credit
/// larger than the lines zeroes them out.
pub(crate) fn net_credit_into_breakdown(lines: &mut [TaxLine], credit: Money) {
    let mut remaining = credit;
    for line in lines.iter_mut() {
        if remaining.is_zero() {
            break;
        }
        let applied = line.amount.min(remaining);
        line.amount = line.amount - applied;
        remaining = remaining - applied;
    }
}

/// Split a total across rate components, adjusting the final line so
/// the lines reconcile exactly. Used by the lease path, where the
/// per-payment arithmetic owns the total.
pub(crate) fn distribute_total(total: Money, rates: &RateVector) -> Vec<TaxLine> {
    let components = rates.components();
    if components.is_empty() || total.is_zero() {
        return components
            .into_iter()
            .map(|(level, rate)| TaxLine { level, rate, amount: Money::ZERO })
            .collect();
    }

    let total_rate = rates.total().as_decimal();
    let mut lines = Vec::with_capacity(components.len());
    let mut allocated = Money::ZERO;
    let last = components.len() - 1;

    for (i, (level, rate)) in components.into_iter().enumerate() {
        let amount = if i == last {
            total - allocated
        } else {
            let share: Decimal = rate.as_decimal() / total_rate;
            (total * share).round_cents()
        };
        allocated = allocated + amount;
        lines.push(TaxLine { level, rate, amount });
    }
    lines
}

/// Collect jurisdiction-level advisories for a calculation.
pub fn jurisdiction_warnings(jurisdiction: &Jurisdiction) -> Vec<QuoteWarning> {
    jurisdiction.rate_warning().into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jurisdiction::JurisdictionStore;
    use crate::rule_store::StateRuleStore;
    use crate::types::{Fee, OriginTaxInfo, Product, StateCode};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn fixture(state: StateCode, zip: &str) -> (DealInput, Jurisdiction, StateRules) {
        let jurisdictions = JurisdictionStore::with_builtin();
        let rules = StateRuleStore::with_builtin();
        let input = DealInput::empty(state, zip, date());
        let jurisdiction = jurisdictions.resolve(zip, date()).unwrap();
        let state_rules = rules.get(state, date()).unwrap();
        (input, jurisdiction, state_rules)
    }

    fn run(input: &DealInput, jurisdiction: &Jurisdiction, rules: &StateRules) -> TaxOutcome {
        compute_retail_tax(TaxContext {
            input,
            jurisdiction,
            rules,
        })
        .unwrap()
    }

    #[test]
    fn test_texas_retail_with_trade() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::TX, "75001");
        input.vehicle_price = Money::new(dec!(30000));
        input.trade_allowance = Money::new(dec!(10000));

        let outcome = run(&input, &jurisdiction, &rules);

        assert_eq!(outcome.taxable_amount, Money::new(dec!(20000)));
        assert_eq!(outcome.total_tax, Money::new(dec!(1250.00)));
        assert_eq!(outcome.trade_credit_applied, Money::new(dec!(10000)));
    }

    #[test]
    fn test_california_denies_trade_credit() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::CA, "90210");
        input.vehicle_price = Money::new(dec!(30000));
        input.trade_allowance = Money::new(dec!(10000));

        let outcome = run(&input, &jurisdiction, &rules);

        assert_eq!(outcome.trade_credit_applied, Money::ZERO);
        assert_eq!(outcome.taxable_amount, Money::new(dec!(30000)));
    }

    #[test]
    fn test_california_luxury_advisory() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::CA, "90210");
        input.vehicle_price = Money::new(dec!(105000));

        let outcome = run(&input, &jurisdiction, &rules);

        assert_eq!(outcome.total_tax, Money::new(dec!(7612.50)));
        assert!(outcome
            .applied_rules
            .iter()
            .any(|r| r.detail == "Luxury vehicle tax applied"));
    }

    #[test]
    fn test_wisconsin_taxable_manufacturer_rebate() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::WI, "53201");
        input.vehicle_price = Money::new(dec!(35000));
        input.manufacturer_rebate = Money::new(dec!(5000));

        let outcome = run(&input, &jurisdiction, &rules);

        // Rebate does not reduce the base in WI
        assert_eq!(outcome.taxable_amount, Money::new(dec!(35000)));
        assert_eq!(outcome.total_tax, Money::new(dec!(1925.00)));
        assert!(outcome
            .applied_rules
            .iter()
            .any(|r| r.code == "MFR_REBATE_TAXABLE"));
    }

    #[test]
    fn test_texas_nontaxable_rebate_reduces_base() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::TX, "75001");
        input.vehicle_price = Money::new(dec!(30000));
        input.manufacturer_rebate = Money::new(dec!(2000));

        let outcome = run(&input, &jurisdiction, &rules);
        assert_eq!(outcome.taxable_amount, Money::new(dec!(28000)));
    }

    #[test]
    fn test_capped_trade_credit() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::WV, "25301");
        input.vehicle_price = Money::new(dec!(60000));
        input.trade_allowance = Money::new(dec!(30000));

        let outcome = run(&input, &jurisdiction, &rules);

        // WV caps the trade credit at $25,000
        assert_eq!(outcome.trade_credit_applied, Money::new(dec!(25000)));
        assert_eq!(outcome.taxable_amount, Money::new(dec!(35000)));
    }

    #[test]
    fn test_nc_hut_scheme() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::NC, "27601");
        input.vehicle_price = Money::new(dec!(30000));

        let outcome = run(&input, &jurisdiction, &rules);

        assert_eq!(outcome.total_tax, Money::new(dec!(900.00)));
        assert_eq!(outcome.breakdown.len(), 1);
        assert!(outcome.applied_rules.iter().any(|r| r.code == "SPECIAL_SCHEME"));
    }

    #[test]
    fn test_nc_hut_base_cap() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::NC, "27601");
        input.vehicle_price = Money::new(dec!(100000));

        let outcome = run(&input, &jurisdiction, &rules);

        // 3% of the capped $80,000 base
        assert_eq!(outcome.total_tax, Money::new(dec!(2400.00)));
    }

    #[test]
    fn test_georgia_tavt_replaces_local() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::GA, "30301");
        input.vehicle_price = Money::new(dec!(40000));
        input.trade_allowance = Money::new(dec!(10000));

        let outcome = run(&input, &jurisdiction, &rules);

        // TAVT 7% of 30000, county rate not applied
        assert_eq!(outcome.total_tax, Money::new(dec!(2100.00)));
        assert_eq!(outcome.breakdown.len(), 1);
    }

    #[test]
    fn test_nc_reciprocity_within_window() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::NC, "27601");
        input.vehicle_price = Money::new(dec!(30000));
        input.origin_tax_info = Some(OriginTaxInfo {
            state: StateCode::SC,
            amount: Money::new(dec!(1500)),
            tax_paid_date: date() - chrono::Duration::days(45),
            proof_provided: true,
        });

        let outcome = run(&input, &jurisdiction, &rules);

        assert_eq!(outcome.reciprocity_credit, Money::new(dec!(900.00)));
        assert_eq!(outcome.total_tax, Money::new(dec!(0.00)));
        // The credit is netted into the lines: they sum to the total
        let sum = Money::sum(outcome.breakdown.iter().map(|l| l.amount));
        assert_eq!(sum, outcome.total_tax);
    }

    #[test]
    fn test_reciprocity_expired_window() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::NC, "27601");
        input.vehicle_price = Money::new(dec!(30000));
        input.origin_tax_info = Some(OriginTaxInfo {
            state: StateCode::SC,
            amount: Money::new(dec!(1500)),
            tax_paid_date: date() - chrono::Duration::days(120),
            proof_provided: true,
        });

        let outcome = run(&input, &jurisdiction, &rules);

        assert_eq!(outcome.reciprocity_credit, Money::ZERO);
        assert_eq!(outcome.total_tax, Money::new(dec!(900.00)));
    }

    #[test]
    fn test_reciprocity_partial_credit() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::NC, "27601");
        input.vehicle_price = Money::new(dec!(30000));
        input.origin_tax_info = Some(OriginTaxInfo {
            state: StateCode::SC,
            amount: Money::new(dec!(500)),
            tax_paid_date: date() - chrono::Duration::days(10),
            proof_provided: true,
        });

        let outcome = run(&input, &jurisdiction, &rules);

        // Origin tax below this state's tax: pay the difference
        assert_eq!(outcome.reciprocity_credit, Money::new(dec!(500.00)));
        assert_eq!(outcome.total_tax, Money::new(dec!(400.00)));
        let sum = Money::sum(outcome.breakdown.iter().map(|l| l.amount));
        assert_eq!(sum, Money::new(dec!(400.00)));
    }

    #[test]
    fn test_reciprocity_proof_advisory() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::NC, "27601");
        input.vehicle_price = Money::new(dec!(30000));
        input.origin_tax_info = Some(OriginTaxInfo {
            state: StateCode::SC,
            amount: Money::new(dec!(1500)),
            tax_paid_date: date() - chrono::Duration::days(10),
            proof_provided: false,
        });

        let outcome = run(&input, &jurisdiction, &rules);

        // Credit still applies; advisory recorded
        assert_eq!(outcome.reciprocity_credit, Money::new(dec!(900.00)));
        assert!(outcome
            .applied_rules
            .iter()
            .any(|r| r.code == "RECIPROCITY_PROOF_REQUIRED"));
    }

    #[test]
    fn test_negative_equity_added_when_taxable() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::FL, "33101");
        input.vehicle_price = Money::new(dec!(30000));
        input.trade_allowance = Money::new(dec!(8000));
        input.trade_payoff = Money::new(dec!(12000));

        let outcome = run(&input, &jurisdiction, &rules);

        // 30000 - 8000 trade + 4000 negative equity
        assert_eq!(outcome.taxable_amount, Money::new(dec!(26000)));
    }

    #[test]
    fn test_doc_fee_cap() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::CA, "90210");
        input.vehicle_price = Money::new(dec!(30000));
        input.fees = vec![Fee::new("DOC", Money::new(dec!(500)))];

        let outcome = run(&input, &jurisdiction, &rules);

        // Only $85 of the doc fee is taxed in CA
        assert_eq!(outcome.taxable_amount, Money::new(dec!(30085)));
        assert!(outcome.applied_rules.iter().any(|r| r.code == "DOC_FEE_CAPPED"));
    }

    #[test]
    fn test_gap_separately_stated_exemption() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::FL, "33101");
        input.vehicle_price = Money::new(dec!(30000));
        input.products = vec![
            Product {
                category: ProductCategory::Gap,
                price: Money::new(dec!(900)),
                cost: Money::new(dec!(400)),
                taxable: None,
                separately_stated: true,
            },
            Product {
                category: ProductCategory::Warranty,
                price: Money::new(dec!(2500)),
                cost: Money::new(dec!(1100)),
                taxable: None,
                separately_stated: false,
            },
        ];

        let outcome = run(&input, &jurisdiction, &rules);

        // FL taxes service contracts; separately-stated GAP is exempt
        assert_eq!(outcome.taxable_amount, Money::new(dec!(32500)));
    }

    #[test]
    fn test_zero_taxable_after_credits() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::TX, "75001");
        input.vehicle_price = Money::new(dec!(20000));
        input.trade_allowance = Money::new(dec!(25000));

        let outcome = run(&input, &jurisdiction, &rules);

        assert_eq!(outcome.taxable_amount, Money::ZERO);
        assert_eq!(outcome.total_tax, Money::new(dec!(0.00)));
    }

    #[test]
    fn test_montana_no_tax() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::MT, "59601");
        input.vehicle_price = Money::new(dec!(30000));

        let outcome = run(&input, &jurisdiction, &rules);
        assert_eq!(outcome.total_tax, Money::ZERO);
        assert!(outcome.breakdown.is_empty());
    }

    #[test]
    fn test_breakdown_sums_to_total_multi_level() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::IL, "60601");
        input.vehicle_price = Money::new(dec!(33333.33));

        let outcome = run(&input, &jurisdiction, &rules);
        let sum = Money::sum(outcome.breakdown.iter().map(|l| l.amount));
        assert!(Money::is_equal(sum, outcome.total_tax, dec!(0.01)));
        assert_eq!(outcome.breakdown.len(), 3);
    }

    #[test]
    fn test_sum_then_round_reconciles_lines() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::CA, "94105");
        input.vehicle_price = Money::new(dec!(19999.99));

        let outcome = run(&input, &jurisdiction, &rules);
        assert!(outcome
            .applied_rules
            .iter()
            .any(|r| r.detail.contains("sum-then-round")));
        let sum = Money::sum(outcome.breakdown.iter().map(|l| l.amount));
        assert_eq!(sum, outcome.total_tax);
    }

    #[test]
    fn test_distribute_total_reconciles() {
        let rates = RateVector {
            state: Rate::from_decimal(dec!(0.04)),
            county: Rate::from_decimal(dec!(0.015)),
            ..Default::default()
        };
        let lines = distribute_total(Money::new(dec!(123.45)), &rates);
        assert_eq!(Money::sum(lines.iter().map(|l| l.amount)), Money::new(dec!(123.45)));
    }

    #[test]
    fn test_determinism() {
        let (mut input, jurisdiction, rules) = fixture(StateCode::IL, "60601");
        input.vehicle_price = Money::new(dec!(31415.92));
        input.trade_allowance = Money::new(dec!(2718.28));

        let a = run(&input, &jurisdiction, &rules);
        let b = run(&input, &jurisdiction, &rules);
        assert_eq!(a, b);
    }
}
