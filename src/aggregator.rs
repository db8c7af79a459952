//! Deal aggregation: one validated input in, one immutable quote out.
//!
//! The aggregator is the only place that sequences the calculators:
//! validation, jurisdiction, rules, tax, then the finance or lease
//! structure, then totals and profit. It is a pure function of its
//! arguments; persistence and audit live in the lifecycle manager.

use rust_decimal_macros::dec;

use crate::finance;
use crate::jurisdiction::JurisdictionStore;
use crate::lease;
use crate::rule_store::StateRuleStore;
use crate::tax::lease::{compute_lease_tax, LeaseTaxFigures};
use crate::tax::{compute_retail_tax, TaxContext};
use crate::types::{
    ComputedQuote, DealInput, DealType, DeskError, DeskResult, FinanceSummary, LeaseMethod,
    LeaseSummary, Money, Profit, Rate, TaxOutcome,
};
use crate::validate::validate_deal_input;

/// Dealer share of the buy-rate spread when a buy rate is priced.
fn participation() -> Rate {
    Rate::from_decimal(dec!(0.70))
}

/// Compute the full quote for a deal input.
///
/// Pure: no side effects, no clocks, no I/O. Two calls with the same
/// arguments return bit-identical quotes.
pub fn compute_quote(
    input: &DealInput,
    jurisdictions: &JurisdictionStore,
    rules_store: &StateRuleStore,
) -> DeskResult<ComputedQuote> {
    let mut warnings = validate_deal_input(input)?;

    let jurisdiction = jurisdictions.resolve(&input.zip_code, input.as_of_date)?;
    if jurisdiction.state != input.state_code {
        return Err(DeskError::validation_field(
            "state_code",
            format!(
                "ZIP {} resolves to {}, not {}",
                input.zip_code, jurisdiction.state, input.state_code
            ),
        ));
    }
    warnings.extend(jurisdiction.rate_warning());

    let rules = rules_store.get(input.state_code, input.as_of_date)?;
    let ctx = TaxContext {
        input,
        jurisdiction: &jurisdiction,
        rules: &rules,
    };

    match input.deal_type {
        DealType::Retail | DealType::Cash => {
            let tax = compute_retail_tax(ctx)?;
            assemble_retail(input, tax, warnings)
        }
        DealType::Lease => {
            let terms = input.leasing.as_ref().ok_or_else(|| {
                DeskError::validation_field("leasing", "required for lease deals")
            })?;
            let structure = lease::calculate_lease_structure(
                input,
                terms,
                rules.lease_rules.trade_in_credit,
            )?;
            let figures = LeaseTaxFigures {
                selling_price: terms.selling_price,
                base_payment: structure.base_payment,
                term_months: structure.term_months,
                cap_reduction: structure.cap_cost.total_cap_reduction,
                trade_equity: structure.cap_cost.trade_equity_applied,
            };
            let lease_tax = compute_lease_tax(ctx, &figures)?;
            assemble_lease(input, terms, structure, lease_tax, warnings)
        }
    }
}

fn assemble_retail(
    input: &DealInput,
    tax: TaxOutcome,
    mut warnings: Vec<crate::types::QuoteWarning>,
) -> DeskResult<ComputedQuote> {
    let total_fees = input.total_fees();
    let total_products = input.total_products();
    let net_trade_in = input.net_trade_equity();

    let cash_price = (input.vehicle_price - input.dealer_discount
        + input.accessories_total
        + total_fees
        + total_products
        + tax.total_tax)
        .round_cents();

    let out_the_door = (cash_price - input.total_rebates() - net_trade_in).round_cents();

    let mut dealer_reserve = Money::ZERO;
    let finance_summary = if input.deal_type == DealType::Retail {
        input
            .financing
            .as_ref()
            .map(|terms| {
                let rebates_to_loan = terms.rebates_to_loan.unwrap_or(input.total_rebates());
                let amount = finance::amount_financed(
                    cash_price,
                    net_trade_in,
                    terms.down_payment,
                    rebates_to_loan,
                );
                let payment = finance::calculate_payment(amount, terms.apr, terms.term_months);
                let schedule = finance::generate_amortization_schedule(
                    amount,
                    terms.apr,
                    terms.term_months,
                    input.as_of_date,
                );
                let amortization = finance::summarize_schedule(&schedule, amount);

                dealer_reserve = terms
                    .buy_rate
                    .map(|buy| {
                        finance::dealer_reserve(
                            amount,
                            terms.apr,
                            buy,
                            terms.term_months,
                            participation(),
                        )
                    })
                    .unwrap_or(Money::ZERO);

                warnings.extend(finance::finance_warnings(
                    terms.apr,
                    terms.term_months,
                    amount,
                    input.vehicle_price,
                ));

                FinanceSummary {
                    amount_financed: amount,
                    monthly_payment: payment.monthly_payment,
                    apr: terms.apr,
                    term_months: terms.term_months,
                    total_of_payments: payment.total_of_payments,
                    total_interest: payment.finance_charge,
                    dealer_reserve,
                    amortization,
                }
            })
    } else {
        None
    };

    let profit = build_profit(input, dealer_reserve);
    let applied_rules = tax.applied_rules.clone();

    Ok(ComputedQuote {
        deal_type: input.deal_type,
        sale_base: tax.sale_base,
        net_trade_in,
        taxable_amount: tax.taxable_amount,
        tax_breakdown: tax.breakdown,
        total_tax: tax.total_tax,
        reciprocity_credit: tax.reciprocity_credit,
        total_fees,
        total_products,
        cash_price,
        out_the_door,
        finance: finance_summary,
        lease: None,
        profit,
        applied_rules,
        warnings,
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn assemble_lease(
    input: &DealInput,
    terms: &crate::types::LeasingTerms,
    structure: lease::LeaseStructure,
    lease_tax: crate::tax::lease::LeaseTaxResult,
    mut warnings: Vec<crate::types::QuoteWarning>,
) -> DeskResult<ComputedQuote> {
    let total_fees = input.total_fees();
    let total_products = input.total_products();
    let net_trade_in = input.net_trade_equity();

    let monthly_total = structure.base_payment + lease_tax.monthly_tax;
    let first_payment = monthly_total;
    let drive_off = lease::drive_off(input, terms, first_payment, lease_tax.upfront_tax);

    let one_pay = (lease_tax.method == LeaseMethod::OnePay).then(|| {
        lease::one_pay_amount(
            structure.base_payment,
            structure.term_months,
            lease_tax.total_tax,
        )
    });

    // Whole-lease cost: signing amount plus the remaining payments
    let remaining = rust_decimal::Decimal::from(structure.term_months.saturating_sub(1));
    let out_the_door = match one_pay {
        Some(amount) => (amount + drive_off - first_payment).round_cents(),
        None => (drive_off + monthly_total * remaining).round_cents(),
    };

    let cash_price = (terms.selling_price
        + input.accessories_total
        + total_fees
        + total_products
        + lease_tax.total_tax)
        .round_cents();

    if structure.equivalent_apr.as_decimal() > dec!(0.25) {
        warnings.push(crate::types::QuoteWarning::new(
            "HIGH_APR",
            format!("money factor equivalent APR {} exceeds 25%", structure.equivalent_apr),
        ));
    }

    let profit = build_profit(input, Money::ZERO);

    Ok(ComputedQuote {
        deal_type: DealType::Lease,
        sale_base: terms.selling_price,
        net_trade_in,
        taxable_amount: structure.cap_cost.adjusted_cap_cost,
        tax_breakdown: lease_tax.breakdown.clone(),
        total_tax: lease_tax.total_tax,
        reciprocity_credit: lease_tax.reciprocity_credit,
        total_fees,
        total_products,
        cash_price,
        out_the_door,
        finance: None,
        lease: Some(LeaseSummary {
            gross_cap_cost: structure.cap_cost.gross_cap_cost,
            cap_reduction: structure.cap_cost.total_cap_reduction,
            adjusted_cap_cost: structure.cap_cost.adjusted_cap_cost,
            residual_value: structure.residual_value,
            monthly_depreciation: structure.monthly_depreciation,
            monthly_rent_charge: structure.monthly_rent_charge,
            base_payment: structure.base_payment,
            monthly_tax: lease_tax.monthly_tax,
            total_payment: monthly_total,
            upfront_tax: lease_tax.upfront_tax,
            drive_off,
            term_months: structure.term_months,
            money_factor: terms.money_factor,
            equivalent_apr: structure.equivalent_apr,
            one_pay_amount: one_pay,
        }),
        profit,
        applied_rules: lease_tax.applied_rules,
        warnings,
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Profit split: front is sale price over vehicle cost, back is F&I
/// margin plus reserve.
fn build_profit(input: &DealInput, dealer_reserve: Money) -> Profit {
    let sale_price = match input.deal_type {
        DealType::Lease => input
            .leasing
            .as_ref()
            .map(|l| l.selling_price)
            .unwrap_or(input.vehicle_price),
        _ => input.vehicle_price - input.dealer_discount,
    };
    let front = (sale_price - input.vehicle_cost).round_cents();
    let back = (Money::sum(input.products.iter().map(|p| p.price - p.cost)) + dealer_reserve)
        .round_cents();
    Profit {
        front,
        back,
        total: front + back,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        FinancingTerms, LeasingTerms, MoneyFactor, Product, ProductCategory, StateCode,
    };
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn stores() -> (JurisdictionStore, StateRuleStore) {
        (JurisdictionStore::with_builtin(), StateRuleStore::with_builtin())
    }

    #[test]
    fn test_retail_quote_texas_trade() {
        let (jur, rules) = stores();
        let mut input = DealInput::empty(StateCode::TX, "75001", date());
        input.vehicle_price = Money::new(dec!(30000));
        input.vehicle_cost = Money::new(dec!(27000));
        input.trade_allowance = Money::new(dec!(10000));

        let quote = compute_quote(&input, &jur, &rules).unwrap();

        assert_eq!(quote.taxable_amount, Money::new(dec!(20000)));
        assert_eq!(quote.total_tax, Money::new(dec!(1250.00)));
        assert_eq!(quote.cash_price, Money::new(dec!(31250.00)));
        // OTD nets out the trade equity
        assert_eq!(quote.out_the_door, Money::new(dec!(21250.00)));
        assert_eq!(quote.profit.front, Money::new(dec!(3000)));
    }

    #[test]
    fn test_rebate_reduces_cash_owed_not_base() {
        let (jur, rules) = stores();
        let mut input = DealInput::empty(StateCode::WI, "53201", date());
        input.vehicle_price = Money::new(dec!(35000));
        input.vehicle_cost = Money::new(dec!(32000));
        input.manufacturer_rebate = Money::new(dec!(5000));

        let quote = compute_quote(&input, &jur, &rules).unwrap();

        assert_eq!(quote.taxable_amount, Money::new(dec!(35000)));
        assert_eq!(quote.total_tax, Money::new(dec!(1925.00)));
        // Customer owes price + tax - rebate
        assert_eq!(quote.out_the_door, Money::new(dec!(31925.00)));
    }

    #[test]
    fn test_financed_quote() {
        let (jur, rules) = stores();
        let mut input = DealInput::empty(StateCode::TX, "75001", date());
        input.vehicle_price = Money::new(dec!(30000));
        input.vehicle_cost = Money::new(dec!(27500));
        input.financing = Some(FinancingTerms {
            down_payment: Money::new(dec!(3000)),
            apr: "0.0499".parse().unwrap(),
            term_months: 60,
            buy_rate: None,
            rebates_to_loan: None,
        });

        let quote = compute_quote(&input, &jur, &rules).unwrap();
        let finance = quote.finance.unwrap();

        // 30000 + 1875 tax - 3000 down
        assert_eq!(finance.amount_financed, Money::new(dec!(28875.00)));
        assert!(finance.monthly_payment > Money::new(dec!(500)));
        assert_eq!(finance.amortization.payment_count, 60);
    }

    #[test]
    fn test_back_end_profit_includes_reserve() {
        let (jur, rules) = stores();
        let mut input = DealInput::empty(StateCode::TX, "75001", date());
        input.vehicle_price = Money::new(dec!(30000));
        input.vehicle_cost = Money::new(dec!(30000));
        input.products = vec![Product {
            category: ProductCategory::Gap,
            price: Money::new(dec!(900)),
            cost: Money::new(dec!(400)),
            taxable: Some(false),
            separately_stated: true,
        }];
        input.financing = Some(FinancingTerms {
            down_payment: Money::ZERO,
            apr: "0.0699".parse().unwrap(),
            term_months: 60,
            buy_rate: Some("0.0499".parse().unwrap()),
            rebates_to_loan: None,
        });

        let quote = compute_quote(&input, &jur, &rules).unwrap();
        let reserve = quote.finance.as_ref().unwrap().dealer_reserve;

        assert!(reserve > Money::ZERO);
        assert_eq!(quote.profit.front, Money::ZERO);
        assert_eq!(quote.profit.back, Money::new(dec!(500)) + reserve);
    }

    #[test]
    fn test_lease_quote_monthly_method() {
        let (jur, rules) = stores();
        let mut input = DealInput::empty(StateCode::CA, "90210", date());
        input.deal_type = DealType::Lease;
        input.vehicle_cost = Money::new(dec!(42000));
        input.leasing = Some(LeasingTerms {
            msrp: Money::new(dec!(45000)),
            selling_price: Money::new(dec!(45000)),
            term_months: 36,
            money_factor: MoneyFactor::new(dec!(0.00125)),
            residual_percent: Rate::from_decimal(dec!(0.60)),
            cash_down: Money::ZERO,
            acquisition_fee: Money::ZERO,
            acquisition_fee_capitalized: false,
            security_deposit: Money::ZERO,
        });

        let quote = compute_quote(&input, &jur, &rules).unwrap();
        let lease = quote.lease.unwrap();

        assert_eq!(lease.monthly_depreciation, Money::new(dec!(500.00)));
        assert_eq!(lease.monthly_rent_charge, Money::new(dec!(90.00)));
        assert_eq!(lease.base_payment, Money::new(dec!(590.00)));
        // CA taxes monthly: 590 * 7.25%
        assert_eq!(lease.monthly_tax, Money::new(dec!(42.78)));
        assert_eq!(lease.total_payment, Money::new(dec!(632.78)));
    }

    #[test]
    fn test_cash_deal_has_no_structures() {
        let (jur, rules) = stores();
        let mut input = DealInput::empty(StateCode::TX, "75001", date());
        input.deal_type = DealType::Cash;
        input.vehicle_price = Money::new(dec!(25000));
        input.vehicle_cost = Money::new(dec!(23000));

        let quote = compute_quote(&input, &jur, &rules).unwrap();
        assert!(quote.finance.is_none());
        assert!(quote.lease.is_none());
        assert_eq!(quote.total_tax, Money::new(dec!(1562.50)));
    }

    #[test]
    fn test_state_zip_mismatch_rejected() {
        let (jur, rules) = stores();
        let mut input = DealInput::empty(StateCode::CA, "75001", date());
        input.vehicle_price = Money::new(dec!(25000));

        let err = compute_quote(&input, &jur, &rules).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn test_quote_determinism_bit_identical() {
        let (jur, rules) = stores();
        let mut input = DealInput::empty(StateCode::IL, "60601", date());
        input.vehicle_price = Money::new(dec!(31415.92));
        input.vehicle_cost = Money::new(dec!(29000));
        input.trade_allowance = Money::new(dec!(2718.28));
        input.financing = Some(FinancingTerms {
            down_payment: Money::new(dec!(1000)),
            apr: "0.0599".parse().unwrap(),
            term_months: 72,
            buy_rate: None,
            rebates_to_loan: None,
        });

        let a = compute_quote(&input, &jur, &rules).unwrap();
        let b = compute_quote(&input, &jur, &rules).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.canonical_json().unwrap(), b.canonical_json().unwrap());
    }
}
