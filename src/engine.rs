//! Engine facade: the RPC-neutral operation surface.
//!
//! Thin, transport-agnostic wrappers over the pure calculators. An
//! HTTP, gRPC, or in-process caller maps 1:1 onto these functions plus
//! the lifecycle manager's operations; nothing here holds state.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::aggregator::compute_quote;
use crate::jurisdiction::JurisdictionStore;
use crate::rule_store::StateRuleStore;
use crate::tax::lease::{compute_lease_tax, LeaseTaxFigures};
use crate::tax::{compute_retail_tax, TaxContext};
use crate::types::{
    ComputedQuote, DealInput, DealType, DeskError, DeskResult, FieldIssue, Money, QuoteWarning,
    Rate, StateCode, TaxLine, TaxOutcome,
};
use crate::validate::validate_deal_input;
use crate::{lease, tax};

/// Engine configuration options.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Fail calculations that produce advisory warnings.
    pub strict_validation: bool,
}

/// Standalone sales-tax question: how much tax on this amount, here,
/// on this date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesTaxRequest {
    pub zip_code: String,
    pub state_code: StateCode,
    pub taxable_amount: Money,
    pub as_of_date: NaiveDate,
}

/// Result of a standalone sales-tax calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesTaxResult {
    pub taxable_amount: Money,
    pub breakdown: Vec<TaxLine>,
    pub total_tax: Money,
    pub total_rate: Rate,
    pub warnings: Vec<QuoteWarning>,
}

/// Calculate sales tax on a bare amount (no deal structure).
///
/// Uses the same jurisdiction resolution and per-state scheme handling
/// as full deal taxation, so estimates match final quotes.
pub fn calculate_sales_tax(
    request: &SalesTaxRequest,
    jurisdictions: &JurisdictionStore,
    rules_store: &StateRuleStore,
) -> DeskResult<SalesTaxResult> {
    if request.taxable_amount.is_negative() {
        return Err(DeskError::NegativeAmount {
            field: "taxable_amount".to_string(),
            value: request.taxable_amount.as_decimal().to_string(),
        });
    }

    let mut input = DealInput::empty(request.state_code, &request.zip_code, request.as_of_date);
    input.vehicle_price = request.taxable_amount;

    let jurisdiction = jurisdictions.resolve(&request.zip_code, request.as_of_date)?;
    if jurisdiction.state != request.state_code {
        return Err(DeskError::Validation {
            issues: vec![FieldIssue::new(
                "state_code",
                format!(
                    "ZIP {} resolves to {}, not {}",
                    request.zip_code, jurisdiction.state, request.state_code
                ),
            )],
        });
    }
    let rules = rules_store.get(request.state_code, request.as_of_date)?;

    let outcome = compute_retail_tax(TaxContext {
        input: &input,
        jurisdiction: &jurisdiction,
        rules: &rules,
    })?;

    Ok(SalesTaxResult {
        taxable_amount: outcome.taxable_amount,
        breakdown: outcome.breakdown,
        total_tax: outcome.total_tax,
        total_rate: jurisdiction.total_rate(),
        warnings: tax::jurisdiction_warnings(&jurisdiction),
    })
}

/// Full deal tax calculation: the complete breakdown with the
/// applied-rule audit trail, without the payment structures.
pub fn calculate_deal_taxes(
    input: &DealInput,
    jurisdictions: &JurisdictionStore,
    rules_store: &StateRuleStore,
) -> DeskResult<TaxOutcome> {
    validate_deal_input(input)?;

    let jurisdiction = jurisdictions.resolve(&input.zip_code, input.as_of_date)?;
    let rules = rules_store.get(input.state_code, input.as_of_date)?;
    let ctx = TaxContext {
        input,
        jurisdiction: &jurisdiction,
        rules: &rules,
    };

    match input.deal_type {
        DealType::Retail | DealType::Cash => compute_retail_tax(ctx),
        DealType::Lease => {
            let terms = input.leasing.as_ref().ok_or_else(|| {
                DeskError::validation_field("leasing", "required for lease deals")
            })?;
            let structure = lease::calculate_lease_structure(
                input,
                terms,
                rules.lease_rules.trade_in_credit,
            )?;
            let result = compute_lease_tax(
                ctx,
                &LeaseTaxFigures {
                    selling_price: terms.selling_price,
                    base_payment: structure.base_payment,
                    term_months: structure.term_months,
                    cap_reduction: structure.cap_cost.total_cap_reduction,
                    trade_equity: structure.cap_cost.trade_equity_applied,
                },
            )?;
            Ok(TaxOutcome {
                sale_base: terms.selling_price,
                trade_credit_applied: structure.cap_cost.trade_equity_applied,
                taxable_amount: structure.cap_cost.adjusted_cap_cost,
                breakdown: result.breakdown,
                total_tax: result.total_tax,
                reciprocity_credit: result.reciprocity_credit,
                upfront_tax: result.upfront_tax,
                monthly_tax: result.monthly_tax,
                applied_rules: result.applied_rules,
            })
        }
    }
}

/// Full quote calculation (see `aggregator::compute_quote`), with the
/// engine config applied.
pub fn calculate_quote(
    input: &DealInput,
    jurisdictions: &JurisdictionStore,
    rules_store: &StateRuleStore,
    config: &EngineConfig,
) -> DeskResult<ComputedQuote> {
    let quote = compute_quote(input, jurisdictions, rules_store)?;

    if config.strict_validation && !quote.warnings.is_empty() {
        return Err(DeskError::Validation {
            issues: quote
                .warnings
                .iter()
                .map(|w| FieldIssue::new(w.code.clone(), w.message.clone()))
                .collect(),
        });
    }

    Ok(quote)
}

/// Engine version, stamped into every quote.
pub fn engine_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Engine build information.
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub name: &'static str,
    pub version: &'static str,
}

pub fn engine_info() -> EngineInfo {
    EngineInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn stores() -> (JurisdictionStore, StateRuleStore) {
        (JurisdictionStore::with_builtin(), StateRuleStore::with_builtin())
    }

    #[test]
    fn test_sales_tax_lookup() {
        let (jur, rules) = stores();
        let result = calculate_sales_tax(
            &SalesTaxRequest {
                zip_code: "75001".to_string(),
                state_code: StateCode::TX,
                taxable_amount: Money::new(dec!(20000)),
                as_of_date: date(),
            },
            &jur,
            &rules,
        )
        .unwrap();

        assert_eq!(result.total_tax, Money::new(dec!(1250.00)));
        assert_eq!(result.total_rate.as_decimal(), dec!(0.0625));
    }

    #[test]
    fn test_sales_tax_unknown_zip() {
        let (jur, rules) = stores();
        let err = calculate_sales_tax(
            &SalesTaxRequest {
                zip_code: "99999".to_string(),
                state_code: StateCode::TX,
                taxable_amount: Money::new(dec!(20000)),
                as_of_date: date(),
            },
            &jur,
            &rules,
        )
        .unwrap_err();
        assert_eq!(err.code(), "JURISDICTION_NOT_FOUND");
    }

    #[test]
    fn test_sales_tax_rejects_negative() {
        let (jur, rules) = stores();
        let err = calculate_sales_tax(
            &SalesTaxRequest {
                zip_code: "75001".to_string(),
                state_code: StateCode::TX,
                taxable_amount: Money::new(dec!(-1)),
                as_of_date: date(),
            },
            &jur,
            &rules,
        )
        .unwrap_err();
        assert_eq!(err.code(), "NEGATIVE_AMOUNT");
    }

    #[test]
    fn test_deal_taxes_retail() {
        let (jur, rules) = stores();
        let mut input = DealInput::empty(StateCode::TX, "75001", date());
        input.vehicle_price = Money::new(dec!(30000));
        input.trade_allowance = Money::new(dec!(10000));

        let outcome = calculate_deal_taxes(&input, &jur, &rules).unwrap();
        assert_eq!(outcome.total_tax, Money::new(dec!(1250.00)));
        assert!(!outcome.applied_rules.is_empty());
    }

    #[test]
    fn test_strict_validation_promotes_warnings() {
        let (jur, rules) = stores();
        let mut input = DealInput::empty(StateCode::TX, "75001", date());
        input.vehicle_price = Money::new(dec!(30000));
        input.financing = Some(crate::types::FinancingTerms {
            down_payment: Money::ZERO,
            apr: "0.0499".parse().unwrap(),
            term_months: 96, // warns
            buy_rate: None,
            rebates_to_loan: None,
        });

        let relaxed = calculate_quote(&input, &jur, &rules, &EngineConfig::default());
        assert!(relaxed.is_ok());

        let strict = calculate_quote(
            &input,
            &jur,
            &rules,
            &EngineConfig {
                strict_validation: true,
            },
        );
        assert_eq!(strict.unwrap_err().code(), "VALIDATION");
    }

    #[test]
    fn test_engine_info() {
        let info = engine_info();
        assert_eq!(info.name, "desk-core");
        assert!(!info.version.is_empty());
        assert_eq!(info.version, engine_version());
    }
}
