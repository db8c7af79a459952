//! State tax rule definitions.
//!
//! A `StateRules` row is the authoritative description of how one state
//! taxes a vehicle transaction. Rows are versioned and effective-dated:
//! a rule change end-dates the current row and inserts a successor, so
//! point-in-time queries always see exactly one row.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::money::{Money, Rate};
use super::StateCode;

/// Trade-in credit policy for the retail taxable base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TradeInPolicy {
    /// Full trade allowance reduces the taxable base.
    #[serde(rename = "FULL")]
    Full,
    /// Credit capped at a fixed amount (e.g. WV $25,000).
    #[serde(rename = "CAPPED")]
    Capped { cap: Money },
    /// Only a percentage of the allowance counts.
    #[serde(rename = "PERCENT")]
    Percent { percent: Rate },
    /// No trade-in credit (e.g. CA).
    #[serde(rename = "NONE")]
    None,
}

impl TradeInPolicy {
    /// Credit granted for a given trade allowance under this policy.
    pub fn credit_for(&self, allowance: Money) -> Money {
        match self {
            TradeInPolicy::Full => allowance,
            TradeInPolicy::Capped { cap } => allowance.min(*cap),
            TradeInPolicy::Percent { percent } => allowance.apply_percent(*percent),
            TradeInPolicy::None => Money::ZERO,
        }
    }
}

/// How the state taxes the vehicle itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleTaxScheme {
    /// Standard sales tax: state rate plus local components.
    StatePlusLocal,
    /// Georgia Title Ad Valorem Tax; replaces the state sales tax.
    SpecialTavt,
    /// North Carolina Highway Use Tax; flat rate, capped base.
    SpecialHut,
    /// Oregon-style DMV privilege tax on the dealer.
    DmvPrivilegeTax,
}

/// Lease tax timing method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseMethod {
    /// Tax each monthly payment at the local rate.
    Monthly,
    /// Tax the full selling price once, due at signing.
    UpfrontOnSellingPrice,
    /// Tax the total of base payments, due at signing.
    UpfrontOnPayments,
    /// Single-payment lease: tax folded into the one payment.
    OnePay,
    /// Monthly tax plus upfront tax on the cap cost reduction.
    CapReductionTaxed,
}

/// Trade-in handling specific to leases. May differ from the retail
/// policy; the tax engine never substitutes one for the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseTradeInCredit {
    /// Same credit the retail policy would give.
    FollowRetail,
    /// Full equity reduces the taxed base.
    Full,
    /// Equity only reduces cap cost; the reduction itself may be taxed.
    CapCostOnly,
    /// No lease trade-in credit.
    None,
}

/// Lease-specific rule block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseRules {
    pub method: LeaseMethod,
    pub trade_in_credit: LeaseTradeInCredit,
    /// Cap-cost reduction (cash down, rebates) is itself taxed upfront.
    pub tax_cap_reduction: bool,
    pub negative_equity_taxable: bool,
}

impl Default for LeaseRules {
    fn default() -> Self {
        LeaseRules {
            method: LeaseMethod::Monthly,
            trade_in_credit: LeaseTradeInCredit::FollowRetail,
            tax_cap_reduction: false,
            negative_equity_taxable: false,
        }
    }
}

/// Which deal types interstate reciprocity covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReciprocityScope {
    RetailOnly,
    Both,
}

/// How tax paid to the origin state credits against this state's tax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReciprocityBehavior {
    CreditUpToStateRate,
    CreditFull,
    None,
}

/// Interstate reciprocity configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReciprocityRules {
    pub enabled: bool,
    pub scope: ReciprocityScope,
    pub home_state_behavior: ReciprocityBehavior,
    /// Proof of tax paid required; advisory only, credit still applies.
    pub require_proof_of_tax_paid: bool,
    pub cap_at_this_states_tax: bool,
    pub has_lease_exception: bool,
    /// Credit only within this many days of the origin tax payment.
    pub time_window_days: Option<u32>,
}

impl Default for ReciprocityRules {
    fn default() -> Self {
        ReciprocityRules {
            enabled: false,
            scope: ReciprocityScope::RetailOnly,
            home_state_behavior: ReciprocityBehavior::None,
            require_proof_of_tax_paid: false,
            cap_at_this_states_tax: true,
            has_lease_exception: false,
            time_window_days: None,
        }
    }
}

/// Per-fee-code taxability override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeTaxRule {
    pub code: String,
    pub taxable: bool,
}

/// Rounding convention for the tax breakdown. Reference systems differ;
/// the chosen profile is pinned per state and echoed in applied rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundingProfile {
    /// Round each component to the cent, total = sum of rounded parts.
    RoundThenSum,
    /// Sum unrounded products, round the total; components rounded for
    /// display and the largest adjusted so they reconcile.
    SumThenRound,
}

impl RoundingProfile {
    pub fn describe(&self) -> &'static str {
        match self {
            RoundingProfile::RoundThenSum => "round-then-sum",
            RoundingProfile::SumThenRound => "sum-then-round",
        }
    }
}

/// Complete tax rule set for one state at one point in time.
///
/// Identity is `(state_code, version, effective_date)`. A row is
/// current for `as_of` when `effective_date <= as_of < end_date`
/// (open-ended when `end_date` is `None`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRules {
    pub state_code: StateCode,
    pub version: u32,
    pub effective_date: NaiveDate,
    pub end_date: Option<NaiveDate>,

    pub trade_in_policy: TradeInPolicy,
    pub manufacturer_rebate_taxable: bool,
    pub dealer_rebate_taxable: bool,

    pub doc_fee_taxable: bool,
    pub doc_fee_cap: Option<Money>,
    /// Taxability for fee codes without an explicit per-item flag.
    pub fee_tax_rules: Vec<FeeTaxRule>,
    pub default_fee_taxable: bool,

    pub service_contract_taxable: bool,
    pub gap_taxable: bool,
    /// GAP escapes tax when itemized separately on the contract.
    pub gap_exempt_when_separately_stated: bool,
    pub accessories_taxable: bool,
    pub negative_equity_taxable: bool,

    pub vehicle_tax_scheme: VehicleTaxScheme,
    /// Local components still apply under a special scheme.
    pub vehicle_uses_local_sales_tax: bool,
    /// Rate for TAVT/HUT/privilege schemes; falls back per scheme.
    pub scheme_rate: Option<Rate>,
    /// Base cap for capped schemes (e.g. NC HUT commercial cap).
    pub scheme_base_cap: Option<Money>,
    /// Sale price at or above which the luxury advisory rule fires.
    pub luxury_threshold: Option<Money>,

    pub lease_rules: LeaseRules,
    pub reciprocity: ReciprocityRules,
    pub rounding_profile: RoundingProfile,
}

impl StateRules {
    /// Whether this row is current for the given date.
    pub fn covers(&self, as_of: NaiveDate) -> bool {
        if as_of < self.effective_date {
            return false;
        }
        match self.end_date {
            Some(end) => as_of < end,
            None => true,
        }
    }

    /// Taxability for a fee, honoring the per-item flag first, then the
    /// state's per-code rules, then the state default. Doc fees are
    /// handled separately by the engine (cap semantics).
    pub fn fee_taxable(&self, code: &str, explicit: Option<bool>) -> bool {
        if let Some(flag) = explicit {
            return flag;
        }
        self.fee_tax_rules
            .iter()
            .find(|r| r.code.eq_ignore_ascii_case(code))
            .map(|r| r.taxable)
            .unwrap_or(self.default_fee_taxable)
    }

    /// A permissive baseline row used as scaffolding by the built-in
    /// ruleset; callers override the fields that differ per state.
    pub fn baseline(state_code: StateCode, effective_date: NaiveDate) -> Self {
        StateRules {
            state_code,
            version: 1,
            effective_date,
            end_date: None,
            trade_in_policy: TradeInPolicy::Full,
            manufacturer_rebate_taxable: false,
            dealer_rebate_taxable: true,
            doc_fee_taxable: true,
            doc_fee_cap: None,
            fee_tax_rules: vec![],
            default_fee_taxable: false,
            service_contract_taxable: false,
            gap_taxable: false,
            gap_exempt_when_separately_stated: true,
            accessories_taxable: true,
            negative_equity_taxable: false,
            vehicle_tax_scheme: VehicleTaxScheme::StatePlusLocal,
            vehicle_uses_local_sales_tax: true,
            scheme_rate: None,
            scheme_base_cap: None,
            luxury_threshold: None,
            lease_rules: LeaseRules::default(),
            reciprocity: ReciprocityRules::default(),
            rounding_profile: RoundingProfile::RoundThenSum,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trade_in_policies() {
        let allowance = Money::new(dec!(30000));

        assert_eq!(TradeInPolicy::Full.credit_for(allowance), allowance);
        assert_eq!(
            TradeInPolicy::Capped { cap: Money::new(dec!(25000)) }.credit_for(allowance),
            Money::new(dec!(25000))
        );
        assert_eq!(
            TradeInPolicy::Percent { percent: Rate::from_decimal(dec!(0.5)) }
                .credit_for(allowance),
            Money::new(dec!(15000))
        );
        assert_eq!(TradeInPolicy::None.credit_for(allowance), Money::ZERO);
    }

    #[test]
    fn test_point_in_time_coverage() {
        let mut rules = StateRules::baseline(
            StateCode::TX,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );
        rules.end_date = Some(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());

        assert!(!rules.covers(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()));
        assert!(rules.covers(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        assert!(rules.covers(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()));
        assert!(!rules.covers(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
    }

    #[test]
    fn test_fee_taxability_precedence() {
        let mut rules = StateRules::baseline(
            StateCode::TX,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );
        rules.fee_tax_rules = vec![FeeTaxRule {
            code: "DEALER_PREP".to_string(),
            taxable: true,
        }];

        // Explicit flag wins
        assert!(!rules.fee_taxable("DEALER_PREP", Some(false)));
        // Per-code rule next, case-insensitive
        assert!(rules.fee_taxable("dealer_prep", None));
        // State default last
        assert!(!rules.fee_taxable("TITLE", None));
    }

    #[test]
    fn test_trade_in_policy_serde_tag() {
        let policy = TradeInPolicy::Capped {
            cap: Money::new(dec!(25000)),
        };
        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"CAPPED\""));
        let back: TradeInPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }
}
