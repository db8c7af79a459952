//! Versioned state tax rule store.
//!
//! Rules are point-in-time like jurisdictions: a change inserts a new
//! row with a later `effective_date` and end-dates the current row in
//! the same operation. A built-in ruleset covers the common states and
//! acts as the authoritative fallback when no stored row applies;
//! states outside both fail with `UnsupportedState`.

use chrono::NaiveDate;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

use crate::types::rules::{FeeTaxRule, LeaseRules, LeaseTradeInCredit};
use crate::types::{
    DeskError, DeskResult, LeaseMethod, Money, Rate, ReciprocityBehavior, ReciprocityRules,
    ReciprocityScope, RoundingProfile, StateCode, StateRules, TradeInPolicy, VehicleTaxScheme,
};

/// Rule store: persisted rows first, built-in fallback second.
#[derive(Debug, Clone)]
pub struct StateRuleStore {
    rows: BTreeMap<StateCode, Vec<StateRules>>,
    builtin: BTreeMap<StateCode, StateRules>,
}

impl Default for StateRuleStore {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl StateRuleStore {
    /// Empty store with no fallback; mostly for tests.
    pub fn bare() -> Self {
        StateRuleStore {
            rows: BTreeMap::new(),
            builtin: BTreeMap::new(),
        }
    }

    /// Store backed by the built-in ruleset.
    pub fn with_builtin() -> Self {
        StateRuleStore {
            rows: BTreeMap::new(),
            builtin: builtin_rules()
                .into_iter()
                .map(|r| (r.state_code, r))
                .collect(),
        }
    }

    /// Point-in-time rule lookup. Stored rows win over the built-ins.
    pub fn get(&self, state: StateCode, as_of: NaiveDate) -> DeskResult<StateRules> {
        if let Some(rows) = self.rows.get(&state) {
            if let Some(row) = rows.iter().find(|r| r.covers(as_of)) {
                return Ok(row.clone());
            }
        }
        if let Some(fallback) = self.builtin.get(&state) {
            log::debug!("state {} served from built-in ruleset", state);
            return Ok(fallback.clone());
        }
        Err(DeskError::UnsupportedState {
            state: state.to_string(),
        })
    }

    /// String-code variant; lookup is case-insensitive.
    pub fn get_by_code(&self, state: &str, as_of: NaiveDate) -> DeskResult<StateRules> {
        let code = StateCode::from_str_opt(state).ok_or_else(|| DeskError::UnsupportedState {
            state: state.to_string(),
        })?;
        self.get(code, as_of)
    }

    /// Insert a row without supersession checks (seeding, migrations).
    pub fn insert(&mut self, row: StateRules) {
        self.rows.entry(row.state_code).or_default().push(row);
    }

    /// Apply a rule change: end-date the live row at the new row's
    /// effective date, bump the version, insert. One logical write.
    pub fn supersede(&mut self, mut new_row: StateRules) -> DeskResult<()> {
        let rows = self.rows.entry(new_row.state_code).or_default();
        if let Some(current) = rows.iter_mut().find(|r| r.end_date.is_none()) {
            if current.effective_date >= new_row.effective_date {
                return Err(DeskError::validation_field(
                    "effective_date",
                    "superseding rules must start after the current row",
                ));
            }
            current.end_date = Some(new_row.effective_date);
            new_row.version = current.version + 1;
        }
        rows.push(new_row);
        Ok(())
    }

    /// States with any coverage (stored or built-in).
    pub fn supported_states(&self) -> Vec<StateCode> {
        let mut states: Vec<StateCode> = self
            .rows
            .keys()
            .chain(self.builtin.keys())
            .copied()
            .collect();
        states.sort();
        states.dedup();
        states
    }
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).expect("static date")
}

/// The built-in per-state ruleset.
///
/// Each entry starts from `StateRules::baseline` and overrides what the
/// state actually does differently. Rates live in the jurisdiction
/// table; only scheme rates (TAVT/HUT/privilege) are pinned here.
fn builtin_rules() -> Vec<StateRules> {
    let mut rules = Vec::new();

    // Texas: full trade credit, rebates reduce the base, doc fee taxed,
    // lease taxed upfront on the full selling price.
    let mut tx = StateRules::baseline(StateCode::TX, epoch());
    tx.lease_rules = LeaseRules {
        method: LeaseMethod::UpfrontOnSellingPrice,
        trade_in_credit: LeaseTradeInCredit::Full,
        tax_cap_reduction: false,
        negative_equity_taxable: false,
    };
    tx.reciprocity = ReciprocityRules {
        enabled: true,
        scope: ReciprocityScope::Both,
        home_state_behavior: ReciprocityBehavior::CreditUpToStateRate,
        require_proof_of_tax_paid: true,
        cap_at_this_states_tax: true,
        has_lease_exception: false,
        time_window_days: None,
    };
    rules.push(tx);

    // California: no trade-in credit, manufacturer rebates taxable,
    // doc fee capped, cap-cost reductions taxed on leases, luxury
    // advisory at $100k.
    let mut ca = StateRules::baseline(StateCode::CA, epoch());
    ca.trade_in_policy = TradeInPolicy::None;
    ca.manufacturer_rebate_taxable = true;
    ca.doc_fee_cap = Some(Money::new(dec!(85)));
    ca.luxury_threshold = Some(Money::new(dec!(100000)));
    ca.negative_equity_taxable = true;
    ca.lease_rules = LeaseRules {
        method: LeaseMethod::Monthly,
        trade_in_credit: LeaseTradeInCredit::CapCostOnly,
        tax_cap_reduction: true,
        negative_equity_taxable: true,
    };
    ca.reciprocity = ReciprocityRules {
        enabled: true,
        scope: ReciprocityScope::RetailOnly,
        home_state_behavior: ReciprocityBehavior::CreditUpToStateRate,
        require_proof_of_tax_paid: true,
        cap_at_this_states_tax: true,
        has_lease_exception: true,
        time_window_days: Some(365),
    };
    ca.rounding_profile = RoundingProfile::SumThenRound;
    rules.push(ca);

    // Wisconsin: manufacturer rebates are taxable; lease trade-in acts
    // as cap reduction and the reduction itself is taxed.
    let mut wi = StateRules::baseline(StateCode::WI, epoch());
    wi.manufacturer_rebate_taxable = true;
    wi.lease_rules = LeaseRules {
        method: LeaseMethod::Monthly,
        trade_in_credit: LeaseTradeInCredit::CapCostOnly,
        tax_cap_reduction: true,
        negative_equity_taxable: false,
    };
    wi.reciprocity = ReciprocityRules {
        enabled: true,
        scope: ReciprocityScope::Both,
        home_state_behavior: ReciprocityBehavior::CreditUpToStateRate,
        require_proof_of_tax_paid: false,
        cap_at_this_states_tax: true,
        has_lease_exception: false,
        time_window_days: None,
    };
    rules.push(wi);

    // North Carolina: Highway Use Tax at 3%, no local tax on vehicles,
    // reciprocity credit within 90 days.
    let mut nc = StateRules::baseline(StateCode::NC, epoch());
    nc.vehicle_tax_scheme = VehicleTaxScheme::SpecialHut;
    nc.vehicle_uses_local_sales_tax = false;
    nc.scheme_rate = Some(Rate::from_decimal(dec!(0.03)));
    nc.scheme_base_cap = Some(Money::new(dec!(80000)));
    nc.reciprocity = ReciprocityRules {
        enabled: true,
        scope: ReciprocityScope::Both,
        home_state_behavior: ReciprocityBehavior::CreditUpToStateRate,
        require_proof_of_tax_paid: true,
        cap_at_this_states_tax: true,
        has_lease_exception: false,
        time_window_days: Some(90),
    };
    rules.push(nc);

    // Georgia: TAVT at 7% replaces state and local sales tax.
    let mut ga = StateRules::baseline(StateCode::GA, epoch());
    ga.vehicle_tax_scheme = VehicleTaxScheme::SpecialTavt;
    ga.vehicle_uses_local_sales_tax = false;
    ga.scheme_rate = Some(Rate::from_decimal(dec!(0.07)));
    ga.lease_rules = LeaseRules {
        method: LeaseMethod::UpfrontOnPayments,
        trade_in_credit: LeaseTradeInCredit::Full,
        tax_cap_reduction: false,
        negative_equity_taxable: false,
    };
    rules.push(ga);

    // West Virginia: privilege tax, trade credit capped at $25,000.
    let mut wv = StateRules::baseline(StateCode::WV, epoch());
    wv.vehicle_tax_scheme = VehicleTaxScheme::DmvPrivilegeTax;
    wv.vehicle_uses_local_sales_tax = false;
    wv.scheme_rate = Some(Rate::from_decimal(dec!(0.06)));
    wv.trade_in_policy = TradeInPolicy::Capped {
        cap: Money::new(dec!(25000)),
    };
    rules.push(wv);

    // Indiana: 7% state only, doc fee not taxable.
    let mut ind = StateRules::baseline(StateCode::IN, epoch());
    ind.doc_fee_taxable = false;
    ind.vehicle_uses_local_sales_tax = false;
    rules.push(ind);

    // Florida: negative equity taxable, service contracts taxable.
    let mut fl = StateRules::baseline(StateCode::FL, epoch());
    fl.negative_equity_taxable = true;
    fl.service_contract_taxable = true;
    rules.push(fl);

    // Illinois: rebates taxable, accessories taxable, lease taxed on
    // the cap-cost reduction plus monthly payments.
    let mut il = StateRules::baseline(StateCode::IL, epoch());
    il.manufacturer_rebate_taxable = true;
    il.dealer_rebate_taxable = true;
    il.lease_rules = LeaseRules {
        method: LeaseMethod::CapReductionTaxed,
        trade_in_credit: LeaseTradeInCredit::CapCostOnly,
        tax_cap_reduction: true,
        negative_equity_taxable: false,
    };
    rules.push(il);

    // New York: doc fee taxable, full upfront lease tax on payments.
    let mut ny = StateRules::baseline(StateCode::NY, epoch());
    ny.lease_rules = LeaseRules {
        method: LeaseMethod::UpfrontOnPayments,
        trade_in_credit: LeaseTradeInCredit::Full,
        tax_cap_reduction: false,
        negative_equity_taxable: true,
    };
    ny.negative_equity_taxable = true;
    rules.push(ny);

    // Ohio: straightforward state-plus-local.
    rules.push(StateRules::baseline(StateCode::OH, epoch()));

    // Pennsylvania.
    rules.push(StateRules::baseline(StateCode::PA, epoch()));

    // Michigan: trade credit phased; modeled as capped.
    let mut mi = StateRules::baseline(StateCode::MI, epoch());
    mi.trade_in_policy = TradeInPolicy::Capped {
        cap: Money::new(dec!(11000)),
    };
    mi.vehicle_uses_local_sales_tax = false;
    rules.push(mi);

    // South Carolina: infrastructure maintenance fee; 5% of the first
    // $10,000, i.e. tax capped at $500 via a base cap.
    let mut sc = StateRules::baseline(StateCode::SC, epoch());
    sc.scheme_base_cap = Some(Money::new(dec!(10000)));
    sc.vehicle_uses_local_sales_tax = false;
    rules.push(sc);

    // Montana: no sales tax at all.
    let mut mt = StateRules::baseline(StateCode::MT, epoch());
    mt.doc_fee_taxable = false;
    mt.accessories_taxable = false;
    rules.push(mt);

    // Common fee codes: government fees untaxed everywhere by default.
    for r in &mut rules {
        r.fee_tax_rules.push(FeeTaxRule {
            code: "TITLE".to_string(),
            taxable: false,
        });
        r.fee_tax_rules.push(FeeTaxRule {
            code: "REGISTRATION".to_string(),
            taxable: false,
        });
    }

    rules
}
