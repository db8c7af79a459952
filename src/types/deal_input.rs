//! Deal input types: everything the desk sends into a calculation.
//!
//! Inputs are plain data. Validation happens in the validation layer
//! before any business logic touches them; the calculators may assume a
//! validated input but still guard their own invariants.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::money::{Money, MoneyFactor, Rate};
use super::StateCode;

/// Transaction structure for the deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DealType {
    Retail,
    Lease,
    Cash,
}

/// A dealer or government fee on the deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    /// Fee code (e.g. `DOC`, `TITLE`, `REGISTRATION`)
    pub code: String,
    pub amount: Money,
    /// Explicit taxability; `None` defers to the state rule set.
    #[serde(default)]
    pub taxable: Option<bool>,
    /// Capitalized into the lease cap cost rather than paid upfront.
    #[serde(default)]
    pub capitalized: bool,
}

impl Fee {
    pub fn new(code: impl Into<String>, amount: Money) -> Self {
        Fee {
            code: code.into(),
            amount,
            taxable: None,
            capitalized: false,
        }
    }

    pub fn is_doc_fee(&self) -> bool {
        self.code.eq_ignore_ascii_case("DOC")
    }
}

/// F&I product categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductCategory {
    Warranty,
    Gap,
    Maintenance,
    TireWheel,
    PaintProtection,
    KeyReplacement,
    Theft,
    Other,
}

/// An F&I product sold on the deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub category: ProductCategory,
    pub price: Money,
    /// Dealer cost, used for back-end profit.
    pub cost: Money,
    /// Explicit taxability; `None` defers to the state rule set.
    #[serde(default)]
    pub taxable: Option<bool>,
    /// Itemized separately on the contract (GAP exemption condition).
    #[serde(default)]
    pub separately_stated: bool,
}

/// Tax already paid to another state, for reciprocity credit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginTaxInfo {
    pub state: StateCode,
    pub amount: Money,
    pub tax_paid_date: NaiveDate,
    /// Proof document on file. Reciprocity applies either way; absent
    /// proof adds an advisory note when the state requires it.
    #[serde(default)]
    pub proof_provided: bool,
}

/// Retail financing terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancingTerms {
    pub down_payment: Money,
    /// Contract APR as a decimal (0.0499 for 4.99%).
    pub apr: Rate,
    pub term_months: u32,
    /// Lender buy rate; the spread funds dealer reserve.
    #[serde(default)]
    pub buy_rate: Option<Rate>,
    /// Portion of rebates applied against the amount financed.
    /// `None` applies all rebates to the loan.
    #[serde(default)]
    pub rebates_to_loan: Option<Money>,
}

/// Lease structuring terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeasingTerms {
    pub msrp: Money,
    pub selling_price: Money,
    pub term_months: u32,
    pub money_factor: MoneyFactor,
    /// Residual as a fraction of MSRP (0.60 for 60%).
    pub residual_percent: Rate,
    pub cash_down: Money,
    pub acquisition_fee: Money,
    /// Acquisition fee rolled into cap cost instead of due at signing.
    #[serde(default)]
    pub acquisition_fee_capitalized: bool,
    pub security_deposit: Money,
}

/// Complete deal calculation input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealInput {
    pub deal_type: DealType,

    pub vehicle_price: Money,
    /// Dealer's cost in the vehicle, for front-end gross.
    pub vehicle_cost: Money,
    pub dealer_discount: Money,
    pub manufacturer_rebate: Money,
    pub dealer_rebate: Money,
    pub trade_allowance: Money,
    pub trade_payoff: Money,
    pub accessories_total: Money,

    #[serde(default)]
    pub fees: Vec<Fee>,
    #[serde(default)]
    pub products: Vec<Product>,

    pub zip_code: String,
    pub state_code: StateCode,
    pub as_of_date: NaiveDate,

    #[serde(default)]
    pub origin_tax_info: Option<OriginTaxInfo>,
    #[serde(default)]
    pub financing: Option<FinancingTerms>,
    #[serde(default)]
    pub leasing: Option<LeasingTerms>,
}

impl DealInput {
    /// Combined manufacturer and dealer rebates.
    pub fn total_rebates(&self) -> Money {
        self.manufacturer_rebate + self.dealer_rebate
    }

    /// Sum of all fee amounts.
    pub fn total_fees(&self) -> Money {
        Money::sum(self.fees.iter().map(|f| f.amount))
    }

    /// Sum of all product prices.
    pub fn total_products(&self) -> Money {
        Money::sum(self.products.iter().map(|p| p.price))
    }

    /// Payoff in excess of allowance; zero when the trade has equity.
    pub fn negative_equity(&self) -> Money {
        (self.trade_payoff - self.trade_allowance).clamp_zero()
    }

    /// Allowance minus payoff; negative when the trade is underwater.
    pub fn net_trade_equity(&self) -> Money {
        self.trade_allowance - self.trade_payoff
    }

    /// A zeroed retail skeleton; tests and builders fill in the rest.
    pub fn empty(state_code: StateCode, zip_code: impl Into<String>, as_of_date: NaiveDate) -> Self {
        DealInput {
            deal_type: DealType::Retail,
            vehicle_price: Money::ZERO,
            vehicle_cost: Money::ZERO,
            dealer_discount: Money::ZERO,
            manufacturer_rebate: Money::ZERO,
            dealer_rebate: Money::ZERO,
            trade_allowance: Money::ZERO,
            trade_payoff: Money::ZERO,
            accessories_total: Money::ZERO,
            fees: vec![],
            products: vec![],
            zip_code: zip_code.into(),
            state_code,
            as_of_date,
            origin_tax_info: None,
            financing: None,
            leasing: None,
        }
    }
}
