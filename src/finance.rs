//! Loan payment and amortization calculations.
//!
//! Implements standard actuarial method amortization.
//!
//! # Key Formulas
//!
//! ## Monthly Payment
//! ```text
//! M = P * [r(1+r)^n] / [(1+r)^n - 1]
//!
//! Where:
//!   M = Monthly payment
//!   P = Principal (amount financed)
//!   r = Monthly interest rate (APR / 12)
//!   n = Number of payments (term in months)
//! ```
//!
//! ## For 0% APR
//! ```text
//! M = P / n       (exactly)
//! ```
//!
//! The final scheduled payment absorbs cumulative rounding so the
//! balance lands on zero.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::{powi, AmortizationSummary, Money, QuoteWarning, Rate};

/// Result of payment calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub monthly_payment: Money,
    pub total_of_payments: Money,
    /// Total interest over the loan.
    pub finance_charge: Money,
}

/// Single amortization schedule entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmortizationEntry {
    /// Payment number (1-indexed)
    pub payment_number: u32,
    pub due_date: NaiveDate,
    pub payment_amount: Money,
    pub principal: Money,
    pub interest: Money,
    pub remaining_balance: Money,
    pub cumulative_principal: Money,
    pub cumulative_interest: Money,
}

/// Net amount financed for a retail deal.
///
/// Cash price (vehicle + adds + fees + products + tax) less trade
/// equity, cash down, and any rebates applied to the loan. Negative
/// equity arrives through `net_trade_equity` and rolls the balance up.
pub fn amount_financed(
    cash_price: Money,
    net_trade_equity: Money,
    down_payment: Money,
    rebates_to_loan: Money,
) -> Money {
    (cash_price - net_trade_equity - down_payment - rebates_to_loan).clamp_zero()
}

/// Calculate the monthly payment for a loan.
///
/// Degenerate inputs (zero principal or term) yield a zero result
/// rather than an error; the validation layer rejects them upstream.
pub fn calculate_payment(principal: Money, apr: Rate, term_months: u32) -> PaymentResult {
    if principal.as_decimal() <= dec!(0) || term_months == 0 {
        return PaymentResult {
            monthly_payment: Money::ZERO,
            total_of_payments: Money::ZERO,
            finance_charge: Money::ZERO,
        };
    }

    let n = Decimal::from(term_months);

    // 0% APR: exact division, no finance charge
    if apr.is_zero() {
        let payment = (principal / n).round_cents();
        return PaymentResult {
            monthly_payment: payment,
            total_of_payments: payment * n,
            finance_charge: Money::ZERO,
        };
    }

    let monthly_rate = apr.as_decimal() / dec!(12);
    let one_plus_r_n = powi(dec!(1) + monthly_rate, term_months);
    let denominator = one_plus_r_n - dec!(1);

    if denominator == dec!(0) {
        let payment = (principal / n).round_cents();
        return PaymentResult {
            monthly_payment: payment,
            total_of_payments: payment * n,
            finance_charge: Money::ZERO,
        };
    }

    let payment = ((principal * monthly_rate * one_plus_r_n) / denominator).round_cents();
    let total = payment * n;

    PaymentResult {
        monthly_payment: payment,
        total_of_payments: total,
        finance_charge: total - principal,
    }
}

/// Generate a complete amortization schedule.
///
/// Each period: interest on the remaining balance, principal as the
/// payment remainder, final payment adjusted to clear the balance.
///
/// # Invariants
/// - Sum of principal portions equals the original principal
/// - Final `remaining_balance` is exactly zero
pub fn generate_amortization_schedule(
    principal: Money,
    apr: Rate,
    term_months: u32,
    first_payment_date: NaiveDate,
) -> Vec<AmortizationEntry> {
    let payment = calculate_payment(principal, apr, term_months).monthly_payment;
    let monthly_rate = apr.as_decimal() / dec!(12);

    let mut schedule = Vec::with_capacity(term_months as usize);
    let mut balance = principal;
    let mut cumulative_principal = Money::ZERO;
    let mut cumulative_interest = Money::ZERO;

    for i in 1..=term_months {
        let due_date = add_months(first_payment_date, i - 1);

        let interest = (balance * monthly_rate).round_cents();

        let principal_portion = if i == term_months {
            // Final payment clears whatever is left
            balance
        } else {
            (payment - interest).clamp_zero()
        };

        let actual_payment = if i == term_months {
            principal_portion + interest
        } else {
            payment
        };

        balance = (balance - principal_portion).clamp_zero();
        cumulative_principal = cumulative_principal + principal_portion;
        cumulative_interest = cumulative_interest + interest;

        schedule.push(AmortizationEntry {
            payment_number: i,
            due_date,
            payment_amount: actual_payment.round_cents(),
            principal: principal_portion.round_cents(),
            interest,
            remaining_balance: balance.round_cents(),
            cumulative_principal: cumulative_principal.round_cents(),
            cumulative_interest: cumulative_interest.round_cents(),
        });
    }

    schedule
}

/// Roll a schedule up into the summary carried on the quote.
pub fn summarize_schedule(schedule: &[AmortizationEntry], principal: Money) -> AmortizationSummary {
    let total_of_payments = Money::sum(schedule.iter().map(|e| e.payment_amount));
    AmortizationSummary {
        payment_count: schedule.len() as u32,
        total_of_payments,
        total_interest: total_of_payments - principal,
        final_payment: schedule
            .last()
            .map(|e| e.payment_amount)
            .unwrap_or_default(),
    }
}

/// Back-solve the APR from a known payment using Newton-Raphson.
///
/// Converges in well under 20 iterations for desk-realistic inputs;
/// returns zero when the payments imply no interest at all.
pub fn calculate_apr_from_payment(principal: Money, payment: Money, term_months: u32) -> Rate {
    if principal.as_decimal() <= dec!(0) || payment.as_decimal() <= dec!(0) || term_months == 0 {
        return Rate::ZERO;
    }

    let p = principal.as_decimal();
    let m = payment.as_decimal();
    let n = Decimal::from(term_months);

    if m * n <= p {
        return Rate::ZERO;
    }

    // Initial guess from simple interest
    let total_interest = m * n - p;
    let mut monthly_rate = total_interest / p / n;

    let tolerance = dec!(0.0000001);
    let delta = dec!(0.0000001);

    for _ in 0..100 {
        let one_plus_r_n = powi(dec!(1) + monthly_rate, term_months);
        let denominator = one_plus_r_n - dec!(1);
        if denominator == dec!(0) {
            break;
        }
        let f = p * monthly_rate * one_plus_r_n / denominator - m;

        // Numerical derivative
        let r_plus = monthly_rate + delta;
        let one_plus_r_plus_n = powi(dec!(1) + r_plus, term_months);
        let f_plus = p * r_plus * one_plus_r_plus_n / (one_plus_r_plus_n - dec!(1)) - m;
        let derivative = (f_plus - f) / delta;
        if derivative == dec!(0) {
            break;
        }

        let adjustment = f / derivative;
        monthly_rate -= adjustment;

        if adjustment.abs() < tolerance {
            break;
        }
    }

    Rate::from_decimal((monthly_rate * dec!(12)).round_dp(6))
}

/// Dealer reserve from the buy-rate spread.
///
/// The reserve is the dealer's share of the interest difference between
/// the contract rate and the lender's buy rate.
pub fn dealer_reserve(
    principal: Money,
    contract_apr: Rate,
    buy_rate: Rate,
    term_months: u32,
    participation: Rate,
) -> Money {
    if contract_apr <= buy_rate {
        return Money::ZERO;
    }
    let contract = calculate_payment(principal, contract_apr, term_months);
    let buy = calculate_payment(principal, buy_rate, term_months);
    let spread = contract.finance_charge - buy.finance_charge;
    spread.apply_percent(participation).round_cents()
}

/// Desk advisories for finance terms. Warnings, never failures.
pub fn finance_warnings(
    apr: Rate,
    term_months: u32,
    amount_financed: Money,
    vehicle_price: Money,
) -> Vec<QuoteWarning> {
    let mut warnings = Vec::new();

    if apr.as_decimal() > dec!(0.25) {
        warnings.push(QuoteWarning::new(
            "HIGH_APR",
            format!("APR {} exceeds 25%", apr),
        ));
    }
    if term_months > 84 {
        warnings.push(QuoteWarning::new(
            "LONG_TERM",
            format!("term of {} months exceeds 84", term_months),
        ));
    }
    if !vehicle_price.is_zero() {
        let ltv = amount_financed.as_decimal() / vehicle_price.as_decimal();
        if ltv > dec!(1.40) {
            warnings.push(QuoteWarning::new(
                "HIGH_LTV",
                format!(
                    "loan-to-value {}% exceeds 140%",
                    (ltv * dec!(100)).round_dp(1)
                ),
            ));
        }
    }

    warnings
}

/// Add months to a date, clamping to the end of the target month.
fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    let total_months = date.month() as i32 + months as i32 - 1;
    let year = date.year() + total_months / 12;
    let month = (total_months % 12) as u32 + 1;

    let max_day = days_in_month(year, month);
    let day = date.day().min(max_day);

    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(date)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 30,
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}
