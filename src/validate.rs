//! Input validation.
//!
//! Every external input passes through here before any business logic
//! runs. Hard failures collect into one `Validation` error listing
//! every offending field; there is no partial acceptance. Soft limits
//! (long terms, high APRs) surface as warnings on the quote instead.

use rust_decimal_macros::dec;

use crate::jurisdiction::normalize_zip;
use crate::types::{
    DealInput, DealType, DeskError, DeskResult, FieldIssue, Money, QuoteWarning,
};

/// Term window outside of which we warn (industry-standard desk bounds).
const TERM_MIN_MONTHS: u32 = 12;
const TERM_MAX_MONTHS: u32 = 84;

/// Validate a deal input. Returns advisory warnings on success, or a
/// single `Validation` error carrying every field issue on failure.
pub fn validate_deal_input(input: &DealInput) -> DeskResult<Vec<QuoteWarning>> {
    let mut issues: Vec<FieldIssue> = Vec::new();
    let mut warnings: Vec<QuoteWarning> = Vec::new();

    // Money fields that must never be negative
    let money_fields: [(&str, Money); 8] = [
        ("vehicle_price", input.vehicle_price),
        ("vehicle_cost", input.vehicle_cost),
        ("dealer_discount", input.dealer_discount),
        ("manufacturer_rebate", input.manufacturer_rebate),
        ("dealer_rebate", input.dealer_rebate),
        ("trade_allowance", input.trade_allowance),
        ("trade_payoff", input.trade_payoff),
        ("accessories_total", input.accessories_total),
    ];
    for (name, value) in money_fields {
        if value.is_negative() {
            issues.push(FieldIssue::new(name, "must be non-negative"));
        }
    }

    for (i, fee) in input.fees.iter().enumerate() {
        if fee.amount.is_negative() {
            issues.push(FieldIssue::new(
                format!("fees[{}].amount", i),
                "must be non-negative",
            ));
        }
        if fee.code.trim().is_empty() {
            issues.push(FieldIssue::new(format!("fees[{}].code", i), "must not be empty"));
        }
    }

    for (i, product) in input.products.iter().enumerate() {
        if product.price.is_negative() {
            issues.push(FieldIssue::new(
                format!("products[{}].price", i),
                "must be non-negative",
            ));
        }
        if product.cost.is_negative() {
            issues.push(FieldIssue::new(
                format!("products[{}].cost", i),
                "must be non-negative",
            ));
        }
    }

    if let Err(e) = normalize_zip(&input.zip_code) {
        issues.push(FieldIssue::new("zip_code", e.to_string()));
    }

    match input.deal_type {
        DealType::Retail => {
            if let Some(f) = &input.financing {
                if f.down_payment.is_negative() {
                    issues.push(FieldIssue::new("financing.down_payment", "must be non-negative"));
                }
                if f.apr.as_decimal() < dec!(0) {
                    issues.push(FieldIssue::new("financing.apr", "must be non-negative"));
                }
                if f.apr.as_decimal() > dec!(0.35) {
                    issues.push(FieldIssue::new("financing.apr", "exceeds 35% ceiling"));
                }
                if f.term_months == 0 {
                    issues.push(FieldIssue::new("financing.term_months", "must be at least 1"));
                } else if !(TERM_MIN_MONTHS..=TERM_MAX_MONTHS).contains(&f.term_months) {
                    warnings.push(QuoteWarning::new(
                        "TERM_OUT_OF_RANGE",
                        format!(
                            "term of {} months is outside the {}-{} desk window",
                            f.term_months, TERM_MIN_MONTHS, TERM_MAX_MONTHS
                        ),
                    ));
                }
            }
        }
        DealType::Lease => {
            let Some(l) = &input.leasing else {
                issues.push(FieldIssue::new("leasing", "required for lease deals"));
                return finish(issues, warnings);
            };
            if l.msrp.is_negative() || l.msrp.is_zero() {
                issues.push(FieldIssue::new("leasing.msrp", "must be positive"));
            }
            if l.selling_price.is_negative() {
                issues.push(FieldIssue::new("leasing.selling_price", "must be non-negative"));
            }
            if l.cash_down.is_negative() {
                issues.push(FieldIssue::new("leasing.cash_down", "must be non-negative"));
            }
            if l.acquisition_fee.is_negative() {
                issues.push(FieldIssue::new("leasing.acquisition_fee", "must be non-negative"));
            }
            if l.money_factor.as_decimal() < dec!(0) {
                issues.push(FieldIssue::new("leasing.money_factor", "must be non-negative"));
            }
            if l.residual_percent.as_decimal() <= dec!(0)
                || l.residual_percent.as_decimal() >= dec!(1)
            {
                issues.push(FieldIssue::new(
                    "leasing.residual_percent",
                    "must be a fraction between 0 and 1",
                ));
            }
            if l.term_months == 0 {
                issues.push(FieldIssue::new("leasing.term_months", "must be at least 1"));
            } else if !(TERM_MIN_MONTHS..=TERM_MAX_MONTHS).contains(&l.term_months) {
                warnings.push(QuoteWarning::new(
                    "TERM_OUT_OF_RANGE",
                    format!(
                        "term of {} months is outside the {}-{} desk window",
                        l.term_months, TERM_MIN_MONTHS, TERM_MAX_MONTHS
                    ),
                ));
            }
        }
        DealType::Cash => {}
    }

    if let Some(origin) = &input.origin_tax_info {
        if origin.amount.is_negative() {
            issues.push(FieldIssue::new("origin_tax_info.amount", "must be non-negative"));
        }
        if origin.tax_paid_date > input.as_of_date {
            issues.push(FieldIssue::new(
                "origin_tax_info.tax_paid_date",
                "cannot be in the future",
            ));
        }
    }

    finish(issues, warnings)
}

fn finish(
    issues: Vec<FieldIssue>,
    warnings: Vec<QuoteWarning>,
) -> DeskResult<Vec<QuoteWarning>> {
    if issues.is_empty() {
        Ok(warnings)
    } else {
        Err(DeskError::Validation { issues })
    }
}

/// Validate a VIN per ISO 3779: 17 characters, no I/O/Q, and a correct
/// check digit in position 9.
pub fn validate_vin(vin: &str) -> DeskResult<()> {
    let vin = vin.trim().to_ascii_uppercase();
    if vin.len() != 17 {
        return Err(DeskError::validation_field("vin", "must be 17 characters"));
    }
    if vin.bytes().any(|b| matches!(b, b'I' | b'O' | b'Q')) {
        return Err(DeskError::validation_field("vin", "I, O and Q are not valid VIN characters"));
    }

    const WEIGHTS: [u32; 17] = [8, 7, 6, 5, 4, 3, 2, 10, 0, 9, 8, 7, 6, 5, 4, 3, 2];
    let mut sum: u32 = 0;
    for (i, ch) in vin.chars().enumerate() {
        let value = vin_char_value(ch).ok_or_else(|| {
            DeskError::validation_field("vin", format!("invalid character {:?}", ch))
        })?;
        sum += value * WEIGHTS[i];
    }

    let remainder = sum % 11;
    let expected = if remainder == 10 {
        'X'
    } else {
        char::from_digit(remainder, 10).expect("mod 11 digit")
    };
    let actual = vin.chars().nth(8).expect("length checked");
    if actual != expected {
        return Err(DeskError::validation_field(
            "vin",
            format!("check digit mismatch: expected {}, found {}", expected, actual),
        ));
    }
    Ok(())
}

fn vin_char_value(ch: char) -> Option<u32> {
    match ch {
        '0'..='9' => ch.to_digit(10),
        'A' => Some(1), 'B' => Some(2), 'C' => Some(3), 'D' => Some(4),
        'E' => Some(5), 'F' => Some(6), 'G' => Some(7), 'H' => Some(8),
        'J' => Some(1), 'K' => Some(2), 'L' => Some(3), 'M' => Some(4),
        'N' => Some(5), 'P' => Some(7), 'R' => Some(9),
        'S' => Some(2), 'T' => Some(3), 'U' => Some(4), 'V' => Some(5),
        'W' => Some(6), 'X' => Some(7), 'Y' => Some(8), 'Z' => Some(9),
        _ => None,
    }
}

/// Light RFC 5322 email shape check: one `@`, non-empty local part,
/// dotted domain with no leading/trailing dots.
pub fn validate_email(email: &str) -> DeskResult<()> {
    let invalid = || DeskError::validation_field("email", format!("invalid email {:?}", email));

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.is_empty() || email.contains(char::is_whitespace) {
        return Err(invalid());
    }
    if domain.contains('@') {
        return Err(invalid());
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(invalid());
    }
    if domain.split('.').any(str::is_empty) {
        return Err(invalid());
    }
    Ok(())
}

/// Normalize a US phone number to `(nnn) nnn-nnnn`. Accepts the
/// canonical form, bare 10 digits, or 11 digits with a leading 1.
pub fn normalize_phone(phone: &str) -> DeskResult<String> {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let digits = match digits.len() {
        10 => digits,
        11 if digits.starts_with('1') => digits[1..].to_string(),
        _ => {
            return Err(DeskError::validation_field(
                "phone",
                format!("invalid phone number {:?}", phone),
            ))
        }
    };
    Ok(format!(
        "({}) {}-{}",
        &digits[..3],
        &digits[3..6],
        &digits[6..]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StateCode;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[test]
    fn test_valid_input_passes() {
        let mut input = DealInput::empty(StateCode::TX, "75001", date());
        input.vehicle_price = Money::new(dec!(30000));
        assert!(validate_deal_input(&input).unwrap().is_empty());
    }

    #[test]
    fn test_all_issues_collected() {
        let mut input = DealInput::empty(StateCode::TX, "bad-zip", date());
        input.vehicle_price = Money::new(dec!(-1));
        input.trade_allowance = Money::new(dec!(-5));

        let err = validate_deal_input(&input).unwrap_err();
        let DeskError::Validation { issues } = &err else {
            panic!("expected validation error");
        };
        let fields: Vec<&str> = issues.iter().map(|i| i.field.as_str()).collect();
        assert!(fields.contains(&"vehicle_price"));
        assert!(fields.contains(&"trade_allowance"));
        assert!(fields.contains(&"zip_code"));
    }

    #[test]
    fn test_term_warning_not_failure() {
        let mut input = DealInput::empty(StateCode::TX, "75001", date());
        input.vehicle_price = Money::new(dec!(30000));
        input.financing = Some(crate::types::FinancingTerms {
            down_payment: Money::ZERO,
            apr: "0.0499".parse().unwrap(),
            term_months: 96,
            buy_rate: None,
            rebates_to_loan: None,
        });

        let warnings = validate_deal_input(&input).unwrap();
        assert!(warnings.iter().any(|w| w.code == "TERM_OUT_OF_RANGE"));
    }

    #[test]
    fn test_apr_ceiling_is_hard() {
        let mut input = DealInput::empty(StateCode::TX, "75001", date());
        input.vehicle_price = Money::new(dec!(30000));
        input.financing = Some(crate::types::FinancingTerms {
            down_payment: Money::ZERO,
            apr: "0.40".parse().unwrap(),
            term_months: 60,
            buy_rate: None,
            rebates_to_loan: None,
        });
        assert!(validate_deal_input(&input).is_err());
    }

    #[test]
    fn test_lease_requires_terms() {
        let mut input = DealInput::empty(StateCode::TX, "75001", date());
        input.deal_type = DealType::Lease;
        assert!(validate_deal_input(&input).is_err());
    }

    #[test_case("1HGCM82633A004352", true; "known good vin")]
    #[test_case("11111111111111111", true; "all ones checks out")]
    #[test_case("1HGCM82633A00435", false; "too short")]
    #[test_case("1HGCM82633A0043520", false; "too long")]
    #[test_case("1HGCM82633I004352", false; "contains I")]
    #[test_case("1HGCM82634A004352", false; "bad check digit")]
    fn test_vin(vin: &str, ok: bool) {
        assert_eq!(validate_vin(vin).is_ok(), ok, "vin {}", vin);
    }

    #[test_case("buyer@example.com", true)]
    #[test_case("first.last@dealer.example.co", true)]
    #[test_case("no-at-sign.example.com", false)]
    #[test_case("two@@example.com", false)]
    #[test_case("trailing@example.", false)]
    #[test_case("spaces in@example.com", false)]
    fn test_email(email: &str, ok: bool) {
        assert_eq!(validate_email(email).is_ok(), ok, "email {}", email);
    }

    #[test]
    fn test_phone_normalization() {
        assert_eq!(normalize_phone("(214) 555-0147").unwrap(), "(214) 555-0147");
        assert_eq!(normalize_phone("214-555-0147").unwrap(), "(214) 555-0147");
        assert_eq!(normalize_phone("12145550147").unwrap(), "(214) 555-0147");
        assert!(normalize_phone("555-0147").is_err());
    }
}
