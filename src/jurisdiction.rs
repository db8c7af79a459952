//! Jurisdiction resolution: ZIP code to tax rate vector.
//!
//! Jurisdiction rows are keyed by normalized 5-digit ZIP and
//! effective-dated. Lookups are point-in-time: `resolve` returns the
//! single row whose `[effective_date, end_date)` window covers the
//! requested date. Rate changes end-date the prior row and insert a
//! successor in the same operation, so at most one row is ever current.

use chrono::NaiveDate;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{DeskError, DeskResult, QuoteWarning, Rate, StateCode, TaxLevel};

/// Rate vector for one jurisdiction: one component per taxing level.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RateVector {
    pub state: Rate,
    pub county: Rate,
    pub city: Rate,
    pub township: Rate,
    pub special: Rate,
}

impl RateVector {
    /// Sum of all components.
    pub fn total(&self) -> Rate {
        self.state + self.county + self.city + self.township + self.special
    }

    /// State-only vector, the common case for flat-rate states.
    pub fn state_only(state: Rate) -> Self {
        RateVector {
            state,
            ..Default::default()
        }
    }

    /// Iterate non-zero components with their levels, state first.
    pub fn components(&self) -> Vec<(TaxLevel, Rate)> {
        [
            (TaxLevel::State, self.state),
            (TaxLevel::County, self.county),
            (TaxLevel::City, self.city),
            (TaxLevel::Township, self.township),
            (TaxLevel::Special, self.special),
        ]
        .into_iter()
        .filter(|(_, r)| !r.is_zero())
        .collect()
    }

    /// Local components only (everything but the state line).
    pub fn local_total(&self) -> Rate {
        self.county + self.city + self.township + self.special
    }
}

/// One effective-dated jurisdiction row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jurisdiction {
    /// Normalized 5-digit ZIP; the row identity.
    pub zip: String,
    pub state: StateCode,
    pub county: String,
    pub city: String,
    pub township: Option<String>,
    pub special_district: Option<String>,
    pub effective_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub rates: RateVector,
}

impl Jurisdiction {
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

    /// Combined rate across all levels.
    pub fn total_rate(&self) -> Rate {
        self.rates.total()
    }

    /// Advisory when the combined rate exceeds the 15% sanity bound.
    /// The lookup still succeeds; the desk decides what to do with it.
    pub fn rate_warning(&self) -> Option<QuoteWarning> {
        if self.total_rate().as_decimal() > dec!(0.15) {
            Some(QuoteWarning::new(
                "HIGH_COMBINED_RATE",
                format!(
                    "combined tax rate {} for ZIP {} exceeds 15%",
                    self.total_rate(),
                    self.zip
                ),
            ))
        } else {
            None
        }
    }
}

/// Normalize and validate a ZIP code. Accepts `12345` or `12345-6789`;
/// lookup always uses the 5-digit form.
pub fn normalize_zip(zip: &str) -> DeskResult<String> {
    let bytes = zip.as_bytes();
    let valid = match bytes.len() {
        5 => bytes.iter().all(u8::is_ascii_digit),
        10 => {
            bytes[..5].iter().all(u8::is_ascii_digit)
                && bytes[5] == b'-'
                && bytes[6..].iter().all(u8::is_ascii_digit)
        }
        _ => false,
    };
    if !valid {
        return Err(DeskError::validation_field(
            "zip_code",
            format!("invalid ZIP code {:?}; expected NNNNN or NNNNN-NNNN", zip),
        ));
    }
    Ok(zip[..5].to_string())
}

/// In-memory jurisdiction table with point-in-time lookup.
///
/// Read-mostly: quote calculation only reads; rate updates go through
/// `supersede`, which end-dates the current row and inserts the new one
/// as a single operation.
#[derive(Debug, Clone, Default)]
pub struct JurisdictionStore {
    rows: BTreeMap<String, Vec<Jurisdiction>>,
}

impl JurisdictionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the built-in jurisdiction table.
    pub fn with_builtin() -> Self {
        let mut store = Self::new();
        for row in builtin_jurisdictions() {
            store.insert(row);
        }
        store
    }

    /// Insert a row without supersession checks (seeding, migrations).
    pub fn insert(&mut self, row: Jurisdiction) {
        self.rows.entry(row.zip.clone()).or_default().push(row);
    }

    /// Replace the current row for a ZIP: the live row is end-dated at
    /// `new_row.effective_date` and the new row inserted.
    pub fn supersede(&mut self, new_row: Jurisdiction) -> DeskResult<()> {
        let effective = new_row.effective_date;
        let rows = self.rows.entry(new_row.zip.clone()).or_default();
        if let Some(current) = rows.iter_mut().find(|r| r.end_date.is_none()) {
            if current.effective_date >= effective {
                return Err(DeskError::validation_field(
                    "effective_date",
                    "superseding row must start after the current row",
                ));
            }
            current.end_date = Some(effective);
        }
        rows.push(new_row);
        Ok(())
    }

    /// Resolve the jurisdiction current for `as_of`.
    pub fn resolve(&self, zip: &str, as_of: NaiveDate) -> DeskResult<Jurisdiction> {
        let key = normalize_zip(zip)?;
        self.rows
            .get(&key)
            .and_then(|rows| rows.iter().find(|r| r.covers(as_of)))
            .cloned()
            .ok_or(DeskError::JurisdictionNotFound { zip: key })
    }

    pub fn len(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn seed(
    zip: &str,
    state: StateCode,
    county: &str,
    city: &str,
    rates: RateVector,
) -> Jurisdiction {
    Jurisdiction {
        zip: zip.to_string(),
        state,
        county: county.to_string(),
        city: city.to_string(),
        township: None,
        special_district: None,
        effective_date: NaiveDate::from_ymd_opt(2020, 1, 1).expect("static date"),
        end_date: None,
        rates,
    }
}

/// Built-in jurisdiction rows for the states the built-in rule set
/// covers. Production tenants load their own table; this keeps the
/// engine usable out of the box.
fn builtin_jurisdictions() -> Vec<Jurisdiction> {
    vec![
        // Texas: 6.25% state; motor vehicles are exempt from local add-ons
        seed("75001", StateCode::TX, "Dallas", "Addison",
            RateVector::state_only(Rate::from_decimal(dec!(0.0625)))),
        seed("78701", StateCode::TX, "Travis", "Austin",
            RateVector::state_only(Rate::from_decimal(dec!(0.0625)))),
        // California: 7.25% statewide base
        seed("90210", StateCode::CA, "Los Angeles", "Beverly Hills",
            RateVector::state_only(Rate::from_decimal(dec!(0.0725)))),
        seed("94105", StateCode::CA, "San Francisco", "San Francisco",
            RateVector {
                state: Rate::from_decimal(dec!(0.0725)),
                county: Rate::from_decimal(dec!(0.0125)),
                ..Default::default()
            }),
        // Wisconsin: 5% state + 0.5% county
        seed("53201", StateCode::WI, "Milwaukee", "Milwaukee",
            RateVector {
                state: Rate::from_decimal(dec!(0.05)),
                county: Rate::from_decimal(dec!(0.005)),
                ..Default::default()
            }),
        // North Carolina: HUT replaces sales tax on vehicles
        seed("27601", StateCode::NC, "Wake", "Raleigh",
            RateVector::state_only(Rate::from_decimal(dec!(0.0475)))),
        // Georgia: TAVT replaces sales tax on vehicles
        seed("30301", StateCode::GA, "Fulton", "Atlanta",
            RateVector {
                state: Rate::from_decimal(dec!(0.04)),
                county: Rate::from_decimal(dec!(0.03)),
                ..Default::default()
            }),
        // West Virginia: 6% state privilege tax on vehicles
        seed("25301", StateCode::WV, "Kanawha", "Charleston",
            RateVector::state_only(Rate::from_decimal(dec!(0.06)))),
        // Indiana: 7% state only
        seed("46032", StateCode::IN, "Hamilton", "Carmel",
            RateVector::state_only(Rate::from_decimal(dec!(0.07)))),
        // Florida: 6% state + discretionary county surtax
        seed("33101", StateCode::FL, "Miami-Dade", "Miami",
            RateVector {
                state: Rate::from_decimal(dec!(0.06)),
                county: Rate::from_decimal(dec!(0.01)),
                ..Default::default()
            }),
        // Illinois: 6.25% state + local
        seed("60601", StateCode::IL, "Cook", "Chicago",
            RateVector {
                state: Rate::from_decimal(dec!(0.0625)),
                county: Rate::from_decimal(dec!(0.0175)),
                city: Rate::from_decimal(dec!(0.0125)),
                ..Default::default()
            }),
        // New York: 4% state + local
        seed("10001", StateCode::NY, "New York", "New York",
            RateVector {
                state: Rate::from_decimal(dec!(0.04)),
                county: Rate::from_decimal(dec!(0.04)),
                special: Rate::from_decimal(dec!(0.00375)),
                ..Default::default()
            }),
        // Ohio: 5.75% state + county
        seed("43215", StateCode::OH, "Franklin", "Columbus",
            RateVector {
                state: Rate::from_decimal(dec!(0.0575)),
                county: Rate::from_decimal(dec!(0.0175)),
                ..Default::default()
            }),
        // Pennsylvania: 6% state
        seed("19103", StateCode::PA, "Philadelphia", "Philadelphia",
            RateVector {
                state: Rate::from_decimal(dec!(0.06)),
                city: Rate::from_decimal(dec!(0.02)),
                ..Default::default()
            }),
        // Michigan: 6% state only
        seed("48226", StateCode::MI, "Wayne", "Detroit",
            RateVector::state_only(Rate::from_decimal(dec!(0.06)))),
        // South Carolina: 5% with the $500 max tax handled in rules
        seed("29201", StateCode::SC, "Richland", "Columbia",
            RateVector::state_only(Rate::from_decimal(dec!(0.05)))),
        // Montana: no sales tax
        seed("59601", StateCode::MT, "Lewis and Clark", "Helena",
            RateVector::default()),
    ]
}

/// Convenience for callers that only need the vector and the advisory.
pub fn get_rates(jurisdiction: &Jurisdiction) -> (RateVector, Option<QuoteWarning>) {
    (jurisdiction.rates, jurisdiction.rate_warning())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_normalize_zip() {
        assert_eq!(normalize_zip("75001").unwrap(), "75001");
        assert_eq!(normalize_zip("75001-1234").unwrap(), "75001");
        assert!(normalize_zip("7500").is_err());
        assert!(normalize_zip("75001-12").is_err());
        assert!(normalize_zip("7500a").is_err());
        assert!(normalize_zip("").is_err());
    }

    #[test]
    fn test_resolve_builtin() {
        let store = JurisdictionStore::with_builtin();
        let j = store.resolve("75001", date(2025, 6, 1)).unwrap();
        assert_eq!(j.state, StateCode::TX);
        assert_eq!(j.total_rate().as_decimal(), dec!(0.0625));
    }

    #[test]
    fn test_resolve_plus_four_form() {
        let store = JurisdictionStore::with_builtin();
        let j = store.resolve("90210-4321", date(2025, 6, 1)).unwrap();
        assert_eq!(j.state, StateCode::CA);
    }

    #[test]
    fn test_resolve_unknown_zip() {
        let store = JurisdictionStore::with_builtin();
        let err = store.resolve("99999", date(2025, 6, 1)).unwrap_err();
        assert_eq!(err.code(), "JURISDICTION_NOT_FOUND");
    }

    #[test]
    fn test_point_in_time_resolution() {
        let mut store = JurisdictionStore::new();
        let mut old = seed(
            "11111",
            StateCode::OH,
            "Franklin",
            "Columbus",
            RateVector::state_only(Rate::from_decimal(dec!(0.055))),
        );
        old.effective_date = date(2020, 1, 1);
        store.insert(old);

        let mut new_row = seed(
            "11111",
            StateCode::OH,
            "Franklin",
            "Columbus",
            RateVector::state_only(Rate::from_decimal(dec!(0.0575))),
        );
        new_row.effective_date = date(2024, 7, 1);
        store.supersede(new_row).unwrap();

        let before = store.resolve("11111", date(2024, 6, 30)).unwrap();
        assert_eq!(before.rates.state.as_decimal(), dec!(0.055));

        let after = store.resolve("11111", date(2024, 7, 1)).unwrap();
        assert_eq!(after.rates.state.as_decimal(), dec!(0.0575));
    }

    #[test]
    fn test_supersede_rejects_non_forward_dates() {
        let mut store = JurisdictionStore::new();
        let mut first = seed(
            "22222",
            StateCode::TX,
            "Dallas",
            "Dallas",
            RateVector::state_only(Rate::from_decimal(dec!(0.0625))),
        );
        first.effective_date = date(2024, 1, 1);
        store.insert(first.clone());

        first.effective_date = date(2023, 1, 1);
        assert!(store.supersede(first).is_err());
    }

    #[test]
    fn test_rate_warning_bound() {
        let hot = seed(
            "33333",
            StateCode::IL,
            "Cook",
            "Chicago",
            RateVector {
                state: Rate::from_decimal(dec!(0.10)),
                county: Rate::from_decimal(dec!(0.06)),
                ..Default::default()
            },
        );
        let (rates, warning) = get_rates(&hot);
        assert_eq!(rates.total().as_decimal(), dec!(0.16));
        assert!(warning.is_some());

        let store = JurisdictionStore::with_builtin();
        let j = store.resolve("60601", date(2025, 6, 1)).unwrap();
        assert!(j.rate_warning().is_none());
    }

    #[test]
    fn test_component_iteration_skips_zero() {
        let store = JurisdictionStore::with_builtin();
        let tx = store.resolve("75001", date(2025, 6, 1)).unwrap();
        assert_eq!(tx.rates.components().len(), 1);

        let il = store.resolve("60601", date(2025, 6, 1)).unwrap();
        assert_eq!(il.rates.components().len(), 3);
    }
}
