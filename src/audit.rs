//! Scenario audit ledger.
//!
//! An append-only change log with microsecond timestamps. Entries are
//! never updated or deleted; `(scenario_id, timestamp)` totally orders
//! a scenario's history, and replaying the log in that order
//! reconstructs any historical state. The ledger enforces the ordering
//! at write time: a non-monotonic timestamp is rejected, not repaired.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::types::{ComputedQuote, DeskError, DeskResult, Value};

/// Kind of change an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
    Recalculation,
}

/// One immutable change-log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub scenario_id: Uuid,
    pub deal_id: Uuid,
    pub user_id: Uuid,
    /// Microseconds since the Unix epoch; the ordering key.
    pub timestamp_micros: i64,
    pub change_type: ChangeType,
    /// Field path for create/update/delete entries.
    pub field_name: Option<String>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    /// Canonical quote JSON on recalculation entries.
    pub calculation_snapshot: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl AuditEntry {
    fn base(
        scenario_id: Uuid,
        deal_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
        change_type: ChangeType,
    ) -> Self {
        AuditEntry {
            id: Uuid::new_v4(),
            scenario_id,
            deal_id,
            user_id,
            timestamp_micros: at.timestamp_micros(),
            change_type,
            field_name: None,
            old_value: None,
            new_value: None,
            calculation_snapshot: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Scenario creation marker.
    pub fn creation(
        scenario_id: Uuid,
        deal_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Self {
        Self::base(scenario_id, deal_id, user_id, at, ChangeType::Create)
    }

    /// A single field change.
    pub fn field_update(
        scenario_id: Uuid,
        deal_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
        field: impl Into<String>,
        old_value: Option<Value>,
        new_value: Option<Value>,
    ) -> Self {
        let change_type = if new_value.is_none() {
            ChangeType::Delete
        } else {
            ChangeType::Update
        };
        AuditEntry {
            field_name: Some(field.into()),
            old_value,
            new_value,
            ..Self::base(scenario_id, deal_id, user_id, at, change_type)
        }
    }

    /// A recalculation carrying the full quote snapshot.
    pub fn recalculation(
        scenario_id: Uuid,
        deal_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
        quote: &ComputedQuote,
    ) -> DeskResult<Self> {
        Ok(AuditEntry {
            calculation_snapshot: Some(quote.canonical_json()?),
            ..Self::base(scenario_id, deal_id, user_id, at, ChangeType::Recalculation)
        })
    }
}

/// Reconstructed scenario state at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub scenario_id: Uuid,
    /// Upper bound (inclusive) used for the replay.
    pub as_of_micros: i64,
    /// The authoritative quote at that instant, if one existed.
    pub quote: Option<ComputedQuote>,
    /// Field values accumulated from create/update/delete entries.
    pub fields: BTreeMap<String, Value>,
    /// Number of entries replayed.
    pub entries_applied: usize,
}

/// The append-only ledger. Exposes exactly three operations: append,
/// history, playback. There is deliberately no way to mutate or remove
/// an entry once written.
#[derive(Debug, Clone, Default)]
pub struct AuditLedger {
    by_scenario: BTreeMap<Uuid, Vec<AuditEntry>>,
}

impl AuditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Rejects writes whose timestamp does not strictly
    /// advance the scenario's log.
    pub fn append(&mut self, entry: AuditEntry) -> DeskResult<()> {
        let log = self.by_scenario.entry(entry.scenario_id).or_default();
        if let Some(last) = log.last() {
            if entry.timestamp_micros <= last.timestamp_micros {
                return Err(DeskError::AuditOrdering {
                    message: format!(
                        "timestamp {}us does not advance scenario log (last {}us)",
                        entry.timestamp_micros, last.timestamp_micros
                    ),
                });
            }
        }
        log.push(entry);
        Ok(())
    }

    /// Full ordered history for a scenario.
    pub fn history(&self, scenario_id: Uuid) -> DeskResult<&[AuditEntry]> {
        self.by_scenario
            .get(&scenario_id)
            .map(Vec::as_slice)
            .ok_or_else(|| DeskError::not_found("scenario audit log", scenario_id))
    }

    /// Reconstruct scenario state at `as_of` (inclusive, microseconds).
    ///
    /// The last calculation snapshot at or before the bound is the
    /// authoritative quote; field entries after that snapshot (still
    /// within the bound) are merged on top.
    pub fn playback(&self, scenario_id: Uuid, as_of_micros: i64) -> DeskResult<PlaybackSnapshot> {
        let log = self.history(scenario_id)?;

        let mut quote: Option<ComputedQuote> = None;
        let mut fields: BTreeMap<String, Value> = BTreeMap::new();
        let mut entries_applied = 0;

        for entry in log.iter().take_while(|e| e.timestamp_micros <= as_of_micros) {
            entries_applied += 1;
            match entry.change_type {
                ChangeType::Recalculation => {
                    if let Some(snapshot) = &entry.calculation_snapshot {
                        let parsed: ComputedQuote = serde_json::from_str(snapshot)
                            .map_err(|e| DeskError::serialization(e.to_string()))?;
                        quote = Some(parsed);
                    }
                }
                ChangeType::Create => {
                    // Creation marker; carries no field payload
                }
                ChangeType::Update => {
                    if let (Some(field), Some(value)) = (&entry.field_name, &entry.new_value) {
                        fields.insert(field.clone(), value.clone());
                    }
                }
                ChangeType::Delete => {
                    if let Some(field) = &entry.field_name {
                        fields.remove(field);
                    }
                }
            }
        }

        Ok(PlaybackSnapshot {
            scenario_id,
            as_of_micros,
            quote,
            fields,
            entries_applied,
        })
    }

    /// Number of entries across all scenarios.
    pub fn len(&self) -> usize {
        self.by_scenario.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Money;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn at(micros: i64) -> DateTime<Utc> {
        Utc.timestamp_micros(micros).unwrap()
    }

    fn ids() -> (Uuid, Uuid, Uuid) {
        (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn test_append_and_history_order() {
        let (scenario, deal, user) = ids();
        let mut ledger = AuditLedger::new();

        ledger
            .append(AuditEntry::creation(scenario, deal, user, at(1_000)))
            .unwrap();
        ledger
            .append(AuditEntry::field_update(
                scenario,
                deal,
                user,
                at(2_000),
                "vehicle_price",
                None,
                Some(Value::Money(Money::new(dec!(30000)))),
            ))
            .unwrap();

        let history = ledger.history(scenario).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].timestamp_micros < history[1].timestamp_micros);
    }

    #[test]
    fn test_non_monotonic_write_rejected() {
        let (scenario, deal, user) = ids();
        let mut ledger = AuditLedger::new();

        ledger
            .append(AuditEntry::creation(scenario, deal, user, at(5_000)))
            .unwrap();

        let stale = AuditEntry::creation(scenario, deal, user, at(5_000));
        let err = ledger.append(stale).unwrap_err();
        assert_eq!(err.code(), "AUDIT_ORDERING");

        let earlier = AuditEntry::creation(scenario, deal, user, at(4_000));
        assert!(ledger.append(earlier).is_err());
    }

    #[test]
    fn test_independent_scenarios_do_not_interfere() {
        let (scenario_a, deal, user) = ids();
        let scenario_b = Uuid::new_v4();
        let mut ledger = AuditLedger::new();

        ledger
            .append(AuditEntry::creation(scenario_a, deal, user, at(10_000)))
            .unwrap();
        // Earlier timestamp, different scenario: fine
        ledger
            .append(AuditEntry::creation(scenario_b, deal, user, at(1_000)))
            .unwrap();
    }

    #[test]
    fn test_history_missing_scenario() {
        let ledger = AuditLedger::new();
        let err = ledger.history(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_playback_merges_fields_over_snapshot() {
        let (scenario, deal, user) = ids();
        let mut ledger = AuditLedger::new();

        ledger
            .append(AuditEntry::creation(scenario, deal, user, at(1_000)))
            .unwrap();
        ledger
            .append(AuditEntry::field_update(
                scenario,
                deal,
                user,
                at(2_000),
                "vehicle_price",
                None,
                Some(Value::Money(Money::new(dec!(30000)))),
            ))
            .unwrap();
        ledger
            .append(AuditEntry::field_update(
                scenario,
                deal,
                user,
                at(3_000),
                "vehicle_price",
                Some(Value::Money(Money::new(dec!(30000)))),
                Some(Value::Money(Money::new(dec!(28500)))),
            ))
            .unwrap();

        // At t=2500 only the first update applies
        let early = ledger.playback(scenario, 2_500).unwrap();
        assert_eq!(
            early.fields.get("vehicle_price"),
            Some(&Value::Money(Money::new(dec!(30000))))
        );
        assert_eq!(early.entries_applied, 2);

        // At t=3000 the second update wins
        let late = ledger.playback(scenario, 3_000).unwrap();
        assert_eq!(
            late.fields.get("vehicle_price"),
            Some(&Value::Money(Money::new(dec!(28500))))
        );
    }

    #[test]
    fn test_playback_delete_removes_field() {
        let (scenario, deal, user) = ids();
        let mut ledger = AuditLedger::new();

        ledger
            .append(AuditEntry::field_update(
                scenario,
                deal,
                user,
                at(1_000),
                "notes",
                None,
                Some(Value::String("call back".to_string())),
            ))
            .unwrap();
        ledger
            .append(AuditEntry::field_update(
                scenario,
                deal,
                user,
                at(2_000),
                "notes",
                Some(Value::String("call back".to_string())),
                None,
            ))
            .unwrap();

        let snapshot = ledger.playback(scenario, 2_000).unwrap();
        assert!(snapshot.fields.is_empty());
    }
}
