//! Storage and collaborator interfaces for the lifecycle manager.
//!
//! The core consumes three narrow interfaces: a clock, an identity
//! source, and transactional storage. The in-memory store here gives
//! the strongest isolation the spec asks for (serializable,
//! all-or-nothing) by the simplest possible means: a transaction works
//! on a copy of the whole state and commits by swapping it in. A
//! failed transaction leaves nothing behind.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::audit::AuditLedger;
use crate::types::{Customer, Deal, DeskError, DeskResult, Scenario, Vehicle};

/// Monotonic time source. Within one request, consecutive calls never
/// go backwards and never repeat a microsecond.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time with a monotonic guard: if the OS clock stalls or
/// steps back, we advance one microsecond past the last reading.
#[derive(Debug, Default)]
pub struct SystemClock {
    last_micros: Mutex<i64>,
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let mut last = lock_recover(&self.last_micros);
        let now = Utc::now().timestamp_micros().max(*last + 1);
        *last = now;
        micros_to_datetime(now)
    }
}

/// Test clock: starts at a fixed instant and ticks one millisecond per
/// reading, so audit ordering is deterministic and leaves room for the
/// sub-millisecond offsets lifecycle transactions add to entries.
#[derive(Debug)]
pub struct ManualClock {
    micros: Mutex<i64>,
}

impl ManualClock {
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        ManualClock {
            micros: Mutex::new(start.timestamp_micros()),
        }
    }

    /// Jump the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut micros = lock_recover(&self.micros);
        *micros += by.num_microseconds().unwrap_or(0);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let mut micros = lock_recover(&self.micros);
        *micros += 1_000;
        micros_to_datetime(*micros)
    }
}

fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros)
        .single()
        .unwrap_or_else(Utc::now)
}

/// The authenticated caller, as handed to us by the identity
/// collaborator. The core trusts this and enforces tenant isolation
/// against it on every operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub roles: Vec<String>,
}

impl CurrentUser {
    pub fn new(user_id: Uuid, tenant_id: Uuid) -> Self {
        CurrentUser {
            user_id,
            tenant_id,
            roles: vec![],
        }
    }
}

/// Identity collaborator interface.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> CurrentUser;
}

/// Fixed identity, for tests and single-principal embedding.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub CurrentUser);

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> CurrentUser {
        self.0.clone()
    }
}

/// The complete persisted state: every table the lifecycle manager
/// touches, including the audit ledger so that an un-logged mutation
/// cannot commit.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    pub deals: BTreeMap<Uuid, Deal>,
    pub scenarios: BTreeMap<Uuid, Scenario>,
    pub vehicles: BTreeMap<Uuid, Vehicle>,
    pub customers: BTreeMap<Uuid, Customer>,
    /// salesperson -> owning tenant.
    pub salespeople: BTreeMap<Uuid, Uuid>,
    /// (tenant, year) -> last issued sequence number.
    pub stock_sequences: BTreeMap<(Uuid, i32), u64>,
    pub audit: AuditLedger,
}

impl StoreState {
    /// Atomically issue the next deal number for a tenant:
    /// `YYYY-MMDD-NNNN`, monotonic per tenant per year.
    pub fn next_deal_number(&mut self, tenant_id: Uuid, on: DateTime<Utc>) -> String {
        use chrono::Datelike;
        let year = on.year();
        let counter = self.stock_sequences.entry((tenant_id, year)).or_insert(0);
        *counter += 1;
        format!("{}-{:02}{:02}-{:04}", year, on.month(), on.day(), counter)
    }

    /// Fetch a deal, enforcing tenant ownership.
    pub fn deal_for_tenant(&self, id: Uuid, tenant_id: Uuid) -> DeskResult<&Deal> {
        let deal = self
            .deals
            .get(&id)
            .ok_or_else(|| DeskError::not_found("deal", id))?;
        if deal.tenant_id != tenant_id {
            return Err(DeskError::MultiTenantViolation {
                entity: "deal".to_string(),
            });
        }
        Ok(deal)
    }

    /// Fetch a scenario, enforcing tenant ownership via its deal.
    pub fn scenario_for_tenant(&self, id: Uuid, tenant_id: Uuid) -> DeskResult<&Scenario> {
        let scenario = self
            .scenarios
            .get(&id)
            .ok_or_else(|| DeskError::not_found("scenario", id))?;
        self.deal_for_tenant(scenario.deal_id, tenant_id)?;
        Ok(scenario)
    }

    /// Inventory intake: validates the VIN check digit and enforces the
    /// per-tenant uniqueness of VIN and stock number before inserting.
    pub fn add_vehicle(&mut self, vehicle: Vehicle) -> DeskResult<()> {
        crate::validate::validate_vin(&vehicle.vin)?;
        for existing in self.vehicles.values() {
            if existing.tenant_id != vehicle.tenant_id {
                continue;
            }
            if existing.vin.eq_ignore_ascii_case(&vehicle.vin) {
                return Err(DeskError::validation_field("vin", "already in inventory"));
            }
            if existing.stock_number == vehicle.stock_number {
                return Err(DeskError::validation_field(
                    "stock_number",
                    "already in inventory",
                ));
            }
        }
        self.vehicles.insert(vehicle.id, vehicle);
        Ok(())
    }

    /// Row-lock equivalent of `SELECT ... FOR UPDATE`: exclusive access
    /// to the vehicle row for the rest of the transaction, with the
    /// tenant check applied before anything else.
    pub fn vehicle_for_update(&mut self, id: Uuid, tenant_id: Uuid) -> DeskResult<&mut Vehicle> {
        let vehicle = self
            .vehicles
            .get_mut(&id)
            .ok_or_else(|| DeskError::not_found("vehicle", id))?;
        if vehicle.tenant_id != tenant_id {
            return Err(DeskError::MultiTenantViolation {
                entity: "vehicle".to_string(),
            });
        }
        Ok(vehicle)
    }
}

/// Serializable, all-or-nothing storage.
///
/// `with_transaction` clones the state, runs the closure against the
/// copy, and swaps the copy in only on success. The coarse mutex makes
/// every transaction trivially serializable; contention shows up as
/// wait time, not anomalies.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a transaction. On `Err` the working copy is dropped and the
    /// committed state is untouched.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> DeskResult<T>,
    ) -> DeskResult<T> {
        let mut committed = lock_recover(&self.state);
        let mut working = committed.clone();
        let result = f(&mut working)?;
        *committed = working;
        Ok(result)
    }

    /// Read-only access to committed state.
    pub fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> T {
        let committed = lock_recover(&self.state);
        f(&committed)
    }
}

/// A poisoned lock means a panic mid-transaction; the committed state
/// is still the last consistent snapshot, so recover rather than
/// propagate the poison.
fn lock_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VehicleStatus;
    use pretty_assertions::assert_eq;

    fn clock() -> ManualClock {
        ManualClock::starting_at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_manual_clock_is_strictly_monotonic() {
        let clock = clock();
        let a = clock.now();
        let b = clock.now();
        let c = clock.now();
        assert!(a < b && b < c);
        assert_eq!(b.timestamp_micros() - a.timestamp_micros(), 1_000);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = clock();
        let before = clock.now();
        clock.advance(Duration::days(45));
        let after = clock.now();
        assert_eq!((after - before).num_days(), 45);
    }

    #[test]
    fn test_system_clock_never_repeats() {
        let clock = SystemClock::default();
        let mut previous = clock.now();
        for _ in 0..100 {
            let next = clock.now();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_deal_number_sequence() {
        let mut state = StoreState::default();
        let tenant = Uuid::new_v4();
        let on = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        assert_eq!(state.next_deal_number(tenant, on), "2025-0601-0001");
        assert_eq!(state.next_deal_number(tenant, on), "2025-0601-0002");

        // Independent per tenant
        let other = Uuid::new_v4();
        assert_eq!(state.next_deal_number(other, on), "2025-0601-0001");

        // Resets with the year
        let next_year = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(state.next_deal_number(tenant, next_year), "2026-0115-0001");
    }

    #[test]
    fn test_transaction_commits_on_success() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let id = Uuid::new_v4();

        store
            .with_transaction(|state| {
                state.vehicles.insert(
                    id,
                    Vehicle {
                        id,
                        tenant_id: tenant,
                        vin: "1HGCM82633A004352".to_string(),
                        stock_number: "S1".to_string(),
                        status: VehicleStatus::Available,
                        reserved_for_deal_id: None,
                        reserved_until: None,
                    },
                );
                Ok(())
            })
            .unwrap();

        assert_eq!(store.read(|s| s.vehicles.len()), 1);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let id = Uuid::new_v4();

        let result: DeskResult<()> = store.with_transaction(|state| {
            state.vehicles.insert(
                id,
                Vehicle {
                    id,
                    tenant_id: tenant,
                    vin: "1HGCM82633A004352".to_string(),
                    stock_number: "S1".to_string(),
                    status: VehicleStatus::Available,
                    reserved_for_deal_id: None,
                    reserved_until: None,
                },
            );
            Err(DeskError::internal("injected failure"))
        });

        assert!(result.is_err());
        assert_eq!(store.read(|s| s.vehicles.len()), 0);
    }

    #[test]
    fn test_add_vehicle_enforces_vin_and_uniqueness() {
        let mut state = StoreState::default();
        let tenant = Uuid::new_v4();
        let vehicle = Vehicle {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            vin: "1HGCM82633A004352".to_string(),
            stock_number: "S1".to_string(),
            status: VehicleStatus::Available,
            reserved_for_deal_id: None,
            reserved_until: None,
        };
        state.add_vehicle(vehicle.clone()).unwrap();

        // Duplicate VIN for the same tenant
        let mut dup = vehicle.clone();
        dup.id = Uuid::new_v4();
        dup.stock_number = "S2".to_string();
        assert!(state.add_vehicle(dup).is_err());

        // Bad check digit
        let mut bad = vehicle.clone();
        bad.id = Uuid::new_v4();
        bad.vin = "1HGCM82634A004352".to_string();
        bad.stock_number = "S3".to_string();
        assert!(state.add_vehicle(bad).is_err());

        // Same VIN under a different tenant is fine
        let mut other = vehicle;
        other.id = Uuid::new_v4();
        other.tenant_id = Uuid::new_v4();
        state.add_vehicle(other).unwrap();
    }

    #[test]
    fn test_tenant_checks() {
        let mut state = StoreState::default();
        let tenant = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let id = Uuid::new_v4();
        state.vehicles.insert(
            id,
            Vehicle {
                id,
                tenant_id: tenant,
                vin: "1HGCM82633A004352".to_string(),
                stock_number: "S1".to_string(),
                status: VehicleStatus::Available,
                reserved_for_deal_id: None,
                reserved_until: None,
            },
        );

        assert!(state.vehicle_for_update(id, tenant).is_ok());
        let err = state.vehicle_for_update(id, intruder).unwrap_err();
        assert_eq!(err.code(), "TENANT_VIOLATION");
        assert_eq!(err.http_status(), 403);
    }
}
