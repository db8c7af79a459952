//! Atomic deal lifecycle manager.
//!
//! Every state-changing operation on a deal runs here, inside one
//! serializable transaction: the whole mutation commits or none of it
//! does, audit writes included. Optimistic versioning resolves
//! concurrent edits (one writer wins, the loser gets `VersionConflict`
//! and retries with fresh state), and every touched entity is checked
//! against the caller's tenant before anything else happens.
//!
//! Transient serialization failures retry up to three times with
//! backoff; validation, tenant, and version errors never retry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregator::compute_quote;
use crate::audit::{AuditEntry, PlaybackSnapshot};
use crate::jurisdiction::JurisdictionStore;
use crate::rule_store::StateRuleStore;
use crate::storage::{Clock, CurrentUser, IdentityProvider, MemoryStore, StoreState};
use crate::types::{
    Customer, Deal, DealInput, DealStatus, DeskError, DeskResult, Money, Scenario, Value, Vehicle,
    VehicleStatus,
};
use crate::validate::{normalize_phone, validate_email};

/// How long a vehicle stays soft-reserved by a draft deal.
const RESERVATION_HOURS: i64 = 48;

/// Retry and deadline policy for lifecycle transactions.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Retries for transient serialization failures only.
    pub max_retries: u32,
    /// Backoff before retry attempt N (1-indexed).
    pub backoff: Vec<std::time::Duration>,
    /// Soft deadline per operation; exceeding it aborts.
    pub deadline: std::time::Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            max_retries: 3,
            backoff: vec![
                std::time::Duration::from_millis(100),
                std::time::Duration::from_millis(200),
                std::time::Duration::from_millis(400),
            ],
            deadline: std::time::Duration::from_secs(10),
        }
    }
}

/// Customer reference on deal creation: either an existing tenant
/// customer or inline data to insert one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CustomerRef {
    Existing { customer_id: Uuid },
    New {
        name: String,
        email: Option<String>,
        phone: Option<String>,
    },
}

/// Input for `create_deal`. A vehicle is optional: blank-desk deals
/// are allowed and attach inventory later.
#[derive(Debug, Clone)]
pub struct CreateDealInput {
    pub salesperson_id: Uuid,
    pub customer: CustomerRef,
    pub vehicle_id: Option<Uuid>,
    pub scenario_name: String,
    pub scenario_input: DealInput,
}

/// Everything created by a successful `create_deal`.
#[derive(Debug, Clone)]
pub struct CreatedDeal {
    pub deal: Deal,
    pub scenario: Scenario,
    pub customer: Customer,
    pub vehicle: Option<Vehicle>,
}

/// Patch for `update_deal`. Empty patches are an explicit no-op.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DealPatch {
    pub customer_id: Option<Uuid>,
    pub salesperson_id: Option<Uuid>,
    pub current_scenario_id: Option<Uuid>,
}

impl DealPatch {
    pub fn is_empty(&self) -> bool {
        self.customer_id.is_none()
            && self.salesperson_id.is_none()
            && self.current_scenario_id.is_none()
    }
}

/// One scenario field change for `update_scenario`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub value: Value,
}

/// The lifecycle manager. Holds the storage and the read-only stores
/// the aggregator needs; all calculation stays pure underneath.
pub struct LifecycleManager {
    store: Arc<MemoryStore>,
    jurisdictions: Arc<JurisdictionStore>,
    rules: Arc<StateRuleStore>,
    clock: Arc<dyn Clock>,
    identity: Arc<dyn IdentityProvider>,
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<MemoryStore>,
        jurisdictions: Arc<JurisdictionStore>,
        rules: Arc<StateRuleStore>,
        clock: Arc<dyn Clock>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        LifecycleManager {
            store,
            jurisdictions,
            rules,
            clock,
            identity,
            config: LifecycleConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LifecycleConfig) -> Self {
        self.config = config;
        self
    }

    /// Create a deal: verify actors, reserve the vehicle, issue the
    /// deal number, insert deal + initial scenario, write the audit
    /// trail. All inside one transaction.
    pub fn create_deal(&self, input: CreateDealInput) -> DeskResult<CreatedDeal> {
        let user = self.identity.current_user();
        let now = self.clock.now();

        // Quote computation is pure; do it before touching storage so a
        // bad input never opens a transaction.
        let quote = compute_quote(&input.scenario_input, &self.jurisdictions, &self.rules)?;

        log::info!(
            "create_deal: tenant={} salesperson={} vehicle={:?}",
            user.tenant_id,
            input.salesperson_id,
            input.vehicle_id
        );

        self.run_with_retries(|| {
            let input = input.clone();
            let quote = quote.clone();
            let user = user.clone();
            self.store.with_transaction(move |state| {
                create_deal_txn(state, &user, input, quote, now)
            })
        })
    }

    /// Apply a patch under optimistic locking. An empty patch with a
    /// matching version is a no-op: no version bump, no audit entry.
    pub fn update_deal(
        &self,
        deal_id: Uuid,
        patch: DealPatch,
        expected_version: u64,
    ) -> DeskResult<Deal> {
        let user = self.identity.current_user();
        let now = self.clock.now();

        self.run_with_retries(|| {
            let patch = patch.clone();
            let user = user.clone();
            self.store.with_transaction(move |state| {
                update_deal_txn(state, &user, deal_id, patch, expected_version, now)
            })
        })
    }

    /// Move a deal along its lifecycle. Reverse edges fail.
    pub fn transition_status(&self, deal_id: Uuid, target: DealStatus) -> DeskResult<Deal> {
        let user = self.identity.current_user();
        let now = self.clock.now();

        self.run_with_retries(|| {
            let user = user.clone();
            self.store.with_transaction(move |state| {
                transition_status_txn(state, &user, deal_id, target, now)
            })
        })
    }

    /// Apply field changes to a scenario, recompute its quote, and log
    /// one entry per field plus a recalculation snapshot. Atomic.
    pub fn update_scenario(
        &self,
        scenario_id: Uuid,
        changes: Vec<FieldChange>,
    ) -> DeskResult<Scenario> {
        let user = self.identity.current_user();
        let now = self.clock.now();

        if changes.is_empty() {
            return self.store.read(|state| {
                state
                    .scenario_for_tenant(scenario_id, user.tenant_id)
                    .cloned()
            });
        }

        // Recompute on a copy of the input outside the transaction to
        // keep the pure/persistent split; the transaction re-checks the
        // scenario and applies everything or nothing.
        let (deal_id, mut updated_input) = self.store.read(|state| {
            state
                .scenario_for_tenant(scenario_id, user.tenant_id)
                .map(|s| (s.deal_id, s.input.clone()))
        })?;

        let mut audit_fields: Vec<(String, Option<Value>, Value)> = Vec::new();
        for change in &changes {
            let old = apply_field_change(&mut updated_input, &change.field, &change.value)?;
            audit_fields.push((change.field.clone(), old, change.value.clone()));
        }

        let quote = compute_quote(&updated_input, &self.jurisdictions, &self.rules)?;

        self.run_with_retries(|| {
            let updated_input = updated_input.clone();
            let quote = quote.clone();
            let audit_fields = audit_fields.clone();
            let user = user.clone();
            self.store.with_transaction(move |state| {
                update_scenario_txn(
                    state,
                    &user,
                    scenario_id,
                    deal_id,
                    updated_input,
                    quote,
                    audit_fields,
                    now,
                )
            })
        })
    }

    /// Ordered audit history for a scenario.
    pub fn scenario_history(&self, scenario_id: Uuid) -> DeskResult<Vec<AuditEntry>> {
        let user = self.identity.current_user();
        self.store.read(|state| {
            state.scenario_for_tenant(scenario_id, user.tenant_id)?;
            state.audit.history(scenario_id).map(<[AuditEntry]>::to_vec)
        })
    }

    /// Reconstruct a scenario's state as of a point in time.
    pub fn scenario_playback(
        &self,
        scenario_id: Uuid,
        at: DateTime<Utc>,
    ) -> DeskResult<PlaybackSnapshot> {
        let user = self.identity.current_user();
        self.store.read(|state| {
            state.scenario_for_tenant(scenario_id, user.tenant_id)?;
            state.audit.playback(scenario_id, at.timestamp_micros())
        })
    }

    /// Fetch a deal under the caller's tenant.
    pub fn get_deal(&self, deal_id: Uuid) -> DeskResult<Deal> {
        let user = self.identity.current_user();
        self.store
            .read(|state| state.deal_for_tenant(deal_id, user.tenant_id).cloned())
    }

    /// Retry loop: transient serialization failures back off and retry
    /// up to the configured limit; everything else propagates at once.
    fn run_with_retries<T>(&self, mut op: impl FnMut() -> DeskResult<T>) -> DeskResult<T> {
        let started = std::time::Instant::now();
        let mut attempt = 0u32;

        loop {
            if started.elapsed() > self.config.deadline {
                return Err(DeskError::TransactionTimeout {
                    deadline_ms: self.config.deadline.as_millis() as u64,
                });
            }

            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    let backoff = self
                        .config
                        .backoff
                        .get(attempt as usize)
                        .copied()
                        .unwrap_or_default();
                    log::warn!(
                        "transient failure (attempt {}): {}; retrying in {:?}",
                        attempt + 1,
                        err,
                        backoff
                    );
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn create_deal_txn(
    state: &mut StoreState,
    user: &CurrentUser,
    input: CreateDealInput,
    quote: crate::types::ComputedQuote,
    now: DateTime<Utc>,
) -> DeskResult<CreatedDeal> {
    let tenant_id = user.tenant_id;

    // Salesperson must belong to the tenant
    match state.salespeople.get(&input.salesperson_id) {
        None => return Err(DeskError::not_found("salesperson", input.salesperson_id)),
        Some(owner) if *owner != tenant_id => {
            return Err(DeskError::MultiTenantViolation {
                entity: "salesperson".to_string(),
            })
        }
        Some(_) => {}
    }

    // Verify or insert the customer
    let customer = match input.customer {
        CustomerRef::Existing { customer_id } => {
            let existing = state
                .customers
                .get(&customer_id)
                .ok_or_else(|| DeskError::not_found("customer", customer_id))?;
            if existing.tenant_id != tenant_id {
                return Err(DeskError::MultiTenantViolation {
                    entity: "customer".to_string(),
                });
            }
            existing.clone()
        }
        CustomerRef::New { name, email, phone } => {
            if name.trim().is_empty() {
                return Err(DeskError::validation_field("customer.name", "must not be empty"));
            }
            if let Some(email) = &email {
                validate_email(email)?;
            }
            let phone = phone.map(|p| normalize_phone(&p)).transpose()?;
            let customer = Customer {
                id: Uuid::new_v4(),
                tenant_id,
                name,
                email,
                phone,
            };
            state.customers.insert(customer.id, customer.clone());
            customer
        }
    };

    let deal_id = Uuid::new_v4();

    // Lock and reserve the vehicle, when the deal has one
    let vehicle = match input.vehicle_id {
        Some(vehicle_id) => {
            let vehicle = state.vehicle_for_update(vehicle_id, tenant_id)?;
            if !vehicle.is_deskable() {
                return Err(DeskError::VehicleNotAvailable {
                    vehicle_id: vehicle_id.to_string(),
                    status: vehicle.status.to_string(),
                });
            }
            vehicle.status = VehicleStatus::Pending;
            vehicle.reserved_for_deal_id = Some(deal_id);
            vehicle.reserved_until = Some(now + Duration::hours(RESERVATION_HOURS));
            Some(vehicle.clone())
        }
        None => None,
    };

    let deal_number = state.next_deal_number(tenant_id, now);
    if state.deals.values().any(|d| d.deal_number == deal_number && d.tenant_id == tenant_id) {
        return Err(DeskError::DuplicateDealNumber { deal_number });
    }

    let scenario_id = Uuid::new_v4();
    let scenario = Scenario {
        id: scenario_id,
        deal_id,
        name: input.scenario_name,
        revision: 1,
        input: input.scenario_input,
        quote: Some(quote.clone()),
        derived_metrics: Default::default(),
        created_at: now,
        updated_at: now,
    };

    let deal = Deal {
        id: deal_id,
        tenant_id,
        deal_number,
        customer_id: customer.id,
        vehicle_id: input.vehicle_id,
        salesperson_id: input.salesperson_id,
        status: DealStatus::Draft,
        version: 1,
        current_scenario_id: Some(scenario_id),
        scenario_ids: vec![scenario_id],
        created_at: now,
        updated_at: now,
    };

    state.deals.insert(deal_id, deal.clone());
    state.scenarios.insert(scenario_id, scenario.clone());

    state
        .audit
        .append(AuditEntry::creation(scenario_id, deal_id, user.user_id, now))?;
    let mut snapshot_time = now;
    snapshot_time += Duration::microseconds(1);
    state.audit.append(AuditEntry::recalculation(
        scenario_id,
        deal_id,
        user.user_id,
        snapshot_time,
        &quote,
    )?)?;

    Ok(CreatedDeal {
        deal,
        scenario,
        customer,
        vehicle,
    })
}

fn update_deal_txn(
    state: &mut StoreState,
    user: &CurrentUser,
    deal_id: Uuid,
    patch: DealPatch,
    expected_version: u64,
    now: DateTime<Utc>,
) -> DeskResult<Deal> {
    let current = state.deal_for_tenant(deal_id, user.tenant_id)?.clone();

    if current.version != expected_version {
        return Err(DeskError::VersionConflict {
            expected: expected_version,
            actual: current.version,
        });
    }

    // No-op: version untouched, nothing logged
    if patch.is_empty() {
        return Ok(current);
    }

    let mut deal = current;
    let mut changed: Vec<(&str, String, String)> = Vec::new();

    if let Some(customer_id) = patch.customer_id {
        let customer = state
            .customers
            .get(&customer_id)
            .ok_or_else(|| DeskError::not_found("customer", customer_id))?;
        if customer.tenant_id != user.tenant_id {
            return Err(DeskError::MultiTenantViolation {
                entity: "customer".to_string(),
            });
        }
        changed.push(("customer_id", deal.customer_id.to_string(), customer_id.to_string()));
        deal.customer_id = customer_id;
    }

    if let Some(salesperson_id) = patch.salesperson_id {
        match state.salespeople.get(&salesperson_id) {
            None => return Err(DeskError::not_found("salesperson", salesperson_id)),
            Some(owner) if *owner != user.tenant_id => {
                return Err(DeskError::MultiTenantViolation {
                    entity: "salesperson".to_string(),
                })
            }
            Some(_) => {}
        }
        changed.push((
            "salesperson_id",
            deal.salesperson_id.to_string(),
            salesperson_id.to_string(),
        ));
        deal.salesperson_id = salesperson_id;
    }

    if let Some(scenario_id) = patch.current_scenario_id {
        let scenario = state
            .scenarios
            .get(&scenario_id)
            .ok_or_else(|| DeskError::not_found("scenario", scenario_id))?;
        if scenario.deal_id != deal_id {
            return Err(DeskError::validation_field(
                "current_scenario_id",
                "scenario belongs to a different deal",
            ));
        }
        changed.push((
            "current_scenario_id",
            deal.current_scenario_id.map(|id| id.to_string()).unwrap_or_default(),
            scenario_id.to_string(),
        ));
        deal.current_scenario_id = Some(scenario_id);
    }

    deal.version += 1;
    deal.updated_at = now;
    state.deals.insert(deal_id, deal.clone());

    // Deal-level changes log against the active scenario
    if let Some(scenario_id) = deal.current_scenario_id {
        let mut at = now;
        for (field, old, new) in changed {
            let mut entry = AuditEntry::field_update(
                scenario_id,
                deal_id,
                user.user_id,
                at,
                field,
                Some(Value::String(old)),
                Some(Value::String(new)),
            );
            entry.metadata.insert("entity".to_string(), "deal".to_string());
            state.audit.append(entry)?;
            at += Duration::microseconds(1);
        }
    }

    Ok(deal)
}

fn transition_status_txn(
    state: &mut StoreState,
    user: &CurrentUser,
    deal_id: Uuid,
    target: DealStatus,
    now: DateTime<Utc>,
) -> DeskResult<Deal> {
    let mut deal = state.deal_for_tenant(deal_id, user.tenant_id)?.clone();
    let from = deal.status;

    deal.status = from.transition_to(target)?;
    deal.version += 1;
    deal.updated_at = now;

    // Inventory follows the deal
    if let Some(vehicle_id) = deal.vehicle_id {
        let vehicle = state.vehicle_for_update(vehicle_id, user.tenant_id)?;
        match target {
            DealStatus::Cancelled => {
                if vehicle.reserved_for_deal_id == Some(deal_id) {
                    vehicle.status = VehicleStatus::Available;
                    vehicle.reserved_for_deal_id = None;
                    vehicle.reserved_until = None;
                }
            }
            DealStatus::Funded => {
                vehicle.status = VehicleStatus::InDeal;
            }
            DealStatus::Delivered => {
                vehicle.status = VehicleStatus::Sold;
                vehicle.reserved_for_deal_id = None;
                vehicle.reserved_until = None;
            }
            _ => {}
        }
    }

    state.deals.insert(deal_id, deal.clone());

    if let Some(scenario_id) = deal.current_scenario_id {
        let mut entry = AuditEntry::field_update(
            scenario_id,
            deal_id,
            user.user_id,
            now,
            "status",
            Some(Value::String(from.to_string())),
            Some(Value::String(target.to_string())),
        );
        entry.metadata.insert("entity".to_string(), "deal".to_string());
        state.audit.append(entry)?;
    }

    log::info!("deal {} status {} -> {}", deal_id, from, target);
    Ok(deal)
}

#[allow(clippy::too_many_arguments)]
fn update_scenario_txn(
    state: &mut StoreState,
    user: &CurrentUser,
    scenario_id: Uuid,
    deal_id: Uuid,
    updated_input: DealInput,
    quote: crate::types::ComputedQuote,
    audit_fields: Vec<(String, Option<Value>, Value)>,
    now: DateTime<Utc>,
) -> DeskResult<Scenario> {
    // Re-check under the transaction
    state.scenario_for_tenant(scenario_id, user.tenant_id)?;

    let scenario = state
        .scenarios
        .get_mut(&scenario_id)
        .ok_or_else(|| DeskError::not_found("scenario", scenario_id))?;

    scenario.input = updated_input;
    scenario.quote = Some(quote.clone());
    scenario.revision += 1;
    scenario.updated_at = now;
    let result = scenario.clone();

    let mut at = now;
    for (field, old, new) in audit_fields {
        state.audit.append(AuditEntry::field_update(
            scenario_id,
            deal_id,
            user.user_id,
            at,
            field,
            old,
            Some(new),
        ))?;
        at += Duration::microseconds(1);
    }
    state.audit.append(AuditEntry::recalculation(
        scenario_id,
        deal_id,
        user.user_id,
        at,
        &quote,
    )?)?;

    Ok(result)
}

/// Apply one named field change to a deal input, returning the prior
/// value. Unknown fields are a validation failure, not a silent skip.
fn apply_field_change(
    input: &mut DealInput,
    field: &str,
    value: &Value,
) -> DeskResult<Option<Value>> {
    fn money_of(field: &str, value: &Value) -> DeskResult<Money> {
        match value {
            Value::Money(m) if !m.is_negative() => Ok(*m),
            Value::Money(m) => Err(DeskError::NegativeAmount {
                field: field.to_string(),
                value: m.as_decimal().to_string(),
            }),
            other => Err(DeskError::validation_field(
                field,
                format!("expected money value, got {}", other.type_name()),
            )),
        }
    }

    let old = match field {
        "vehicle_price" => {
            let old = Value::Money(input.vehicle_price);
            input.vehicle_price = money_of(field, value)?;
            old
        }
        "vehicle_cost" => {
            let old = Value::Money(input.vehicle_cost);
            input.vehicle_cost = money_of(field, value)?;
            old
        }
        "dealer_discount" => {
            let old = Value::Money(input.dealer_discount);
            input.dealer_discount = money_of(field, value)?;
            old
        }
        "manufacturer_rebate" => {
            let old = Value::Money(input.manufacturer_rebate);
            input.manufacturer_rebate = money_of(field, value)?;
            old
        }
        "dealer_rebate" => {
            let old = Value::Money(input.dealer_rebate);
            input.dealer_rebate = money_of(field, value)?;
            old
        }
        "trade_allowance" => {
            let old = Value::Money(input.trade_allowance);
            input.trade_allowance = money_of(field, value)?;
            old
        }
        "trade_payoff" => {
            let old = Value::Money(input.trade_payoff);
            input.trade_payoff = money_of(field, value)?;
            old
        }
        "accessories_total" => {
            let old = Value::Money(input.accessories_total);
            input.accessories_total = money_of(field, value)?;
            old
        }
        "zip_code" => match value {
            Value::String(zip) => {
                let old = Value::String(input.zip_code.clone());
                input.zip_code = zip.clone();
                old
            }
            other => {
                return Err(DeskError::validation_field(
                    field,
                    format!("expected string value, got {}", other.type_name()),
                ))
            }
        },
        unknown => {
            return Err(DeskError::validation_field(
                unknown,
                "not an updatable scenario field",
            ))
        }
    };

    Ok(Some(old))
}
