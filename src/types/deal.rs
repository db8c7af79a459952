//! Deal aggregate, scenarios, and the entities the lifecycle manager
//! persists.
//!
//! Entities own each other by id only (arena style): a `Deal` knows its
//! scenario ids, a `Scenario` carries its `deal_id`, and the change log
//! references scenarios by id. No back-pointers, no cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::Display;
use uuid::Uuid;

use super::deal_input::DealInput;
use super::quote::ComputedQuote;
use super::{DeskError, DeskResult, Value};

/// Deal lifecycle status. Transitions are forward-only along the funnel
/// plus cancellation from any live status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DealStatus {
    Draft,
    Pending,
    Approved,
    Funded,
    Delivered,
    Cancelled,
}

impl DealStatus {
    /// Whether moving to `target` is a legal lifecycle edge.
    pub fn can_transition_to(&self, target: DealStatus) -> bool {
        use DealStatus::*;
        match (self, target) {
            (Draft, Pending)
            | (Pending, Approved)
            | (Approved, Funded)
            | (Funded, Delivered) => true,
            (Cancelled, Cancelled) => false,
            (_, Cancelled) => true,
            _ => false,
        }
    }

    /// Validate a transition, producing the lifecycle error on refusal.
    pub fn transition_to(&self, target: DealStatus) -> DeskResult<DealStatus> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(DeskError::InvalidDealState {
                from: self.to_string(),
                to: target.to_string(),
            })
        }
    }
}

/// The deal aggregate root. Mutated only through the lifecycle manager,
/// which bumps `version` on every committed change. Never hard-deleted;
/// a dead deal is `Cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// `YYYY-MMDD-NNNN`, monotonic per tenant per year.
    pub deal_number: String,
    pub customer_id: Uuid,
    pub vehicle_id: Option<Uuid>,
    pub salesperson_id: Uuid,
    pub status: DealStatus,
    /// Optimistic-lock counter; starts at 1.
    pub version: u64,
    pub current_scenario_id: Option<Uuid>,
    pub scenario_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One what-if variant of a deal: an input, its computed quote, and any
/// derived desk metrics. Revision counts committed field changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub name: String,
    pub revision: u64,
    pub input: DealInput,
    pub quote: Option<ComputedQuote>,
    #[serde(default)]
    pub derived_metrics: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inventory status for a vehicle row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VehicleStatus {
    Available,
    Pending,
    InDeal,
    Sold,
}

/// A unit in inventory. Softly reservable by at most one deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub vin: String,
    pub stock_number: String,
    pub status: VehicleStatus,
    pub reserved_for_deal_id: Option<Uuid>,
    pub reserved_until: Option<DateTime<Utc>>,
}

impl Vehicle {
    /// A vehicle can join a deal while available or merely pending.
    pub fn is_deskable(&self) -> bool {
        matches!(self.status, VehicleStatus::Available | VehicleStatus::Pending)
    }
}

/// Customer record, tenant-scoped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}
