//! # Live Position Store
//!
//! Present-state cache of the latest position per vehicle. Membership in the
//! store is what makes a vehicle "active". Writes are whole-record
//! replacements applied in arrival order, so the last write observed wins
//! regardless of event timestamps.

use std::collections::BTreeMap;

use crate::model::{VehicleId, VehiclePosition};

/// A store mutation, as consumed by the map renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Upserted(VehiclePosition),
    Removed(VehicleId),
}

impl Change {
    #[must_use]
    pub const fn vehicle_id(&self) -> &VehicleId {
        match self {
            Self::Upserted(position) => &position.vehicle_id,
            Self::Removed(id) => id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionStore {
    positions: BTreeMap<VehicleId, VehiclePosition>,
}

impl PositionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyed upsert. Returns `None` when the record is identical to the one
    /// already held.
    pub fn set(&mut self, position: VehiclePosition) -> Option<Change> {
        if self.positions.get(&position.vehicle_id) == Some(&position) {
            return None;
        }
        self.positions.insert(position.vehicle_id.clone(), position.clone());
        Some(Change::Upserted(position))
    }

    /// Keyed delete. Returns `None` when the vehicle was not present.
    pub fn remove(&mut self, vehicle_id: &VehicleId) -> Option<Change> {
        self.positions.remove(vehicle_id).map(|_| Change::Removed(vehicle_id.clone()))
    }

    /// Drop every record, returning the removals in id order.
    pub fn clear(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.positions).into_keys().map(Change::Removed).collect()
    }

    #[must_use]
    pub fn get(&self, vehicle_id: &VehicleId) -> Option<&VehiclePosition> {
        self.positions.get(vehicle_id)
    }

    #[must_use]
    pub fn contains(&self, vehicle_id: &VehicleId) -> bool {
        self.positions.contains_key(vehicle_id)
    }

    /// Every record, ordered by vehicle id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<VehiclePosition> {
        self.positions.values().cloned().collect()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<VehicleId> {
        self.positions.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
