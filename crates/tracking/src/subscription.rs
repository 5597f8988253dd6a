//! # Subscription Tracker
//!
//! Reference-counted record of the vehicle rooms joined on the push channel.
//! Several views may hold the same vehicle; the room is joined when the first
//! holder arrives and left when the last one goes. The tracker is the source
//! of the replay list sent after every (re)connect.

use std::collections::BTreeMap;

use crate::model::VehicleId;

#[derive(Debug, Clone, Default)]
pub struct SubscriptionTracker {
    holders: BTreeMap<VehicleId, usize>,
}

impl SubscriptionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one holder for each id. Returns the ids that were not joined
    /// before and therefore need a `join:vehicle`.
    pub fn acquire<'a>(&mut self, ids: impl IntoIterator<Item = &'a VehicleId>) -> Vec<VehicleId> {
        let mut joined = vec![];
        for id in ids {
            let count = self.holders.entry(id.clone()).or_default();
            *count += 1;
            if *count == 1 {
                joined.push(id.clone());
            }
        }
        joined
    }

    /// Drop one holder for each id. Returns the ids nobody holds anymore and
    /// which therefore need a `leave:vehicle`. Unknown ids are ignored.
    pub fn release<'a>(&mut self, ids: impl IntoIterator<Item = &'a VehicleId>) -> Vec<VehicleId> {
        let mut left = vec![];
        for id in ids {
            let Some(count) = self.holders.get_mut(id) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                self.holders.remove(id);
                left.push(id.clone());
            }
        }
        left
    }

    /// Every joined id, once each.
    #[must_use]
    pub fn replay(&self) -> Vec<VehicleId> {
        self.holders.keys().cloned().collect()
    }

    #[must_use]
    pub fn holders(&self, id: &VehicleId) -> usize {
        self.holders.get(id).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.holders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }
}
