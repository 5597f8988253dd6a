//! # Selection/Focus Controller
//!
//! Tracks the vehicle the user picked and produces camera commands to center
//! on it. Selection only takes effect for vehicles currently in the store.

use crate::model::{VehicleId, VehiclePosition};
use crate::renderer::CameraCommand;
use crate::store::PositionStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Focus {
    #[default]
    None,
    Selected(VehicleId),
}

#[derive(Debug, Clone)]
pub struct FocusController {
    focus: Focus,
    zoom: u8,
    follow: bool,
}

impl FocusController {
    #[must_use]
    pub fn new(zoom: u8, follow: bool) -> Self {
        Self { focus: Focus::None, zoom, follow }
    }

    /// Select a vehicle. Ids not in the store are ignored. Re-selecting the
    /// current vehicle centers on it again.
    pub fn select(&mut self, vehicle_id: &VehicleId, store: &PositionStore) -> Option<CameraCommand> {
        let position = store.get(vehicle_id)?;
        self.focus = Focus::Selected(vehicle_id.clone());
        Some(self.center(position))
    }

    /// Camera command for an updated position, when follow mode is on and the
    /// position belongs to the selected vehicle.
    #[must_use]
    pub fn on_position(&self, position: &VehiclePosition) -> Option<CameraCommand> {
        (self.follow && self.selected() == Some(&position.vehicle_id))
            .then(|| self.center(position))
    }

    pub fn clear(&mut self) {
        self.focus = Focus::None;
    }

    #[must_use]
    pub const fn focus(&self) -> &Focus {
        &self.focus
    }

    /// The selected vehicle, which may no longer be in the store.
    #[must_use]
    pub const fn selected(&self) -> Option<&VehicleId> {
        match &self.focus {
            Focus::Selected(vehicle_id) => Some(vehicle_id),
            Focus::None => None,
        }
    }

    /// Whether the selection points at a vehicle that left the store.
    #[must_use]
    pub fn is_stale(&self, store: &PositionStore) -> bool {
        self.selected().is_some_and(|vehicle_id| !store.contains(vehicle_id))
    }

    const fn center(&self, position: &VehiclePosition) -> CameraCommand {
        CameraCommand {
            latitude: position.latitude,
            longitude: position.longitude,
            zoom: self.zoom,
            animate: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn store_with(ids: &[(&str, f64, f64)]) -> PositionStore {
        let mut store = PositionStore::new();
        for (id, lat, lng) in ids {
            store.set(VehiclePosition {
                vehicle_id: (*id).into(),
                license_plate: "Unknown".to_string(),
                latitude: *lat,
                longitude: *lng,
                speed: 0.0,
                heading: 0.0,
                timestamp: Utc::now(),
                route_id: None,
            });
        }
        store
    }

    #[test]
    fn select_centers() {
        let store = store_with(&[("a", -17.40, -66.15)]);
        let mut focus = FocusController::new(16, false);

        let camera = focus.select(&"a".into(), &store);
        assert_eq!(
            camera,
            Some(CameraCommand { latitude: -17.40, longitude: -66.15, zoom: 16, animate: true })
        );
        assert_eq!(focus.focus(), &Focus::Selected("a".into()));

        // re-selecting re-issues
        assert_eq!(focus.select(&"a".into(), &store), camera);
    }

    #[test]
    fn select_absent_is_ignored() {
        let store = store_with(&[("a", 1.0, 1.0)]);
        let mut focus = FocusController::new(16, false);

        assert_eq!(focus.select(&"zz".into(), &store), None);
        assert_eq!(focus.focus(), &Focus::None);

        focus.select(&"a".into(), &store);
        assert_eq!(focus.select(&"zz".into(), &store), None);
        assert_eq!(focus.selected(), Some(&"a".into()));
    }

    #[test]
    fn stale_selection() {
        let mut store = store_with(&[("a", 1.0, 1.0)]);
        let mut focus = FocusController::new(16, false);
        focus.select(&"a".into(), &store);

        store.remove(&"a".into());
        assert_eq!(focus.selected(), Some(&"a".into()));
        assert!(focus.is_stale(&store));

        focus.clear();
        assert_eq!(focus.selected(), None);
    }

    #[test]
    fn follow_mode() {
        let store = store_with(&[("a", 1.0, 1.0), ("b", 2.0, 2.0)]);
        let moved = store_with(&[("a", 3.0, 3.0)]);
        let update = moved.get(&"a".into()).expect("present").clone();
        let other = store.get(&"b".into()).expect("present").clone();

        let mut off = FocusController::new(16, false);
        off.select(&"a".into(), &store);
        assert_eq!(off.on_position(&update), None);

        let mut on = FocusController::new(16, true);
        on.select(&"a".into(), &store);
        assert_eq!(on.on_position(&update).map(|c| c.latitude), Some(3.0));
        assert_eq!(on.on_position(&other), None);
    }
}
