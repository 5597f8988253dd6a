//! # Map Renderer Adapter
//!
//! Mirrors the position store onto a map surface: one marker per vehicle,
//! created on first sight, updated in place and removed when the vehicle
//! leaves the store. Until the surface is ready every operation is a no-op;
//! attaching renders the whole current store.

use std::collections::HashMap;

use chrono_tz::Tz;
use tracing::debug;

use crate::model::{VehicleId, VehiclePosition};
use crate::store::Change;

/// Map capability provided by the host UI.
pub trait MapSurface: Send + 'static {
    /// Handle to a marker placed on the surface.
    type Marker: Send;

    fn place_marker(&mut self, vehicle_id: &VehicleId, spec: &MarkerSpec) -> Self::Marker;

    fn update_marker(&mut self, marker: &mut Self::Marker, spec: &MarkerSpec);

    fn remove_marker(&mut self, marker: Self::Marker);

    fn set_view(&mut self, camera: CameraCommand);

    fn fit_bounds(&mut self, bounds: Bounds);
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSpec {
    pub latitude: f64,
    pub longitude: f64,
    pub icon: VehicleIcon,
    pub popup: Popup,
}

/// Bus glyph, rotated to the vehicle heading.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleIcon {
    pub color: String,
    pub rotation: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Popup {
    pub plate: String,
    /// Speed with one decimal, e.g. `12.0 km/h`.
    pub speed: String,
    /// Position time as `HH:MM:SS` in the configured timezone.
    pub time: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraCommand {
    pub latitude: f64,
    pub longitude: f64,
    pub zoom: u8,
    pub animate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl Bounds {
    /// Smallest box containing every position. `None` when empty.
    #[must_use]
    pub fn around<'a>(positions: impl IntoIterator<Item = &'a VehiclePosition>) -> Option<Self> {
        positions.into_iter().fold(None, |bounds, p| {
            let Some(b) = bounds else {
                return Some(Self {
                    south: p.latitude,
                    west: p.longitude,
                    north: p.latitude,
                    east: p.longitude,
                });
            };
            Some(Self {
                south: b.south.min(p.latitude),
                west: b.west.min(p.longitude),
                north: b.north.max(p.latitude),
                east: b.east.max(p.longitude),
            })
        })
    }
}

pub struct MapRenderer<S: MapSurface> {
    surface: Option<S>,
    markers: HashMap<VehicleId, S::Marker>,
    timezone: Tz,
    marker_color: String,
    created: usize,
    removed: usize,
}

impl<S: MapSurface> MapRenderer<S> {
    #[must_use]
    pub fn new(timezone: Tz, marker_color: impl Into<String>) -> Self {
        Self {
            surface: None,
            markers: HashMap::new(),
            timezone,
            marker_color: marker_color.into(),
            created: 0,
            removed: 0,
        }
    }

    /// Take the surface once the map is ready and draw the current positions.
    /// A previously attached surface is cleared and dropped.
    pub fn attach(&mut self, surface: S, positions: &[VehiclePosition]) {
        self.release();
        self.surface = Some(surface);
        for position in positions {
            self.upsert(position);
        }
        debug!(markers = self.markers.len(), "map surface attached");
    }

    /// Reflect one store change.
    pub fn apply(&mut self, change: &Change) {
        match change {
            Change::Upserted(position) => self.upsert(position),
            Change::Removed(vehicle_id) => self.remove(vehicle_id),
        }
    }

    /// Remove every marker. The surface stays attached.
    pub fn release(&mut self) {
        let Some(surface) = self.surface.as_mut() else {
            return;
        };
        for (_, marker) in self.markers.drain() {
            surface.remove_marker(marker);
            self.removed += 1;
        }
    }

    pub fn set_view(&mut self, camera: CameraCommand) {
        if let Some(surface) = self.surface.as_mut() {
            surface.set_view(camera);
        }
    }

    pub fn fit_bounds(&mut self, bounds: Bounds) {
        if let Some(surface) = self.surface.as_mut() {
            surface.fit_bounds(bounds);
        }
    }

    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.surface.is_some()
    }

    #[must_use]
    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    #[must_use]
    pub fn has_marker(&self, vehicle_id: &VehicleId) -> bool {
        self.markers.contains_key(vehicle_id)
    }

    /// Markers currently on the surface.
    #[must_use]
    pub fn markers(&self) -> usize {
        self.markers.len()
    }

    /// Markers created since construction.
    #[must_use]
    pub const fn created(&self) -> usize {
        self.created
    }

    /// Markers removed since construction.
    #[must_use]
    pub const fn removed(&self) -> usize {
        self.removed
    }

    /// Marker content for a position.
    #[must_use]
    pub fn marker_spec(&self, position: &VehiclePosition) -> MarkerSpec {
        MarkerSpec {
            latitude: position.latitude,
            longitude: position.longitude,
            icon: VehicleIcon { color: self.marker_color.clone(), rotation: position.heading },
            popup: Popup {
                plate: position.license_plate.clone(),
                speed: format!("{:.1} km/h", position.speed),
                time: position.timestamp.with_timezone(&self.timezone).format("%H:%M:%S").to_string(),
            },
        }
    }

    fn upsert(&mut self, position: &VehiclePosition) {
        if self.surface.is_none() {
            return;
        }
        let spec = self.marker_spec(position);
        let Some(surface) = self.surface.as_mut() else {
            return;
        };

        if let Some(marker) = self.markers.get_mut(&position.vehicle_id) {
            surface.update_marker(marker, &spec);
        } else {
            let marker = surface.place_marker(&position.vehicle_id, &spec);
            self.markers.insert(position.vehicle_id.clone(), marker);
            self.created += 1;
        }
    }

    fn remove(&mut self, vehicle_id: &VehicleId) {
        let Some(surface) = self.surface.as_mut() else {
            return;
        };
        if let Some(marker) = self.markers.remove(vehicle_id) {
            surface.remove_marker(marker);
            self.removed += 1;
        }
    }
}
