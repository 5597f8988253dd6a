use tracing::info;
use tracking::{Bounds, CameraCommand, MapSurface, MarkerSpec, VehicleId};

/// Map surface that reports marker activity to the log, for running the
/// tracker without a UI.
#[derive(Debug, Default)]
pub struct ConsoleSurface;

impl MapSurface for ConsoleSurface {
    type Marker = VehicleId;

    fn place_marker(&mut self, vehicle_id: &VehicleId, spec: &MarkerSpec) -> VehicleId {
        info!(
            vehicle_id = %vehicle_id,
            plate = %spec.popup.plate,
            latitude = spec.latitude,
            longitude = spec.longitude,
            speed = %spec.popup.speed,
            time = %spec.popup.time,
            "vehicle visible"
        );
        vehicle_id.clone()
    }

    fn update_marker(&mut self, marker: &mut VehicleId, spec: &MarkerSpec) {
        info!(
            vehicle_id = %marker,
            latitude = spec.latitude,
            longitude = spec.longitude,
            heading = spec.icon.rotation,
            speed = %spec.popup.speed,
            time = %spec.popup.time,
            "vehicle moved"
        );
    }

    fn remove_marker(&mut self, marker: VehicleId) {
        info!(vehicle_id = %marker, "vehicle gone");
    }

    fn set_view(&mut self, camera: CameraCommand) {
        info!(latitude = camera.latitude, longitude = camera.longitude, zoom = camera.zoom, "camera");
    }

    fn fit_bounds(&mut self, bounds: Bounds) {
        info!(
            south = bounds.south,
            west = bounds.west,
            north = bounds.north,
            east = bounds.east,
            "fit bounds"
        );
    }
}
