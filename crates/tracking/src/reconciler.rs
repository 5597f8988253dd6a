//! # Event Reconciler
//!
//! Normalizes push events and polled HTTP snapshots into a single canonical
//! [`VehiclePosition`]. Every position write, from either channel, goes
//! through here so nothing downstream needs to know about payload variance.
//!
//! Each field has an ordered list of accepted shapes which are tried in turn.
//! Payloads that cannot be resolved to a vehicle id and both coordinate axes
//! are dropped without raising an error.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::trace;

use crate::model::{Roster, VehicleId, VehiclePosition};

const VEHICLE_ID_FIELDS: [&str; 2] = ["vehiculoId", "vehicleId"];
const PLATE_FIELDS: [&str; 3] = ["placa", "licensePlate", "plate"];
const SPEED_FIELDS: [&str; 2] = ["velocidad", "speed"];
const HEADING_FIELDS: [&str; 2] = ["rumbo", "heading"];
const ROUTE_FIELDS: [&str; 2] = ["routeId", "rutaId"];
const TIMESTAMP_FIELDS: [&str; 1] = ["timestamp"];
const LATITUDE_FIELDS: [&str; 3] = ["lat", "latitude", "latitud"];
const LONGITUDE_FIELDS: [&str; 4] = ["lng", "longitude", "longitud", "lon"];

// Unix timestamps above this are taken to be milliseconds.
const MILLIS_THRESHOLD: f64 = 100_000_000_000.0;

/// Accepted coordinate layouts, in resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoordinateShape {
    /// `{ "location": { "lat": .., "lng": .. } }`
    NestedFields,
    /// `{ "location": { "coordinates": [lng, lat] } }`
    NestedPair,
    /// `{ "lat": .., "lng": .. }`
    FlatFields,
    /// `{ "coordinates": [lng, lat] }`
    FlatPair,
}

const COORDINATE_SHAPES: [CoordinateShape; 4] = [
    CoordinateShape::NestedFields,
    CoordinateShape::NestedPair,
    CoordinateShape::FlatFields,
    CoordinateShape::FlatPair,
];

impl CoordinateShape {
    fn resolve(self, raw: &Map<String, Value>) -> Option<(f64, f64)> {
        let (lat, lng) = match self {
            Self::NestedFields => fields(raw.get("location")?.as_object()?)?,
            Self::NestedPair => pair(raw.get("location")?.as_object()?.get("coordinates")?)?,
            Self::FlatFields => fields(raw)?,
            Self::FlatPair => pair(raw.get("coordinates")?)?,
        };
        ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)).then_some((lat, lng))
    }
}

fn fields(object: &Map<String, Value>) -> Option<(f64, f64)> {
    Some((first_number(object, &LATITUDE_FIELDS)?, first_number(object, &LONGITUDE_FIELDS)?))
}

// GeoJSON ordering: longitude first.
fn pair(value: &Value) -> Option<(f64, f64)> {
    let items = value.as_array()?;
    Some((number(items.get(1)?)?, number(items.first()?)?))
}

/// Converts heterogeneous telemetry payloads into [`VehiclePosition`]s.
#[derive(Debug, Clone)]
pub struct Reconciler {
    unknown_plate: String,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new("Unknown")
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(unknown_plate: impl Into<String>) -> Self {
        Self { unknown_plate: unknown_plate.into() }
    }

    /// Normalize a push event. Returns `None` when the payload cannot be
    /// resolved to a vehicle id and a full coordinate pair.
    #[must_use]
    pub fn normalize(
        &self, raw: &Value, roster: &Roster, received_at: DateTime<Utc>,
    ) -> Option<VehiclePosition> {
        let object = raw.as_object()?;
        let Some(vehicle_id) = resolve_vehicle_id(object) else {
            trace!(monotonic_counter.telemetry_dropped = 1, reason = "missing vehicle id");
            return None;
        };
        self.build(vehicle_id, object, roster, received_at)
    }

    /// Normalize a last-position snapshot fetched for `vehicle_id`. The queried
    /// id is authoritative; snapshots frequently omit it.
    #[must_use]
    pub fn normalize_snapshot(
        &self, vehicle_id: &VehicleId, raw: &Value, roster: &Roster, received_at: DateTime<Utc>,
    ) -> Option<VehiclePosition> {
        let object = raw.as_object()?;
        self.build(vehicle_id.clone(), object, roster, received_at)
    }

    fn build(
        &self, vehicle_id: VehicleId, raw: &Map<String, Value>, roster: &Roster,
        received_at: DateTime<Utc>,
    ) -> Option<VehiclePosition> {
        let Some((latitude, longitude)) =
            COORDINATE_SHAPES.iter().find_map(|shape| shape.resolve(raw))
        else {
            trace!(
                monotonic_counter.telemetry_dropped = 1,
                vehicle_id = %vehicle_id,
                reason = "unresolved coordinates"
            );
            return None;
        };

        let license_plate = first_text(raw, &PLATE_FIELDS)
            .or_else(|| roster.plate(&vehicle_id).map(ToString::to_string))
            .unwrap_or_else(|| self.unknown_plate.clone());

        let speed = first_number(raw, &SPEED_FIELDS).unwrap_or(0.0).max(0.0);
        let heading = first_number(raw, &HEADING_FIELDS).unwrap_or(0.0).rem_euclid(360.0);
        // rem_euclid can round up to exactly 360 for tiny negative inputs
        let heading = if heading >= 360.0 { 0.0 } else { heading };

        let timestamp =
            TIMESTAMP_FIELDS.iter().find_map(|key| raw.get(*key).and_then(parse_timestamp));

        Some(VehiclePosition {
            vehicle_id,
            license_plate,
            latitude,
            longitude,
            speed,
            heading,
            timestamp: timestamp.unwrap_or(received_at),
            route_id: first_text(raw, &ROUTE_FIELDS),
        })
    }
}

/// Resolve only the vehicle id of an event, as needed for `trajectory:ended`.
#[must_use]
pub fn vehicle_id(raw: &Value) -> Option<VehicleId> {
    resolve_vehicle_id(raw.as_object()?)
}

fn resolve_vehicle_id(raw: &Map<String, Value>) -> Option<VehicleId> {
    VEHICLE_ID_FIELDS.iter().find_map(|key| match raw.get(*key)? {
        Value::String(id) => Some(id.trim()).filter(|id| !id.is_empty()).map(VehicleId::from),
        Value::Number(id) => Some(VehicleId::new(id.to_string())),
        _ => None,
    })
}

fn first_number(raw: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| raw.get(*key).and_then(number))
}

fn first_text(raw: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        raw.get(*key)?.as_str().map(str::trim).filter(|s| !s.is_empty()).map(ToString::to_string)
    })
}

// Numbers or numeric-looking strings; non-finite values are rejected.
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(unix))
        }
        Value::Number(n) => n.as_f64().and_then(unix),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn unix(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    if value >= MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(value as i64).single()
    } else {
        Utc.timestamp_opt(value as i64, 0).single()
    }
}
