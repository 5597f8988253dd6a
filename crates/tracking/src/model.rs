//! Tracking data model: roster vehicles and live positions.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Opaque, stable vehicle identifier.
///
/// Deserializes from a string or a number; numeric ids are kept in their
/// decimal form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct VehicleId(String);

impl<'de> Deserialize<'de> for VehicleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(id) => Self(id),
            Raw::Number(id) => Self(id.to_string()),
        })
    }
}

impl VehicleId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VehicleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for VehicleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Latest known position of a vehicle on an active trip.
///
/// Records are replaced wholesale on every update and never partially
/// mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehiclePosition {
    pub vehicle_id: VehicleId,
    pub license_plate: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Ground speed in km/h, never negative.
    pub speed: f64,
    /// Compass bearing in degrees, within [0, 360).
    pub heading: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,
}

/// Vehicle as returned by the roster endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Vehicle {
    pub id: VehicleId,
    #[serde(alias = "placa")]
    pub plate: Option<String>,
    #[serde(alias = "marca")]
    pub brand: Option<String>,
    #[serde(alias = "modelo")]
    pub model: Option<String>,
    #[serde(alias = "capacidad")]
    pub capacity: Option<u32>,
    pub color: Option<String>,
    #[serde(alias = "activo")]
    pub active: Option<bool>,
    #[serde(alias = "conductorId")]
    pub driver_id: Option<String>,
}

/// Id-keyed snapshot of the vehicle roster.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    vehicles: Vec<Vehicle>,
    index: HashMap<VehicleId, usize>,
}

impl Roster {
    #[must_use]
    pub fn new(vehicles: Vec<Vehicle>) -> Self {
        let index =
            vehicles.iter().enumerate().map(|(idx, vehicle)| (vehicle.id.clone(), idx)).collect();
        Self { vehicles, index }
    }

    #[must_use]
    pub fn get(&self, id: &VehicleId) -> Option<&Vehicle> {
        self.index.get(id).map(|&idx| &self.vehicles[idx])
    }

    /// Display plate for a vehicle, ignoring blank entries.
    #[must_use]
    pub fn plate(&self, id: &VehicleId) -> Option<&str> {
        self.get(id)
            .and_then(|vehicle| vehicle.plate.as_deref())
            .map(str::trim)
            .filter(|plate| !plate.is_empty())
    }

    /// Distinct vehicle ids, in roster order.
    #[must_use]
    pub fn ids(&self) -> Vec<VehicleId> {
        let mut seen = std::collections::HashSet::new();
        self.vehicles
            .iter()
            .filter(|vehicle| seen.insert(&vehicle.id))
            .map(|vehicle| vehicle.id.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.iter()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.vehicles.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }
}

impl FromIterator<Vehicle> for Roster {
    fn from_iter<I: IntoIterator<Item = Vehicle>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn roster_accepts_backend_names() {
        let vehicles: Vec<Vehicle> = serde_json::from_value(json!([
            {"id": "a1", "placa": "2345-XYZ", "marca": "Toyota", "capacidad": 30, "activo": true},
            {"id": "b2", "plate": " ", "conductorId": "d9", "extra": "ignored"}
        ]))
        .expect("should deserialize roster");
        let roster = Roster::new(vehicles);

        assert_eq!(roster.len(), 2);
        assert_eq!(roster.plate(&"a1".into()), Some("2345-XYZ"));
        assert_eq!(roster.plate(&"b2".into()), None);
        assert_eq!(roster.get(&"b2".into()).and_then(|v| v.driver_id.as_deref()), Some("d9"));
        assert_eq!(roster.plate(&"zz".into()), None);
    }

    #[test]
    fn roster_ids_are_distinct() {
        let roster: Roster = ["a", "b", "a"]
            .into_iter()
            .map(|id| Vehicle { id: id.into(), ..Vehicle::default() })
            .collect();

        assert_eq!(roster.ids(), vec![VehicleId::from("a"), VehicleId::from("b")]);
    }

    #[test]
    fn numeric_ids() {
        let vehicle: Vehicle =
            serde_json::from_value(json!({"id": 42, "placa": "100-ABC"})).expect("should deserialize");
        assert_eq!(vehicle.id, VehicleId::from("42"));
    }
}
