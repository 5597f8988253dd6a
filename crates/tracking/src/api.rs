//! # Backend API
//!
//! Read-only calls against the tracking backend: the vehicle roster, the
//! active-trip check and the last known position.

use anyhow::Context;
use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION};
use http::{Method, StatusCode};
use realtime::{Config, HttpRequest, Identity, Result, bad_gateway, not_found};
use serde_json::Value;
use tracing::debug;
use urlencoding::encode;

use crate::model::{Roster, Vehicle, VehicleId};
use crate::provider::Provider;

const DEFAULT_API_URL: &str = "http://localhost:3000/api";

/// Backend base URL without a trailing slash.
pub async fn api_url(provider: &impl Provider) -> String {
    let url = Config::get(provider, "TRACKING_API_URL")
        .await
        .unwrap_or_else(|_| DEFAULT_API_URL.to_string());
    url.trim_end_matches('/').to_string()
}

/// Full vehicle roster.
///
/// # Errors
///
/// Returns an error when the request fails or the body is not a vehicle list.
pub async fn fetch_roster(provider: &impl Provider) -> Result<Roster> {
    let body = match get(provider, "/vehicles").await {
        Ok(body) => body,
        Err(err) if err.is_absent() => return Ok(Roster::default()),
        Err(err) => return Err(err),
    };
    let vehicles: Vec<Vehicle> = serde_json::from_slice(&body)?;
    Ok(Roster::new(vehicles))
}

/// Whether the vehicle currently has an active trajectory. A missing or empty
/// trajectory counts as inactive.
///
/// # Errors
///
/// Returns an error when the request fails.
pub async fn has_active_trip(provider: &impl Provider, vehicle_id: &VehicleId) -> Result<bool> {
    let path = format!("/gps/trajectory/{}/active", encode(vehicle_id.as_str()));
    let body = match get(provider, &path).await {
        Ok(body) => body,
        Err(err) if err.is_absent() => return Ok(false),
        Err(err) => return Err(err),
    };
    match serde_json::from_slice::<Value>(&body) {
        Ok(trajectory) => Ok(trajectory.get("id").is_some_and(|id| !id.is_null())),
        Err(err) => {
            debug!(
                vehicle_id = %vehicle_id,
                error = %err,
                "unreadable trajectory, treating as inactive"
            );
            Ok(false)
        }
    }
}

/// Raw last-position snapshot, if the backend has one.
///
/// # Errors
///
/// Returns an error when the request fails or the body is not JSON.
pub async fn last_position(
    provider: &impl Provider, vehicle_id: &VehicleId,
) -> Result<Option<Value>> {
    let path = format!("/gps/last/{}", encode(vehicle_id.as_str()));
    let body = match get(provider, &path).await {
        Ok(body) => body,
        Err(err) if err.is_absent() => return Ok(None),
        Err(err) => return Err(err),
    };
    let snapshot: Value = serde_json::from_slice(&body)?;
    Ok((!snapshot.is_null()).then_some(snapshot))
}

// GET a backend path. A 404 or an empty body is `NotFound`.
async fn get(provider: &impl Provider, path: &str) -> Result<Bytes> {
    let url = api_url(provider).await;

    let mut builder = http::Request::builder()
        .method(Method::GET)
        .uri(format!("{url}{path}"))
        .header(ACCEPT, "application/json");
    match Identity::access_token(provider).await {
        Ok(token) if !token.is_empty() => {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        _ => debug!(path, "calling backend without a session token"),
    }
    let request = builder.body(Bytes::new()).context("building backend request")?;

    let response = HttpRequest::fetch(provider, request)
        .await
        .with_context(|| format!("calling backend {path}"))?;

    match response.status() {
        StatusCode::NOT_FOUND => Err(not_found!("backend {} has nothing", path)),
        status if status.is_success() => {
            let body = response.into_body();
            if body.iter().all(u8::is_ascii_whitespace) {
                return Err(not_found!("backend {} returned an empty body", path));
            }
            Ok(body)
        }
        status => Err(bad_gateway!("backend {} returned {}", path, status)),
    }
}
