//! # Provider
//!
//! Provider defines external data interfaces for the crate.

use anyhow::Result;
use bytes::Bytes;
use http::{Request, Response};

/// The `HttpRequest` trait defines the behavior for fetching data from a source.
pub trait HttpRequest: Send + Sync {
    /// Make outbound HTTP request.
    fn fetch(&self, request: Request<Bytes>) -> impl Future<Output = Result<Response<Bytes>>> + Send;
}

/// The `Config` trait is used by implementers to provide configuration from
/// the host to dependent crates.
pub trait Config: Send + Sync {
    /// Request configuration setting.
    fn get(&self, key: &str) -> impl Future<Output = Result<String>> + Send;
}

/// The `Identity` trait exposes the credential of the signed-in session.
pub trait Identity: Send + Sync {
    /// Bearer token for the current session.
    fn access_token(&self) -> impl Future<Output = Result<String>> + Send;
}
