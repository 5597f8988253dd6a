//! # Provider
//!
//! Provider defines external data interfaces for the crate.

pub use realtime::{HttpRequest, Identity};

/// Provider entry point implemented by the host application.
pub trait Provider: HttpRequest + realtime::Config + Identity + Clone + 'static {}
