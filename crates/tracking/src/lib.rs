//! # Vehicle Tracking
//!
//! Real-time vehicle positions for the school-transport dashboard: a shared
//! push-channel connection, normalization of heterogeneous telemetry, the
//! live position store, a fallback poller and the map and focus adapters
//! driven by a single-writer view.

mod config;
mod focus;
mod model;
mod poller;
mod reconciler;
mod renderer;
mod store;
mod subscription;
mod view;

pub mod api;
pub mod connection;
pub mod provider;

pub use realtime::{Error, Result};

pub use self::config::*;
pub use self::connection::{ChannelEvent, Connection, Frame, Listener, PushSession, PushTransport};
pub use self::focus::*;
pub use self::model::*;
pub use self::poller::*;
pub use self::provider::{HttpRequest, Identity, Provider};
pub use self::reconciler::*;
pub use self::renderer::*;
pub use self::store::*;
pub use self::subscription::*;
pub use self::view::*;
