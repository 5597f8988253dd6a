//! # Tracker
//!
//! Headless tracking client: follows every vehicle of the school-transport
//! fleet on the live channel and logs their positions.

mod console;
mod provider;
mod socket;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use tracking::{Config, TrackingView};

use crate::console::ConsoleSurface;
use crate::provider::AppContext;
use crate::socket::SocketIoTransport;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let config = Config::from_env();
    let ctx = AppContext::new()?;

    let connection = tracking::connection::connect(&ctx, SocketIoTransport, config.reconnect).await;
    let (mut view, handle) = TrackingView::mount(ctx, &connection, &config);
    handle.map_ready(ConsoleSurface);

    tokio::select! {
        () = view.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for shutdown signal")?;
            info!("shutting down");
        }
    }

    view.teardown();
    connection.close();
    Ok(())
}
