//! # Fallback Poller
//!
//! Periodically re-fetches the last known position of every vehicle already
//! in the store, covering gaps in the push channel. Results are posted back to
//! the view queue and go through the same reconciliation as push events.
//! Polling never makes a vehicle active on its own.

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api;
use crate::model::VehicleId;
use crate::provider::Provider;
use crate::renderer::MapSurface;
use crate::view::ViewEvent;

#[derive(Debug, Default)]
pub struct FallbackPoller {
    task: Option<JoinHandle<()>>,
}

impl FallbackPoller {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start one polling round over `ids`. Returns `false` when the round was
    /// skipped because there is nothing to poll or the previous round is still
    /// running.
    pub fn tick<P, S>(
        &mut self, provider: &P, ids: Vec<VehicleId>, queue: &UnboundedSender<ViewEvent<S>>,
    ) -> bool
    where
        P: Provider,
        S: MapSurface,
    {
        if self.is_running() {
            debug!("previous poll still running, skipping tick");
            return false;
        }
        if ids.is_empty() {
            return false;
        }

        debug!(vehicles = ids.len(), "polling last positions");
        let provider = provider.clone();
        let queue = queue.clone();
        self.task = Some(tokio::spawn(async move {
            for vehicle_id in ids {
                match api::last_position(&provider, &vehicle_id).await {
                    Ok(Some(raw)) => {
                        if queue.send(ViewEvent::Polled { vehicle_id, raw }).is_err() {
                            return;
                        }
                    }
                    Ok(None) => debug!(vehicle_id = %vehicle_id, "no last position"),
                    Err(err) => {
                        debug!(
                            monotonic_counter.poll_failures = 1,
                            vehicle_id = %vehicle_id,
                            error = %err,
                            "polling last position failed"
                        );
                    }
                }
            }
        }));
        true
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Abort the round in flight, if any.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
