//! Periodic release of expired reservations.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use pantry_events::{EventBus, EventEnvelope};

use crate::services::ReservationCoordinator;
use crate::store::InventoryStore;
use crate::workers::WorkerHandle;

#[derive(Debug)]
pub struct ReservationSweeper;

impl ReservationSweeper {
    /// Run `release_expired` every `interval` until shut down.
    ///
    /// A failed sweep is logged and retried on the next tick.
    pub fn spawn<S, B>(
        coordinator: ReservationCoordinator<S, B>,
        interval: Duration,
    ) -> std::io::Result<WorkerHandle>
    where
        S: InventoryStore + 'static,
        B: EventBus<EventEnvelope<JsonValue>> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name("reservation-sweeper".to_string())
            .spawn(move || {
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                    }
                    match coordinator.release_expired(Utc::now()) {
                        Ok(0) => debug!("no expired reservations"),
                        Ok(n) => info!(released = n, "expired reservations released"),
                        Err(e) => warn!(error = %e, "reservation sweep failed"),
                    }
                }
            })?;

        info!(interval_ms = interval.as_millis() as u64, "reservation sweeper started");
        Ok(WorkerHandle::new(shutdown_tx, join))
    }
}
