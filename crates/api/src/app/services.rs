//! Service wiring: one store, one bus, the stock services on top, and the
//! background workers that keep read models and reservations current.

use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::info;

use pantry_events::{EventEnvelope, InMemoryEventBus};
use pantry_infra::projections::{DashboardProjection, DashboardSummary, SummaryKey};
use pantry_infra::read_model::InMemoryStoreScoped;
use pantry_infra::services::{
    AdjustmentService, PointOfSale, ReorderMonitor, ReservationCoordinator, ReturnProcessor,
};
use pantry_infra::store::{InMemoryInventoryStore, InventoryStore};
use pantry_infra::workers::{ProjectionWorker, ReservationSweeper, WorkerHandle};
use pantry_infra::{CommitPipeline, ServiceError, Settings, StockLedger};

/// Type-erased store so in-memory and Postgres back-ends share one wiring.
pub type DynStore = Arc<dyn InventoryStore>;
pub type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type Dashboard = DashboardProjection<Arc<InMemoryStoreScoped<SummaryKey, DashboardSummary>>>;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("reservation ttl out of range: {0}")]
    ReservationTtl(String),

    #[error("failed to start worker: {0}")]
    Worker(#[from] std::io::Error),
}

pub struct AppServices {
    pub adjustments: AdjustmentService<DynStore, Bus>,
    pub orders: ReservationCoordinator<DynStore, Bus>,
    pub returns: ReturnProcessor<DynStore, Bus>,
    pub sales: PointOfSale<DynStore, Bus>,
    pub ledger: StockLedger<DynStore, Bus>,
    pub monitor: ReorderMonitor<DynStore>,
    pub dashboard: Arc<Dashboard>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl AppServices {
    /// Wire services over `store` and start the background workers.
    pub fn start(store: DynStore, settings: &Settings) -> Result<Self, StartupError> {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let pipeline = Arc::new(CommitPipeline::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            settings.retry_policy(),
        ));

        let ttl = settings
            .reservation_ttl
            .map(chrono::Duration::from_std)
            .transpose()
            .map_err(|e| StartupError::ReservationTtl(e.to_string()))?;
        let orders = ReservationCoordinator::new(Arc::clone(&pipeline), ttl);

        let dashboard = Arc::new(DashboardProjection::new(Arc::new(InMemoryStoreScoped::new())));
        let sink = Arc::clone(&dashboard);
        let mut workers = vec![ProjectionWorker::spawn(
            "dashboard-projection",
            Arc::clone(&bus),
            None,
            move |env: EventEnvelope<JsonValue>| sink.apply_envelope(&env),
        )?];
        if ttl.is_some() {
            workers.push(ReservationSweeper::spawn(orders.clone(), settings.sweep_interval)?);
        }

        info!(workers = workers.len(), "services started");
        Ok(Self {
            adjustments: AdjustmentService::new(Arc::clone(&pipeline)),
            returns: ReturnProcessor::new(Arc::clone(&pipeline)),
            sales: PointOfSale::new(Arc::clone(&pipeline)),
            ledger: StockLedger::new(Arc::clone(&pipeline)),
            monitor: ReorderMonitor::new(store),
            orders,
            dashboard,
            workers: Mutex::new(workers),
        })
    }

    pub fn in_memory(settings: &Settings) -> Result<Self, StartupError> {
        Self::start(Arc::new(InMemoryInventoryStore::new()), settings)
    }

    /// Stop and join the background workers. Later calls do nothing.
    pub fn shutdown(&self) {
        let workers = match self.workers.lock() {
            Ok(mut w) => std::mem::take(&mut *w),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for worker in workers {
            worker.shutdown();
        }
    }
}

/// Run a blocking service call off the async executor.
///
/// Store calls may block on IO (the Postgres store drives its own futures), so
/// handlers never invoke services directly.
pub async fn blocking<T, F>(f: F) -> Result<T, axum::response::Response>
where
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(super::errors::service_error_to_response(e)),
        Err(e) => Err(super::errors::json_error(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            e.to_string(),
        )),
    }
}
