//! Infrastructure layer: storage, the commit pipeline, services, read models
//! and background workers.

pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod projections;
pub mod projector;
pub mod read_model;
pub mod retry;
pub mod services;
pub mod store;
pub mod workers;

#[cfg(test)]
pub(crate) mod test_support;

mod integration_tests;

pub use config::{ConfigError, Settings};
pub use context::RequestContext;
pub use error::{ServiceError, StoreError};
pub use ledger::{LedgerAudit, StockLedger};
pub use pipeline::CommitPipeline;
pub use projector::InventoryProjector;
pub use retry::RetryPolicy;
