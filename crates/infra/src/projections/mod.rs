//! Read-model projections fed from the event bus.

pub mod dashboard;

pub use dashboard::{DashboardProjection, DashboardProjectionError, DashboardSummary, SummaryKey};
