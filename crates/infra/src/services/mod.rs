//! Application services. Every mutation goes through the shared `CommitPipeline`.

pub mod adjustment;
pub mod point_of_sale;
pub mod reorder;
pub mod reservations;
pub mod returns;

pub use adjustment::{AdjustmentService, RegisterProduct, TransferReceipt};
pub use point_of_sale::{PointOfSale, SaleReceipt};
pub use reorder::{LevelFilter, ReorderMonitor, StockLevel};
pub use reservations::{ORDER_STREAM_TYPE, ReservationCoordinator};
pub use returns::{ReturnProcessor, SALE_STREAM_TYPE};
