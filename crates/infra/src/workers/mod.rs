//! Background worker threads.

pub mod projection_worker;
pub mod reservation_sweeper;

pub use projection_worker::{ProjectionWorker, WorkerHandle};
pub use reservation_sweeper::ReservationSweeper;
