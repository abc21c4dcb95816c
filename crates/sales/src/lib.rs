//! Orders, reservations and returns (event-sourced where it pays off).
//!
//! This crate contains business rules for customer orders and the sale
//! transactions they produce, implemented purely as deterministic domain logic
//! (no IO, no HTTP, no storage).

pub mod order;
pub mod reservation;
pub mod returns;

pub use order::{
    ChangeStatus, Order, OrderCommand, OrderEvent, OrderLine, OrderPlaced, OrderStatus,
    OrderStatusChanged, PlaceOrder, final_amount,
};
pub use reservation::{Reservation, ReservationStatus};
pub use returns::{ReturnEvent, ReturnItem, ReturnTransaction, SaleLine, SaleRecord};
