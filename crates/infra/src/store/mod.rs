//! Persistence for the stock ledger and everything committed alongside it.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use r#trait::{CommitBatch, Committed, InventoryStore, OrderWrite, SaleWrite};
