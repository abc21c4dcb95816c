//! Store-isolated read model storage.

pub mod store_scoped;

pub use store_scoped::{InMemoryStoreScoped, StoreScopedStore};
