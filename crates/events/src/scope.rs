use pantry_core::StoreId;

use crate::EventEnvelope;

/// Messages that belong to exactly one store.
///
/// Workers pinned to a store use this to ignore everything else.
pub trait StoreScoped {
    fn store_id(&self) -> StoreId;
}

impl<E> StoreScoped for EventEnvelope<E> {
    fn store_id(&self) -> StoreId {
        self.store_id()
    }
}
