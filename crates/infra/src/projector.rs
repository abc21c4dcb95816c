//! Inventory Projector read side.
//!
//! The fold itself (`InventoryState::apply`) runs inside the store's commit;
//! this is the hot-path reader. It never touches the ledger.

use pantry_core::{ProductId, StoreId};
use pantry_inventory::{InventoryState, StockKey};

use crate::error::ServiceError;
use crate::ledger::load_row;
use crate::store::InventoryStore;

#[derive(Debug, Clone)]
pub struct InventoryProjector<S> {
    store: S,
}

impl<S: InventoryStore> InventoryProjector<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn get(&self, store_id: StoreId, product_id: ProductId) -> Result<InventoryState, ServiceError> {
        load_row(&self.store, StockKey::new(store_id, product_id))
    }

    /// Every row of a store, ordered by product name.
    pub fn list(&self, store_id: StoreId) -> Result<Vec<InventoryState>, ServiceError> {
        let mut rows = self.store.states(store_id)?;
        rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.product_id.cmp(&b.product_id)));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use pantry_inventory::ProductSettings;

    use super::*;
    use crate::store::InMemoryInventoryStore;

    fn register(store: &InMemoryInventoryStore, store_id: StoreId, name: &str) -> ProductId {
        store
            .upsert_settings(
                ProductSettings {
                    store_id,
                    product_id: ProductId::new(),
                    name: name.to_string(),
                    sku: None,
                    reorder_point: Decimal::ZERO,
                    unit_cost: Decimal::ZERO,
                    allow_backorder: false,
                },
                Utc::now(),
            )
            .unwrap()
            .product_id
    }

    #[test]
    fn rows_are_isolated_per_store() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let (a, b) = (StoreId::new(), StoreId::new());
        let rice = register(&store, a, "Rice");
        register(&store, a, "Beans");
        register(&store, b, "Yam");

        let projector = InventoryProjector::new(store);
        let names: Vec<_> = projector.list(a).unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Beans", "Rice"]);
        assert!(projector.get(a, rice).is_ok());
        assert!(matches!(projector.get(b, rice), Err(ServiceError::NotFound(_))));
    }
}
