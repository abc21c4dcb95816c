use pantry_core::{ActorId, StoreId};

/// Who is acting, and on which store. Passed explicitly into every service call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub store_id: StoreId,
    pub actor_id: ActorId,
}

impl RequestContext {
    pub fn new(store_id: StoreId, actor_id: ActorId) -> Self {
        Self { store_id, actor_id }
    }

    /// Context for background jobs acting on `store_id`.
    pub fn system(store_id: StoreId) -> Self {
        Self::new(store_id, ActorId::SYSTEM)
    }
}
