use std::{
    any::Any,
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use crate::{
    base::locked,
    owner::{AnyOwner, Owner},
    registry::Model,
};

/// One owner per uid (`<owner tag>:<host id>`) for the lifetime of a session.
/// Ordered, so tracked owners are walked deterministically at save.
#[derive(Default)]
pub(crate) struct IdentityCache {
    owners: Mutex<BTreeMap<String, CachedOwner>>,
}

struct CachedOwner {
    typed: Arc<dyn Any + Send + Sync>,
    erased: Arc<dyn AnyOwner>,
}

// Implementations

impl IdentityCache {
    pub(crate) fn get<M: Model>(&self, uid: &str) -> Option<Arc<Owner<M>>> {
        locked(&self.owners)
            .get(uid)
            .and_then(|cached| cached.typed.clone().downcast::<Owner<M>>().ok())
    }

    /// `make` runs under the cache lock and must not touch the session.
    pub(crate) fn get_or_insert_with<M: Model>(
        &self,
        uid: &str,
        make: impl FnOnce() -> Owner<M>,
    ) -> Option<Arc<Owner<M>>> {
        let mut owners = locked(&self.owners);
        let cached = owners.entry(uid.to_owned()).or_insert_with(|| {
            let owner = Arc::new(make());
            CachedOwner {
                typed: owner.clone(),
                erased: owner,
            }
        });

        cached.typed.clone().downcast::<Owner<M>>().ok()
    }

    pub(crate) fn all(&self) -> Vec<Arc<dyn AnyOwner>> {
        locked(&self.owners)
            .values()
            .map(|cached| cached.erased.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        locked(&self.owners).len()
    }

    pub(crate) fn clear(&self) {
        // Owners drop outside the lock.
        let owners = std::mem::take(&mut *locked(&self.owners));
        drop(owners);
    }
}
