use std::sync::{
    Arc, RwLock, Weak,
    atomic::{AtomicU64, Ordering},
};

use crate::{
    base::{debug, info, read},
    errors::ConfigError,
    host::{Host, HostDirectory, HostRef, downcast_host},
    identity::IdentityCache,
    local::LocalStore,
    owner::{AnyOwner, Owner, OwnerId},
    registry::{Model, ModelRegistry},
    store::{ApplyReport, FlushReport, PersistenceStore},
};

/// Owned context of one save/load lifecycle: models, persistence store,
/// local store, identity cache and the host directory.
#[derive(Clone)]
pub struct Session(Arc<SessionInner>);

/// Handle held by owners and accessors; does not keep the session alive.
#[derive(Clone, Default)]
pub struct WeakSession(Weak<SessionInner>);

pub struct SessionBuilder {
    directory: Arc<dyn HostDirectory>,
    models: ModelRegistry,
}

struct SessionInner {
    models: ModelRegistry,
    store: Arc<PersistenceStore>,
    locals: Arc<LocalStore>,
    identities: IdentityCache,
    directory: Arc<dyn HostDirectory>,
    synthetic: AtomicU64,
}

// Implementations

impl Session {
    /// Session over every model submitted with `register_model!`.
    pub fn new(directory: Arc<dyn HostDirectory>) -> Result<Self, ConfigError> {
        Ok(Self::builder(directory).linked()?.build())
    }

    pub fn builder(directory: Arc<dyn HostDirectory>) -> SessionBuilder {
        SessionBuilder {
            directory,
            models: ModelRegistry::new(),
        }
    }

    pub fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.0))
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.0.models
    }

    pub fn store(&self) -> &Arc<PersistenceStore> {
        &self.0.store
    }

    pub fn locals(&self) -> &Arc<LocalStore> {
        &self.0.locals
    }

    pub fn directory(&self) -> &Arc<dyn HostDirectory> {
        &self.0.directory
    }

    /// The owner of a live host. Hosts with an id share one owner per session;
    /// hosts without one get a fresh detached owner.
    pub fn wrap<M: Model>(&self, host: &HostRef<M::Host>) -> Result<Arc<Owner<M>>, ConfigError> {
        let schema = self.0.models.schema::<M>()?;
        let id = read(host).host_id().to_owned();

        if id.is_empty() {
            return Ok(Arc::new(Owner::new(self.next_synthetic(), host.clone(), schema, self)));
        }

        let uid = format!("{}:{id}", M::TYPE_TAG);
        self.0
            .identities
            .get_or_insert_with::<M>(&uid, || {
                Owner::new(OwnerId::Host(id), host.clone(), schema, self)
            })
            .ok_or(ConfigError::UnregisteredModel(M::TYPE_TAG))
    }

    /// Uncached owner with a synthetic identity; its keys are lazy-only.
    pub fn detached<M: Model>(&self, host: M::Host) -> Result<Arc<Owner<M>>, ConfigError> {
        let schema = self.0.models.schema::<M>()?;
        let host = Arc::new(RwLock::new(host));

        Ok(Arc::new(Owner::new(self.next_synthetic(), host, schema, self)))
    }

    /// Cached owner, or one wrapping the host the directory resolves for `id`.
    pub fn lookup<M: Model>(&self, id: &str) -> Result<Option<Arc<Owner<M>>>, ConfigError> {
        if id.is_empty() {
            return Ok(None);
        }

        if let Some(owner) = self.0.identities.get::<M>(&format!("{}:{id}", M::TYPE_TAG)) {
            return Ok(Some(owner));
        }

        let Some(host) = self
            .0
            .directory
            .resolve(<M::Host as Host>::TYPE_TAG, id)
            .and_then(downcast_host::<M::Host>)
        else {
            debug!(owner = M::TYPE_TAG, id, "host not found");
            return Ok(None);
        };

        self.wrap::<M>(&host).map(Some)
    }

    /// Resolves `<owner tag>:<host id>` through the model registry.
    pub fn lookup_uid(&self, uid: &str) -> Option<Arc<dyn AnyOwner>> {
        let (tag, id) = uid.split_once(':')?;
        self.0.models.lookup(tag)?.lookup(self, id)
    }

    /// Every host of the model's host type the directory knows, wrapped.
    pub fn all<M: Model>(&self) -> Result<Vec<Arc<Owner<M>>>, ConfigError> {
        self.0
            .directory
            .enumerate(<M::Host as Host>::TYPE_TAG)
            .into_iter()
            .filter_map(downcast_host::<M::Host>)
            .map(|host| self.wrap::<M>(&host))
            .collect()
    }

    /// Cached owners, ordered by uid.
    pub fn tracked_owners(&self) -> Vec<Arc<dyn AnyOwner>> {
        self.0.identities.all()
    }

    pub fn tracked_len(&self) -> usize {
        self.0.identities.len()
    }

    pub fn flush(&self) -> FlushReport {
        self.0.store.flush()
    }

    pub fn apply_loaded(&self) -> ApplyReport {
        self.0.store.apply_loaded(self)
    }

    pub fn apply_loaded_eager(&self) -> ApplyReport {
        self.0.store.apply_loaded_eager(self)
    }

    /// Teardown: forgets every owner and every stored or local value.
    pub fn end(self) {
        self.0.identities.clear();
        self.0.store.clear();
        self.0.locals.clear();

        info!("session ended");
    }

    fn next_synthetic(&self) -> OwnerId {
        OwnerId::Synthetic(self.0.synthetic.fetch_add(1, Ordering::Relaxed))
    }
}

impl WeakSession {
    pub fn upgrade(&self) -> Option<Session> {
        self.0.upgrade().map(Session)
    }
}

impl SessionBuilder {
    pub fn model<M: Model>(mut self) -> Result<Self, ConfigError> {
        self.models.register::<M>()?;
        Ok(self)
    }

    /// Adds every model submitted with `register_model!`.
    pub fn linked(mut self) -> Result<Self, ConfigError> {
        self.models.extend_linked()?;
        Ok(self)
    }

    pub fn build(self) -> Session {
        Session(Arc::new(SessionInner {
            models: self.models,
            store: Arc::new(PersistenceStore::new()),
            locals: Arc::new(LocalStore::new()),
            identities: IdentityCache::default(),
            directory: self.directory,
            synthetic: AtomicU64::new(1),
        }))
    }
}
