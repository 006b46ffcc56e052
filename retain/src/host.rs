use std::{
    any::{Any, TypeId},
    borrow::Cow,
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use rustc_hash::FxHashMap;

use crate::{
    base::{read, write},
    errors::ConfigError,
    session::Session,
    value::{Value, ValueKind},
};

/// An external object whose state accessors read and write.
///
/// Usually derived with `#[derive(Host)]`, which generates the static slot table.
pub trait Host: Send + Sync + 'static {
    const TYPE_TAG: &'static str;

    /// Stable identity; an empty id makes wrapping owners detached.
    fn host_id(&self) -> &str;

    fn slots() -> &'static SlotTable<Self>
    where
        Self: Sized;
}

pub type HostRef<H> = Arc<RwLock<H>>;

/// Type-erased `HostRef<H>` as handed out by a directory.
pub type AnyHost = Arc<dyn Any + Send + Sync>;

/// Collaborator that knows which host objects exist.
pub trait HostDirectory: Send + Sync {
    fn resolve(&self, host_type: &str, id: &str) -> Option<AnyHost>;

    fn enumerate(&self, host_type: &str) -> Vec<AnyHost>;
}

/// Static table of named, typed slots of one host type.
pub struct SlotTable<H> {
    slots: Vec<Box<dyn ErasedSlot<H>>>,
}

pub struct Slot<H, T> {
    pub name: &'static str,
    pub get: fn(&H) -> T,
    pub set: fn(&mut H, T),
}

pub trait ErasedSlot<H>: Send + Sync {
    fn name(&self) -> &'static str;

    fn value_tag(&self) -> Cow<'static, str>;

    fn kind(&self) -> ValueKind;

    fn value_type(&self) -> TypeId;

    fn as_any(&self) -> &dyn Any;

    /// Decodes before taking the host lock, so references may resolve freely.
    fn apply_encoded(
        &self,
        host: &RwLock<H>,
        payload: &str,
        session: &Session,
    ) -> anyhow::Result<()>;
}

/// In-memory directory, keyed by host type tag then host id.
#[derive(Default)]
pub struct MemoryDirectory {
    hosts: RwLock<FxHashMap<&'static str, BTreeMap<String, AnyHost>>>,
}

pub fn downcast_host<H: Host>(host: AnyHost) -> Option<HostRef<H>> {
    host.downcast::<RwLock<H>>().ok()
}

// Implementations

impl<H: Host> SlotTable<H> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn with<T: Value>(
        mut self,
        name: &'static str,
        get: fn(&H) -> T,
        set: fn(&mut H, T),
    ) -> Self {
        self.slots.push(Box::new(Slot { name, get, set }));
        self
    }

    pub fn find(&self, name: &str) -> Option<&dyn ErasedSlot<H>> {
        self.slots
            .iter()
            .find(|slot| slot.name() == name)
            .map(|slot| slot.as_ref())
    }

    pub fn typed<T: Value>(&self, name: &str) -> Result<Slot<H, T>, ConfigError> {
        let slot = self.find(name).ok_or_else(|| ConfigError::MissingSlot {
            host: H::TYPE_TAG,
            slot: name.to_owned(),
        })?;

        slot.as_any()
            .downcast_ref::<Slot<H, T>>()
            .copied()
            .ok_or_else(|| ConfigError::SlotTypeMismatch {
                host: H::TYPE_TAG,
                slot: name.to_owned(),
                expected: T::type_tag(),
                actual: slot.value_tag(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slots.iter().map(|slot| slot.name())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<H: Host> Default for SlotTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H, T> Clone for Slot<H, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H, T> Copy for Slot<H, T> {}

impl<H: Host, T: Value> ErasedSlot<H> for Slot<H, T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn value_tag(&self) -> Cow<'static, str> {
        T::type_tag()
    }

    fn kind(&self) -> ValueKind {
        T::KIND
    }

    fn value_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn apply_encoded(
        &self,
        host: &RwLock<H>,
        payload: &str,
        session: &Session,
    ) -> anyhow::Result<()> {
        let value = T::decode(payload, session)?;
        (self.set)(&mut *write(host), value);

        Ok(())
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a host under its current id and hands back the shared reference.
    pub fn insert<H: Host>(&self, host: H) -> HostRef<H> {
        let host = Arc::new(RwLock::new(host));
        self.insert_ref(&host);
        host
    }

    pub fn insert_ref<H: Host>(&self, host: &HostRef<H>) {
        let id = read(host).host_id().to_owned();

        write(&self.hosts)
            .entry(H::TYPE_TAG)
            .or_default()
            .insert(id, host.clone() as AnyHost);
    }

    pub fn get<H: Host>(&self, id: &str) -> Option<HostRef<H>> {
        self.resolve(H::TYPE_TAG, id).and_then(downcast_host)
    }

    pub fn remove<H: Host>(&self, id: &str) -> Option<HostRef<H>> {
        write(&self.hosts)
            .get_mut(H::TYPE_TAG)?
            .remove(id)
            .and_then(downcast_host)
    }

    pub fn len(&self) -> usize {
        read(&self.hosts).values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HostDirectory for MemoryDirectory {
    fn resolve(&self, host_type: &str, id: &str) -> Option<AnyHost> {
        read(&self.hosts).get(host_type)?.get(id).cloned()
    }

    fn enumerate(&self, host_type: &str) -> Vec<AnyHost> {
        read(&self.hosts)
            .get(host_type)
            .map(|hosts| hosts.values().cloned().collect())
            .unwrap_or_default()
    }
}
