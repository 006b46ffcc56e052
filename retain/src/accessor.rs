use std::{
    any::Any,
    borrow::Cow,
    sync::{
        Arc, Mutex, RwLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::anyhow;

use crate::{
    base::{locked, read, trace, write},
    host::{Host, HostRef, Slot},
    local::LocalStore,
    schema::Priority,
    session::{Session, WeakSession},
    store::PersistenceStore,
    value::{Value, ValueKind},
};

/// Type-erased view of an accessor, as seen by the store, owners and dependents.
pub trait Attribute: Send + Sync {
    fn name(&self) -> &str;

    /// Store key; also the local store key of local bindings.
    fn key(&self) -> &str;

    fn value_tag(&self) -> &str;

    fn priority(&self) -> Priority;

    fn kind(&self) -> ValueKind;

    fn is_persistent(&self) -> bool;

    fn is_serializable(&self) -> bool;

    fn is_dirty(&self) -> bool;

    fn is_persisted(&self) -> bool;

    /// Only the clean to dirty transition notifies the store and the dependents.
    fn mark_dirty(&self);

    fn clear_dirty(&self);

    fn mark_persisted(&self);

    /// A dirty accessor marks the new dependent dirty right away.
    fn add_dependent(&self, dependent: Weak<dyn Attribute>);

    fn encode(&self) -> anyhow::Result<String>;

    /// Decodes and writes through the binding without marking dirty.
    fn apply_encoded(&self, payload: &str, session: &Session) -> anyhow::Result<()>;
}

/// Typed get/set binding of one attribute on one owner.
pub struct Accessor<H: Host, T: Value> {
    meta: AttrMeta,
    binding: Binding<H, T>,
    ctx: AccessorContext<H>,
    dirty: AtomicBool,
    persisted: AtomicBool,
    dependents: Mutex<Vec<Weak<dyn Attribute>>>,
}

#[derive(Debug, Clone)]
pub(crate) struct AttrMeta {
    pub(crate) name: &'static str,
    pub(crate) key: String,
    pub(crate) value_tag: Cow<'static, str>,
    pub(crate) kind: ValueKind,
    pub(crate) priority: Priority,
    pub(crate) persistent: bool,
    pub(crate) serializable: bool,
}

pub(crate) enum Binding<H, T> {
    Slot(Slot<H, T>),
    Delegate {
        get: Arc<dyn Fn(&H) -> T + Send + Sync>,
        set: Arc<dyn Fn(&mut H, T) + Send + Sync>,
    },
    /// Seed written on first read.
    Local(T),
}

pub(crate) struct AccessorContext<H> {
    pub(crate) host: HostRef<H>,
    pub(crate) store: Arc<PersistenceStore>,
    pub(crate) locals: Arc<LocalStore>,
    pub(crate) session: WeakSession,
}

/// The same accessor twice: typed for `Owner::attr`, erased for everything else.
#[derive(Clone)]
pub(crate) struct AttrEntry {
    pub(crate) typed: Arc<dyn Any + Send + Sync>,
    pub(crate) erased: Arc<dyn Attribute>,
}

// Implementations

impl<H: Host, T: Value> Accessor<H, T> {
    pub(crate) fn new(meta: AttrMeta, binding: Binding<H, T>, ctx: AccessorContext<H>) -> Self {
        Self {
            meta,
            binding,
            ctx,
            dirty: AtomicBool::new(false),
            persisted: AtomicBool::new(false),
            dependents: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self) -> T {
        self.binding
            .read(&self.ctx.host, &self.ctx.locals, &self.meta.key, |payload| {
                let session = self
                    .ctx
                    .session
                    .upgrade()
                    .ok_or_else(|| anyhow!("session has ended"))?;
                T::decode(payload, &session)
            })
    }

    pub fn set(&self, value: T) {
        self.binding
            .write(&self.ctx.host, &self.ctx.locals, &self.meta.key, value);
        self.mark_dirty();
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut value = self.get();
        f(&mut value);
        self.set(value);
    }

    pub fn host(&self) -> &HostRef<H> {
        &self.ctx.host
    }
}

impl<H: Host, T: Value> Attribute for Accessor<H, T> {
    fn name(&self) -> &str {
        self.meta.name
    }

    fn key(&self) -> &str {
        &self.meta.key
    }

    fn value_tag(&self) -> &str {
        &self.meta.value_tag
    }

    fn priority(&self) -> Priority {
        self.meta.priority
    }

    fn kind(&self) -> ValueKind {
        self.meta.kind
    }

    fn is_persistent(&self) -> bool {
        self.meta.persistent
    }

    fn is_serializable(&self) -> bool {
        self.meta.serializable
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn is_persisted(&self) -> bool {
        self.persisted.load(Ordering::Acquire)
    }

    fn mark_dirty(&self) {
        if self.ctx.store.is_applying() || self.dirty.swap(true, Ordering::AcqRel) {
            return;
        }

        trace!(key = %self.meta.key, "marked dirty");

        self.ctx.store.note_dirty(&self.meta.key);

        let dependents = locked(&self.dependents)
            .iter()
            .filter_map(Weak::upgrade)
            .collect::<Vec<_>>();

        for dependent in dependents {
            dependent.mark_dirty();
        }
    }

    fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    fn mark_persisted(&self) {
        self.persisted.store(true, Ordering::Release);
    }

    fn add_dependent(&self, dependent: Weak<dyn Attribute>) {
        let catch_up = self.is_dirty().then(|| dependent.upgrade()).flatten();

        locked(&self.dependents).push(dependent);

        if let Some(dependent) = catch_up {
            dependent.mark_dirty();
        }
    }

    fn encode(&self) -> anyhow::Result<String> {
        self.get().encode()
    }

    fn apply_encoded(&self, payload: &str, session: &Session) -> anyhow::Result<()> {
        let value = T::decode(payload, session)?;
        self.binding
            .write(&self.ctx.host, &self.ctx.locals, &self.meta.key, value);

        Ok(())
    }
}

impl<H: Host, T: Value> Binding<H, T> {
    pub(crate) fn read(
        &self,
        host: &RwLock<H>,
        locals: &LocalStore,
        key: &str,
        decode: impl FnOnce(&str) -> anyhow::Result<T>,
    ) -> T {
        match self {
            Binding::Slot(slot) => (slot.get)(&*read(host)),
            Binding::Delegate { get, .. } => get(&*read(host)),
            Binding::Local(seed) => locals.get_or_init(key, || seed.clone(), decode),
        }
    }

    pub(crate) fn write(&self, host: &RwLock<H>, locals: &LocalStore, key: &str, value: T) {
        match self {
            Binding::Slot(slot) => (slot.set)(&mut *write(host), value),
            Binding::Delegate { set, .. } => set(&mut *write(host), value),
            Binding::Local(_) => locals.set(key, value),
        }
    }
}

impl<H, T: Clone> Clone for Binding<H, T> {
    fn clone(&self) -> Self {
        match self {
            Binding::Slot(slot) => Binding::Slot(*slot),
            Binding::Delegate { get, set } => Binding::Delegate {
                get: get.clone(),
                set: set.clone(),
            },
            Binding::Local(seed) => Binding::Local(seed.clone()),
        }
    }
}

impl AttrEntry {
    pub(crate) fn new<H: Host, T: Value>(accessor: Accessor<H, T>) -> Self {
        let accessor = Arc::new(accessor);

        Self {
            typed: accessor.clone(),
            erased: accessor,
        }
    }

    pub(crate) fn downcast<H: Host, T: Value>(&self) -> Option<Arc<Accessor<H, T>>> {
        self.typed.clone().downcast::<Accessor<H, T>>().ok()
    }
}
