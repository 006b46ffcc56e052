use std::{
    any::Any,
    collections::BTreeMap,
    fmt::Display,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use crate::{
    accessor::{Accessor, AccessorContext, AttrEntry, Attribute},
    base::{debug, locked, warn},
    codec::escape,
    errors::ConfigError,
    host::HostRef,
    local::LocalStore,
    registry::Model,
    schema::Schema,
    session::{Session, WeakSession},
    store::PersistenceStore,
    value::Value,
};

const FRAGMENT_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OwnerId {
    /// Stable id of the host object.
    Host(String),
    /// Counter of a detached owner, unique within its session.
    Synthetic(u64),
}

/// The accessors of one logical entity, created lazily from its model's schema.
pub struct Owner<M: Model> {
    id: OwnerId,
    host: HostRef<M::Host>,
    schema: Arc<Schema<M::Host>>,
    attrs: Mutex<Vec<Option<AttrEntry>>>,
    store: Arc<PersistenceStore>,
    locals: Arc<LocalStore>,
    session: WeakSession,
}

/// Type-erased owner, as tracked by the identity cache and walked at save.
pub trait AnyOwner: Send + Sync {
    fn type_tag(&self) -> &'static str;

    fn uid(&self) -> String;

    fn attribute(&self, name: &str) -> Result<Arc<dyn Attribute>, ConfigError>;

    fn ensure_all(&self);

    fn is_dirty(&self) -> bool;

    fn serialize(&self) -> String;

    fn deserialize(&self, blob: &str) -> usize;

    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Serialize, Deserialize)]
struct Fragment {
    v: String,
    #[serde(rename = "type")]
    type_tag: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    attrs: BTreeMap<String, String>,
}

// Implementations

impl Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerId::Host(id) => write!(f, "{id}"),
            OwnerId::Synthetic(n) => write!(f, "#{n}"),
        }
    }
}

impl<M: Model> Owner<M> {
    pub(crate) fn new(
        id: OwnerId,
        host: HostRef<M::Host>,
        schema: Arc<Schema<M::Host>>,
        session: &Session,
    ) -> Self {
        let attrs = Mutex::new(vec![None; schema.len()]);

        Self {
            id,
            host,
            schema,
            attrs,
            store: session.store().clone(),
            locals: session.locals().clone(),
            session: session.downgrade(),
        }
    }

    pub fn id(&self) -> &OwnerId {
        &self.id
    }

    pub fn host(&self) -> &HostRef<M::Host> {
        &self.host
    }

    pub fn schema(&self) -> &Schema<M::Host> {
        &self.schema
    }

    pub fn is_detached(&self) -> bool {
        matches!(self.id, OwnerId::Synthetic(_))
    }

    /// `<owner tag>:<host id>`, or `<owner tag>#<n>` when detached.
    pub fn uid(&self) -> String {
        match &self.id {
            OwnerId::Host(id) => format!("{}:{id}", M::TYPE_TAG),
            OwnerId::Synthetic(n) => format!("{}#{n}", M::TYPE_TAG),
        }
    }

    pub(crate) fn key(&self, name: &str, value_tag: &str) -> String {
        match &self.id {
            OwnerId::Host(id) => format!("{}:{}:{name}:{value_tag}", M::TYPE_TAG, escape(id)),
            OwnerId::Synthetic(n) => format!("{}#{n}:{name}:{value_tag}", M::TYPE_TAG),
        }
    }

    /// Typed accessor for `name`, created on first request.
    pub fn attr<T: Value>(&self, name: &str) -> Result<Arc<Accessor<M::Host, T>>, ConfigError> {
        let index = self.index_of(name)?;
        let decl = &self.schema.decls[index];
        if !decl.holds::<T>() {
            return Err(decl.conflict::<T>());
        }

        self.entry(index)
            .downcast::<M::Host, T>()
            .ok_or_else(|| decl.conflict::<T>())
    }

    pub fn get<T: Value>(&self, name: &str) -> Result<T, ConfigError> {
        Ok(self.attr::<T>(name)?.get())
    }

    pub fn set<T: Value>(&self, name: &str, value: T) -> Result<(), ConfigError> {
        self.attr::<T>(name)?.set(value);
        Ok(())
    }

    pub fn attribute(&self, name: &str) -> Result<Arc<dyn Attribute>, ConfigError> {
        Ok(self.entry(self.index_of(name)?).erased)
    }

    pub fn ensure_all(&self) {
        for index in 0..self.schema.len() {
            self.entry(index);
        }
    }

    /// Any created accessor dirty.
    pub fn is_dirty(&self) -> bool {
        self.created().iter().any(|attr| attr.is_dirty())
    }

    /// Fragment of every serializable attribute that is dirty or was persisted
    /// before; empty when none qualifies.
    pub fn serialize(&self) -> String {
        self.ensure_all();

        let mut attrs = BTreeMap::new();
        for attr in self.created() {
            if !attr.is_serializable() || !(attr.is_dirty() || attr.is_persisted()) {
                continue;
            }

            match attr.encode() {
                Ok(payload) => {
                    attrs.insert(attr.name().to_owned(), payload);
                }
                Err(err) => {
                    warn!(
                        uid = %self.uid(),
                        attr = attr.name(),
                        %err,
                        "failed to serialize attribute"
                    );
                }
            }
        }

        if attrs.is_empty() {
            return String::new();
        }

        let fragment = Fragment {
            v: FRAGMENT_VERSION.to_owned(),
            type_tag: M::TYPE_TAG.to_owned(),
            id: self.id.to_string(),
            attrs,
        };

        serde_json::to_string(&fragment).unwrap_or_else(|err| {
            warn!(uid = %self.uid(), %err, "failed to render fragment");
            String::new()
        })
    }

    /// Applies a fragment in priority order, then declaration order. Unknown
    /// names are ignored. Returns the number of applied attributes.
    pub fn deserialize(&self, blob: &str) -> usize {
        let fragment = match serde_json::from_str::<Fragment>(blob) {
            Ok(fragment) => fragment,
            Err(err) => {
                warn!(uid = %self.uid(), %err, "malformed fragment");
                return 0;
            }
        };

        if fragment.v != FRAGMENT_VERSION || fragment.type_tag != M::TYPE_TAG {
            warn!(
                uid = %self.uid(),
                version = %fragment.v,
                owner = %fragment.type_tag,
                "fragment of another version or owner type"
            );
            return 0;
        }

        let Some(session) = self.session.upgrade() else {
            warn!(uid = %self.uid(), "session ended before fragment could be applied");
            return 0;
        };

        let mut pending = fragment
            .attrs
            .iter()
            .filter_map(|(name, payload)| match self.schema.index_of(name) {
                Some(index) => Some((index, payload)),
                None => {
                    debug!(uid = %self.uid(), attr = %name, "ignoring unknown attribute");
                    None
                }
            })
            .collect::<Vec<_>>();
        pending.sort_by_key(|(index, _)| (self.schema.decls[*index].priority(), *index));

        let _scope = self.store.begin_applying();
        let mut applied = 0;
        for (index, payload) in pending {
            let attr = self.entry(index).erased;
            match attr.apply_encoded(payload, &session) {
                Ok(()) => {
                    attr.mark_persisted();
                    applied += 1;
                }
                Err(err) => {
                    warn!(uid = %self.uid(), attr = attr.name(), %err, "failed to apply attribute");
                }
            }
        }

        applied
    }

    fn index_of(&self, name: &str) -> Result<usize, ConfigError> {
        self.schema
            .index_of(name)
            .ok_or_else(|| ConfigError::UnknownAttribute {
                owner: M::TYPE_TAG,
                attr: name.to_owned(),
            })
    }

    fn created(&self) -> Vec<Arc<dyn Attribute>> {
        locked(&self.attrs)
            .iter()
            .flatten()
            .map(|entry| entry.erased.clone())
            .collect()
    }

    fn entry(&self, index: usize) -> AttrEntry {
        let entry = {
            let mut attrs = locked(&self.attrs);
            if let Some(entry) = &attrs[index] {
                return entry.clone();
            }

            let decl = &self.schema.decls[index];
            let meta = decl.meta(self.key(decl.name(), decl.value_tag()));
            let entry = decl.binding.instantiate(
                meta,
                AccessorContext {
                    host: self.host.clone(),
                    store: self.store.clone(),
                    locals: self.locals.clone(),
                    session: self.session.clone(),
                },
            );
            attrs[index] = Some(entry.clone());
            entry
        };

        // Registration may decode references and wiring may mark dirty; both
        // run without the attribute lock.
        let session = self.session.upgrade();
        self.store.register(&entry.erased, session.as_ref());
        self.wire(index, &entry.erased);

        entry
    }

    /// Connects a new accessor to the already created ends of its edges.
    fn wire(&self, index: usize, attr: &Arc<dyn Attribute>) {
        let decl = &self.schema.decls[index];
        let (upstream, downstream) = {
            let attrs = locked(&self.attrs);
            let created = |indices: &[usize]| {
                indices
                    .iter()
                    .filter_map(|&i| attrs[i].as_ref().map(|entry| entry.erased.clone()))
                    .collect::<Vec<_>>()
            };
            (created(&decl.dependencies), created(&decl.dependents))
        };

        for dependency in upstream {
            dependency.add_dependent(Arc::downgrade(attr));
        }
        for dependent in downstream {
            attr.add_dependent(Arc::downgrade(&dependent));
        }
    }
}

impl<M: Model> AnyOwner for Owner<M> {
    fn type_tag(&self) -> &'static str {
        M::TYPE_TAG
    }

    fn uid(&self) -> String {
        Owner::uid(self)
    }

    fn attribute(&self, name: &str) -> Result<Arc<dyn Attribute>, ConfigError> {
        Owner::attribute(self, name)
    }

    fn ensure_all(&self) {
        Owner::ensure_all(self)
    }

    fn is_dirty(&self) -> bool {
        Owner::is_dirty(self)
    }

    fn serialize(&self) -> String {
        Owner::serialize(self)
    }

    fn deserialize(&self, blob: &str) -> usize {
        Owner::deserialize(self, blob)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
