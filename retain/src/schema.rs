use std::{
    any::TypeId,
    borrow::Cow,
    fmt::Display,
    sync::{Arc, RwLock},
};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    accessor::{Accessor, AccessorContext, AttrEntry, AttrMeta, Binding},
    errors::ConfigError,
    host::Host,
    session::Session,
    value::{Value, ValueKind},
};

/// Restore order; lower values are applied first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

/// Validated attribute table of one model, built once per registry.
pub struct Schema<H: Host> {
    pub(crate) decls: Vec<AttrDecl<H>>,
    index: FxHashMap<&'static str, usize>,
}

pub struct AttrDecl<H: Host> {
    name: &'static str,
    value_tag: Cow<'static, str>,
    value_type: TypeId,
    kind: ValueKind,
    priority: Priority,
    persistent: bool,
    serializable: bool,
    depends_on: Vec<&'static str>,
    // Edges resolved at build, as declaration indices.
    pub(crate) dependencies: Vec<usize>,
    pub(crate) dependents: Vec<usize>,
    pub(crate) binding: Box<dyn DeclBinding<H>>,
}

pub struct SchemaBuilder<H: Host> {
    decls: Vec<AttrDecl<H>>,
    errors: Vec<ConfigError>,
}

/// Chained flags of the attribute just declared. A declaration that already
/// failed (e.g. missing slot) swallows them; the error surfaces at build.
pub struct DeclBuilder<'a, H: Host> {
    decl: Option<&'a mut AttrDecl<H>>,
}

pub(crate) trait DeclBinding<H: Host>: Send + Sync {
    fn instantiate(&self, meta: AttrMeta, ctx: AccessorContext<H>) -> AttrEntry;

    /// Eager pass write, no accessor involved.
    fn apply_direct(
        &self,
        host: &RwLock<H>,
        key: &str,
        payload: &str,
        session: &Session,
    ) -> anyhow::Result<()>;
}

// Implementations

impl Priority {
    pub const HIGH: Self = Self(0);
    pub const NORMAL: Self = Self(500);
    pub const LOW: Self = Self(750);
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl<H: Host> Schema<H> {
    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn decl(&self, index: usize) -> Option<&AttrDecl<H>> {
        self.decls.get(index)
    }

    pub fn get(&self, name: &str) -> Option<&AttrDecl<H>> {
        self.decl(self.index_of(name)?)
    }

    pub fn decls(&self) -> impl Iterator<Item = &AttrDecl<H>> {
        self.decls.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.decls.iter().map(|decl| decl.name)
    }
}

impl<H: Host> AttrDecl<H> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn value_tag(&self) -> &str {
        &self.value_tag
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn is_serializable(&self) -> bool {
        self.serializable
    }

    pub fn depends_on(&self) -> &[&'static str] {
        &self.depends_on
    }

    pub(crate) fn holds<T: Value>(&self) -> bool {
        self.value_type == TypeId::of::<T>()
    }

    pub(crate) fn conflict<T: Value>(&self) -> ConfigError {
        ConfigError::TypeConflict {
            attr: self.name.to_owned(),
            declared: self.value_tag.clone(),
            requested: T::type_tag(),
        }
    }

    pub(crate) fn meta(&self, key: String) -> AttrMeta {
        AttrMeta {
            name: self.name,
            key,
            value_tag: self.value_tag.clone(),
            kind: self.kind,
            priority: self.priority,
            persistent: self.persistent,
            serializable: self.serializable,
        }
    }
}

impl<H: Host> SchemaBuilder<H> {
    pub fn new() -> Self {
        Self {
            decls: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Binds to the host slot of the same name.
    pub fn slot<T: Value>(&mut self, name: &'static str) -> DeclBuilder<'_, H> {
        self.slot_as::<T>(name, name)
    }

    pub fn slot_as<T: Value>(&mut self, name: &'static str, slot: &str) -> DeclBuilder<'_, H> {
        match H::slots().typed::<T>(slot) {
            Ok(slot) => self.push(name, Binding::Slot(slot)),
            Err(err) => {
                self.errors.push(err);
                DeclBuilder { decl: None }
            }
        }
    }

    pub fn delegate<T: Value>(
        &mut self,
        name: &'static str,
        get: impl Fn(&H) -> T + Send + Sync + 'static,
        set: impl Fn(&mut H, T) + Send + Sync + 'static,
    ) -> DeclBuilder<'_, H> {
        self.push(
            name,
            Binding::Delegate {
                get: Arc::new(get),
                set: Arc::new(set),
            },
        )
    }

    /// Process-local value, seeded with `initial` on first read.
    pub fn local<T: Value>(&mut self, name: &'static str, initial: T) -> DeclBuilder<'_, H> {
        self.push(name, Binding::Local(initial))
    }

    fn push<T: Value>(&mut self, name: &'static str, binding: Binding<H, T>) -> DeclBuilder<'_, H> {
        self.decls.push(AttrDecl {
            name,
            value_tag: T::type_tag(),
            value_type: TypeId::of::<T>(),
            kind: T::KIND,
            priority: Priority::NORMAL,
            persistent: true,
            serializable: true,
            depends_on: Vec::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            binding: Box::new(binding),
        });

        DeclBuilder {
            decl: self.decls.last_mut(),
        }
    }

    pub fn build(self) -> Result<Schema<H>, ConfigError> {
        let Self { mut decls, errors } = self;

        if let Some(err) = errors.into_iter().next() {
            return Err(err);
        }

        let mut index = FxHashMap::default();
        for (i, decl) in decls.iter().enumerate() {
            if decl.name.is_empty() || decl.name.contains(':') {
                return Err(ConfigError::InvalidName(decl.name.to_owned()));
            }

            if index.insert(decl.name, i).is_some() {
                return Err(ConfigError::DuplicateAttribute(decl.name.to_owned()));
            }
        }

        let mut edges = Vec::new();
        for (i, decl) in decls.iter().enumerate() {
            for dependency in &decl.depends_on {
                let Some(&from) = index.get(dependency) else {
                    return Err(ConfigError::UnknownDependency {
                        attr: decl.name.to_owned(),
                        dependency: (*dependency).to_owned(),
                    });
                };
                edges.push((from, i));
            }
        }

        for (from, to) in edges {
            decls[from].dependents.push(to);
            decls[to].dependencies.push(from);
        }

        Ok(Schema { decls, index })
    }
}

impl<H: Host> Default for SchemaBuilder<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Host> DeclBuilder<'_, H> {
    pub fn priority(mut self, priority: impl Into<Priority>) -> Self {
        if let Some(decl) = self.decl.as_deref_mut() {
            decl.priority = priority.into();
        }
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        if let Some(decl) = self.decl.as_deref_mut() {
            decl.persistent = persistent;
        }
        self
    }

    pub fn serializable(mut self, serializable: bool) -> Self {
        if let Some(decl) = self.decl.as_deref_mut() {
            decl.serializable = serializable;
        }
        self
    }

    /// Marks this attribute dirty whenever one of `names` becomes dirty.
    pub fn depends_on(mut self, names: impl IntoIterator<Item = &'static str>) -> Self {
        if let Some(decl) = self.decl.as_deref_mut() {
            decl.depends_on.extend(names);
        }
        self
    }
}

impl<H: Host, T: Value> DeclBinding<H> for Binding<H, T> {
    fn instantiate(&self, meta: AttrMeta, ctx: AccessorContext<H>) -> AttrEntry {
        AttrEntry::new(Accessor::new(meta, self.clone(), ctx))
    }

    fn apply_direct(
        &self,
        host: &RwLock<H>,
        key: &str,
        payload: &str,
        session: &Session,
    ) -> anyhow::Result<()> {
        let value = T::decode(payload, session)?;
        self.write(host, session.locals(), key, value);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use super::*;
    use crate::host::SlotTable;

    struct Keep {
        id: String,
        gold: i32,
        name: String,
    }

    impl Host for Keep {
        const TYPE_TAG: &'static str = "Keep";

        fn host_id(&self) -> &str {
            &self.id
        }

        fn slots() -> &'static SlotTable<Self> {
            static SLOTS: LazyLock<SlotTable<Keep>> = LazyLock::new(|| {
                SlotTable::<Keep>::new()
                    .with::<i32>("gold", |keep| keep.gold, |keep, value| keep.gold = value)
                    .with::<String>(
                        "name",
                        |keep| keep.name.clone(),
                        |keep, value| keep.name = value,
                    )
            });
            &SLOTS
        }
    }

    #[test]
    fn test_defaults() {
        let mut builder = SchemaBuilder::<Keep>::new();
        builder.slot::<i32>("gold");
        let schema = builder.build().unwrap();

        let decl = schema.get("gold").unwrap();
        assert_eq!(decl.priority(), Priority::NORMAL);
        assert!(decl.is_persistent());
        assert!(decl.is_serializable());
        assert_eq!(decl.value_tag(), "i32");
        assert_eq!(decl.kind(), ValueKind::Scalar);
    }

    #[test]
    fn test_missing_slot() {
        let mut builder = SchemaBuilder::<Keep>::new();
        builder.slot::<i32>("silver").priority(Priority::HIGH);

        assert_eq!(
            builder.build().err(),
            Some(ConfigError::MissingSlot {
                host: "Keep",
                slot: "silver".to_owned()
            })
        );
    }

    #[test]
    fn test_slot_type_mismatch() {
        let mut builder = SchemaBuilder::<Keep>::new();
        builder.slot::<u64>("gold");

        assert!(matches!(
            builder.build(),
            Err(ConfigError::SlotTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_duplicate_and_invalid_names() {
        let mut builder = SchemaBuilder::<Keep>::new();
        builder.slot::<i32>("gold");
        builder.local::<i32>("gold", 0);
        assert_eq!(
            builder.build().err(),
            Some(ConfigError::DuplicateAttribute("gold".to_owned()))
        );

        let mut builder = SchemaBuilder::<Keep>::new();
        builder.local::<i32>("a:b", 0);
        assert_eq!(
            builder.build().err(),
            Some(ConfigError::InvalidName("a:b".to_owned()))
        );
    }

    #[test]
    fn test_dependency_edges() {
        let mut builder = SchemaBuilder::<Keep>::new();
        builder.local::<i32>("upkeep", 0).depends_on(["gold", "name"]);
        builder.slot::<i32>("gold");
        builder.slot::<String>("name");
        let schema = builder.build().unwrap();

        let upkeep = schema.index_of("upkeep").unwrap();
        let gold = schema.index_of("gold").unwrap();
        assert_eq!(schema.decl(upkeep).unwrap().dependencies, vec![gold, 2]);
        assert_eq!(schema.decl(gold).unwrap().dependents, vec![upkeep]);
    }

    #[test]
    fn test_unknown_dependency() {
        let mut builder = SchemaBuilder::<Keep>::new();
        builder.local::<i32>("upkeep", 0).depends_on(["silver"]);

        assert_eq!(
            builder.build().err(),
            Some(ConfigError::UnknownDependency {
                attr: "upkeep".to_owned(),
                dependency: "silver".to_owned()
            })
        );
    }
}
