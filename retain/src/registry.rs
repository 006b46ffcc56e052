use std::{any::Any, sync::Arc};

use rustc_hash::FxHashMap;

use crate::{
    base::debug,
    codec::{Envelope, StoreKey},
    errors::ConfigError,
    host::{Host, downcast_host},
    owner::AnyOwner,
    schema::{Schema, SchemaBuilder},
    session::Session,
};

/// Declaration of one owner type: its tag, its host type and its attributes.
pub trait Model: Send + Sync + 'static {
    /// Prefix of every uid and store key of this model; must not contain `:` or `#`.
    const TYPE_TAG: &'static str;

    type Host: Host;

    fn declare(schema: &mut SchemaBuilder<Self::Host>);
}

/// Owner type tag → model, with schemas built and validated once.
#[derive(Default)]
pub struct ModelRegistry {
    models: FxHashMap<&'static str, Arc<dyn ErasedModel>>,
}

/// Link-time registration, submitted by `register_model!`.
pub struct RegisterModelFn(pub fn(&mut ModelRegistry) -> Result<(), ConfigError>);

inventory::collect!(RegisterModelFn);

pub(crate) enum EagerOutcome {
    Applied,
    Missing,
    Mismatch,
}

pub(crate) trait ErasedModel: Send + Sync {
    fn apply_eager(
        &self,
        session: &Session,
        key: &StoreKey,
        raw_key: &str,
        envelope: &Envelope,
    ) -> anyhow::Result<EagerOutcome>;

    fn lookup(&self, session: &Session, id: &str) -> Option<Arc<dyn AnyOwner>>;

    fn as_any(&self) -> &dyn Any;
}

pub(crate) struct ModelEntry<M: Model> {
    pub(crate) schema: Arc<Schema<M::Host>>,
}

/// Registers a model with every session built from the link-time registry.
#[macro_export]
macro_rules! register_model {
    ($model:ty) => {
        $crate::__private::inventory::submit! {
            $crate::registry::RegisterModelFn($crate::registry::register::<$model>)
        }
    };
}

#[doc(hidden)]
pub fn register<M: Model>(registry: &mut ModelRegistry) -> Result<(), ConfigError> {
    registry.register::<M>()
}

// Implementations

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every model submitted with `register_model!` in the final binary.
    pub fn linked() -> Result<Self, ConfigError> {
        let mut registry = Self::default();
        registry.extend_linked()?;

        Ok(registry)
    }

    pub fn extend_linked(&mut self) -> Result<(), ConfigError> {
        for register_model_fn in inventory::iter::<RegisterModelFn> {
            (register_model_fn.0)(self)?;
        }

        Ok(())
    }

    pub fn register<M: Model>(&mut self) -> Result<(), ConfigError> {
        let tag = M::TYPE_TAG;
        if tag.is_empty() || tag.contains([':', '#', '|']) {
            return Err(ConfigError::InvalidName(tag.to_owned()));
        }
        if self.models.contains_key(tag) {
            return Err(ConfigError::DuplicateModel(tag));
        }

        let mut builder = SchemaBuilder::new();
        M::declare(&mut builder);
        let schema = Arc::new(builder.build()?);

        debug!(model = tag, attributes = schema.len(), "registered model");
        self.models.insert(tag, Arc::new(ModelEntry::<M> { schema }));

        Ok(())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.models.contains_key(tag)
    }

    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags = self.models.keys().copied().collect::<Vec<_>>();
        tags.sort_unstable();
        tags
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn schema<M: Model>(&self) -> Result<Arc<Schema<M::Host>>, ConfigError> {
        self.models
            .get(M::TYPE_TAG)
            .and_then(|model| model.as_any().downcast_ref::<ModelEntry<M>>())
            .map(|entry| entry.schema.clone())
            .ok_or(ConfigError::UnregisteredModel(M::TYPE_TAG))
    }

    pub(crate) fn lookup(&self, tag: &str) -> Option<&Arc<dyn ErasedModel>> {
        self.models.get(tag)
    }
}

impl<M: Model> ErasedModel for ModelEntry<M> {
    fn apply_eager(
        &self,
        session: &Session,
        key: &StoreKey,
        raw_key: &str,
        envelope: &Envelope,
    ) -> anyhow::Result<EagerOutcome> {
        let Some(host) = session
            .directory()
            .resolve(<M::Host as Host>::TYPE_TAG, &key.host_id)
            .and_then(downcast_host::<M::Host>)
        else {
            return Ok(EagerOutcome::Missing);
        };

        let codec = envelope.codec.as_deref();

        if let Some(decl) = self.schema.get(&key.attr) {
            if decl.value_tag() != key.value_tag
                || codec.is_some_and(|codec| codec != decl.kind().codec_tag())
            {
                return Ok(EagerOutcome::Mismatch);
            }

            decl.binding
                .apply_direct(&host, raw_key, &envelope.payload, session)?;
            return Ok(EagerOutcome::Applied);
        }

        if let Some(slot) = <M::Host as Host>::slots().find(&key.attr) {
            if slot.value_tag() != key.value_tag
                || codec.is_some_and(|codec| codec != slot.kind().codec_tag())
            {
                return Ok(EagerOutcome::Mismatch);
            }

            slot.apply_encoded(&host, &envelope.payload, session)?;
            return Ok(EagerOutcome::Applied);
        }

        session
            .locals()
            .put_encoded(raw_key, &key.value_tag, &envelope.payload);
        Ok(EagerOutcome::Applied)
    }

    fn lookup(&self, session: &Session, id: &str) -> Option<Arc<dyn AnyOwner>> {
        match session.lookup::<M>(id) {
            Ok(owner) => owner.map(|owner| owner as Arc<dyn AnyOwner>),
            Err(_) => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
