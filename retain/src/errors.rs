use std::borrow::Cow;

use thiserror::Error;

/// Declaration and access mistakes. Raised while building a schema or when an
/// accessor is requested; never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("attribute `{attr}` is declared as `{declared}` but was requested as `{requested}`")]
    TypeConflict {
        attr: String,
        declared: Cow<'static, str>,
        requested: Cow<'static, str>,
    },
    #[error("unknown attribute `{attr}` on `{owner}`")]
    UnknownAttribute { owner: &'static str, attr: String },
    #[error("host type `{host}` has no slot named `{slot}`")]
    MissingSlot { host: &'static str, slot: String },
    #[error("slot `{slot}` on `{host}` holds `{actual}`, not `{expected}`")]
    SlotTypeMismatch {
        host: &'static str,
        slot: String,
        expected: Cow<'static, str>,
        actual: Cow<'static, str>,
    },
    #[error("attribute `{0}` is declared twice")]
    DuplicateAttribute(String),
    #[error("attribute `{attr}` depends on undeclared `{dependency}`")]
    UnknownDependency { attr: String, dependency: String },
    #[error("invalid name `{0}`")]
    InvalidName(String),
    #[error("model `{0}` is already registered")]
    DuplicateModel(&'static str),
    #[error("model `{0}` is not registered in this session")]
    UnregisteredModel(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("missing envelope prefix")]
    MissingPrefix,
    #[error("malformed envelope: expected priority, codec and payload")]
    Malformed,
    #[error("invalid percent escape in `{0}`")]
    Escape(String),
}
