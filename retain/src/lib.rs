extern crate self as retain;

pub mod accessor;
pub mod adapter;
pub mod base;
pub mod codec;
pub mod config;
pub mod errors;
pub mod host;
pub mod identity;
pub mod local;
pub mod owner;
pub mod registry;
pub mod schema;
pub mod session;
pub mod slot;
pub mod store;
pub mod value;

#[doc(hidden)]
pub mod __private {
    pub use anyhow;
    pub use inventory;
}

// Re-exports

pub mod prelude {
    pub use crate::accessor::{Accessor, Attribute};
    pub use crate::adapter::SaveLoadAdapter;
    pub use crate::config::AdapterConfig;
    pub use crate::errors::ConfigError;
    pub use crate::host::{Host, HostDirectory, HostRef, MemoryDirectory, SlotTable};
    pub use crate::owner::{AnyOwner, Owner, OwnerId};
    pub use crate::registry::Model;
    pub use crate::schema::{Priority, SchemaBuilder};
    pub use crate::session::Session;
    pub use crate::slot::{MemorySlot, SaveSlot};
    pub use crate::value::{Json, Ref, Text, Value, ValueKind};

    #[cfg(feature = "macros")]
    pub use retain_macros::{EnumValue, Host};
}
