pub mod adapter;
pub mod deps;
mod error;
pub mod index;
pub mod meta;
mod path;
pub mod registry;
pub mod settings;

pub use adapter::{
    overlay, Adapter, AsAny, Capabilities, Configurable, Contextual, Depender, Factory, Hydratable,
    ItemConfigurable,
};
pub use deps::{Fields, Tag};
pub use error::{Error, HookError, Result};
pub use index::{FileSystem, OsFs, SearchIndex};
pub use meta::{ContextOverrides, DepRef, MetaHeader, MetaLoader};
pub use registry::{Registry, RegistryBuilder};
pub use settings::{RegistrySettings, SettingsError, SettingsLoader};
