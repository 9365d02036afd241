//! Persisted domain models shared by every storage backend.

pub mod component;
pub mod profile;

pub use component::{
    ComponentPayloadError, ComponentRecord, ComponentType, StackConfiguration,
    StackValidationError, StackWrapper,
};
pub use profile::{Profile, StoreType};
