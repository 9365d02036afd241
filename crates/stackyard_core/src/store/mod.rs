//! Storage-agnostic stack store contract and shared algorithms.
//!
//! # Responsibility
//! - Define the backend primitives every stack store must provide.
//! - Implement register/deregister semantics once, on top of those
//!   primitives, identically for every backend.
//! - Resolve a profile to a concrete backend instance.
//!
//! # Invariants
//! - Stack names are unique per store; component (type, name) pairs are
//!   unique per store.
//! - Every component name referenced by a stack resolves to an existing
//!   component record.
//! - The active stack name references an existing stack.
//! - Re-registering an existing (type, name) succeeds only when identity
//!   tokens match; otherwise it is a conflict.
//!
//! Atomicity is bounded by the backend's own write/transaction mechanism;
//! no cross-process locking is provided.

use crate::db::DbError;
use crate::model::component::{
    ComponentPayloadError, ComponentRecord, ComponentType, StackConfiguration,
    StackValidationError, StackWrapper,
};
use crate::model::profile::{Profile, StoreType};
use log::debug;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

pub mod local;
pub mod sql;

pub use local::LocalStackStore;
pub use sql::SqlStackStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Stack store error taxonomy.
///
/// Lookup failures, duplicate registrations, referential-integrity
/// violations and backend configuration problems are separate variants so
/// callers can react to the class of failure without string matching.
#[derive(Debug)]
pub enum StoreError {
    StackNotFound(String),
    ComponentNotFound {
        kind: ComponentType,
        name: String,
    },
    /// No active stack name is configured for this store.
    NoActiveStack,
    StackExists(String),
    /// A different component already occupies this (type, name) slot.
    ComponentExists {
        kind: ComponentType,
        name: String,
    },
    /// The stack being deregistered is the active stack.
    ActiveStackDeregistration(String),
    /// The component being deregistered is still referenced by a stack.
    ComponentInUse {
        kind: ComponentType,
        name: String,
        stack: String,
    },
    InvalidStack(StackValidationError),
    /// The backend address is invalid or unreachable.
    InvalidUrl {
        store_type: StoreType,
        url: String,
    },
    /// Persisted store state failed to decode.
    Corrupt(String),
    Payload(ComponentPayloadError),
    Db(DbError),
    Io(std::io::Error),
}

impl StoreError {
    /// Lookup-by-name failure; never retried.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::StackNotFound(_) | Self::ComponentNotFound { .. } | Self::NoActiveStack
        )
    }

    /// "Already exists" failure on registration.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::StackExists(_) | Self::ComponentExists { .. })
    }

    /// Referential-integrity violation detected before any mutation.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::ActiveStackDeregistration(_)
                | Self::ComponentInUse { .. }
                | Self::InvalidStack(_)
        )
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StackNotFound(name) => write!(f, "no stack registered with name '{name}'"),
            Self::ComponentNotFound { kind, name } => {
                write!(f, "no {kind} component registered with name '{name}'")
            }
            Self::NoActiveStack => write!(f, "no active stack is configured for this store"),
            Self::StackExists(name) => {
                write!(f, "a stack with name '{name}' is already registered")
            }
            Self::ComponentExists { kind, name } => write!(
                f,
                "a different {kind} component with name '{name}' is already registered"
            ),
            Self::ActiveStackDeregistration(name) => {
                write!(f, "cannot deregister '{name}': it is the active stack")
            }
            Self::ComponentInUse { kind, name, stack } => write!(
                f,
                "cannot deregister {kind} component '{name}': referenced by stack '{stack}'"
            ),
            Self::InvalidStack(err) => write!(f, "{err}"),
            Self::InvalidUrl { store_type, url } => {
                write!(f, "invalid url for {store_type} store: {url}")
            }
            Self::Corrupt(message) => write!(f, "corrupt store state: {message}"),
            Self::Payload(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidStack(err) => Some(err),
            Self::Payload(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StackValidationError> for StoreError {
    fn from(value: StackValidationError) -> Self {
        Self::InvalidStack(value)
    }
}

impl From<ComponentPayloadError> for StoreError {
    fn from(value: ComponentPayloadError) -> Self {
        Self::Payload(value)
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Persistence contract shared by the file-based and relational backends.
///
/// Backends implement the required primitives; the register/deregister
/// algorithms are provided methods built once on top of them, so every
/// backend enforces the same uniqueness and referential-integrity rules.
pub trait StackStore: Send {
    // Backend primitives:

    /// Backend address this store was opened against.
    fn url(&self) -> &str;

    /// Name of the active stack.
    fn active_stack_name(&self) -> StoreResult<String>;

    /// Points the store-wide active-stack pointer at an existing stack.
    fn set_active_stack(&mut self, name: &str) -> StoreResult<()>;

    /// Fetches one stack's type-to-name configuration.
    fn stack_configuration(&self, name: &str) -> StoreResult<StackConfiguration>;

    /// Configurations of every registered stack.
    fn stack_configurations(&self) -> StoreResult<BTreeMap<String, StackConfiguration>>;

    /// Low-level component insert; fails when the (type, name) slot is
    /// taken, regardless of identity token.
    fn insert_component(&mut self, component: &ComponentRecord) -> StoreResult<()>;

    /// Persists one stack's type-to-name mapping.
    fn create_stack(&mut self, name: &str, configuration: &StackConfiguration) -> StoreResult<()>;

    /// Deletes one stack row (and backend-local association state).
    fn delete_stack(&mut self, name: &str) -> StoreResult<()>;

    /// Fetches the flavor and raw payload of one component.
    fn component_flavor_and_payload(
        &self,
        kind: ComponentType,
        name: &str,
    ) -> StoreResult<(String, Vec<u8>)>;

    /// Names of all registered components of one type.
    fn component_names(&self, kind: ComponentType) -> StoreResult<Vec<String>>;

    /// Deletes one component row and any backend-local payload storage.
    fn delete_component(&mut self, kind: ComponentType, name: &str) -> StoreResult<()>;

    // Shared algorithms (identical for every backend):

    /// All stacks with their full component records.
    fn stacks(&self) -> StoreResult<Vec<StackWrapper>> {
        let mut stacks = Vec::new();
        for (name, configuration) in self.stack_configurations()? {
            stacks.push(self.assemble_stack(&name, &configuration)?);
        }
        Ok(stacks)
    }

    /// Fetches one stack with its full component records.
    fn get_stack(&self, name: &str) -> StoreResult<StackWrapper> {
        let configuration = self.stack_configuration(name)?;
        self.assemble_stack(name, &configuration)
    }

    /// Fetches one component, decoding only its identity token.
    fn get_component(&self, kind: ComponentType, name: &str) -> StoreResult<ComponentRecord> {
        let (flavor, payload) = self.component_flavor_and_payload(kind, name)?;
        Ok(ComponentRecord::from_payload(kind, name, flavor, payload)?)
    }

    /// All registered components of one type.
    fn components(&self, kind: ComponentType) -> StoreResult<Vec<ComponentRecord>> {
        let mut records = Vec::new();
        for name in self.component_names(kind)? {
            records.push(self.get_component(kind, &name)?);
        }
        Ok(records)
    }

    /// Registers one component with identity-token semantics: a matching
    /// existing record is a no-op success, a differing one is a conflict.
    fn register_component(&mut self, component: &ComponentRecord) -> StoreResult<()> {
        match self.get_component(component.kind, &component.name) {
            Ok(existing) => {
                if existing.uuid == component.uuid {
                    debug!(
                        "event=component_register module=store status=noop type={} name={}",
                        component.kind, component.name
                    );
                    Ok(())
                } else {
                    Err(StoreError::ComponentExists {
                        kind: component.kind,
                        name: component.name.clone(),
                    })
                }
            }
            Err(StoreError::ComponentNotFound { .. }) => self.insert_component(component),
            Err(other) => Err(other),
        }
    }

    /// Registers a stack and any of its components not registered yet.
    ///
    /// Returns per-type flavor metadata for the caller's telemetry.
    fn register_stack(
        &mut self,
        stack: &StackWrapper,
    ) -> StoreResult<BTreeMap<ComponentType, String>> {
        let configuration = stack.configuration();
        configuration.validate()?;

        match self.stack_configuration(&stack.name) {
            Ok(_) => return Err(StoreError::StackExists(stack.name.clone())),
            Err(StoreError::StackNotFound(_)) => {}
            Err(other) => return Err(other),
        }

        for component in &stack.components {
            self.register_component(component)?;
        }
        self.create_stack(&stack.name, &configuration)?;

        Ok(stack
            .components
            .iter()
            .map(|component| (component.kind, component.flavor.clone()))
            .collect())
    }

    /// Deregisters a stack; the active stack cannot be deregistered.
    fn deregister_stack(&mut self, name: &str) -> StoreResult<()> {
        match self.active_stack_name() {
            Ok(active) if active == name => {
                return Err(StoreError::ActiveStackDeregistration(name.to_string()))
            }
            Ok(_) | Err(StoreError::NoActiveStack) => {}
            Err(other) => return Err(other),
        }
        self.delete_stack(name)
    }

    /// Deregisters a component unless any stack still references it.
    fn deregister_component(&mut self, kind: ComponentType, name: &str) -> StoreResult<()> {
        for (stack_name, configuration) in self.stack_configurations()? {
            if configuration.contains_component(kind, name) {
                return Err(StoreError::ComponentInUse {
                    kind,
                    name: name.to_string(),
                    stack: stack_name,
                });
            }
        }
        self.delete_component(kind, name)
    }

    /// Builds a stack wrapper from a stored configuration.
    fn assemble_stack(
        &self,
        name: &str,
        configuration: &StackConfiguration,
    ) -> StoreResult<StackWrapper> {
        let mut components = Vec::new();
        for (kind, component_name) in &configuration.components {
            components.push(self.get_component(*kind, component_name)?);
        }
        Ok(StackWrapper::new(name, components))
    }
}

/// Derives the default local backend address for a profile storage
/// directory.
pub fn default_local_url(store_type: StoreType, dir: &Path) -> String {
    match store_type {
        StoreType::Local => LocalStackStore::local_url(dir),
        StoreType::Sql => SqlStackStore::local_url(dir),
    }
}

/// Validates an address and opens the matching backend against it.
pub fn open_store(store_type: StoreType, url: &str) -> StoreResult<Box<dyn StackStore>> {
    match store_type {
        StoreType::Local => {
            if !LocalStackStore::is_valid_url(url) {
                return Err(StoreError::InvalidUrl {
                    store_type,
                    url: url.to_string(),
                });
            }
            Ok(Box::new(LocalStackStore::open(url)?))
        }
        StoreType::Sql => {
            if !SqlStackStore::is_valid_url(url) {
                return Err(StoreError::InvalidUrl {
                    store_type,
                    url: url.to_string(),
                });
            }
            Ok(Box::new(SqlStackStore::open(url)?))
        }
    }
}

/// Resolves a profile to a concrete store, deriving the default local
/// address from the profile storage directory when none is configured.
pub fn store_for_profile(profile: &Profile, profile_dir: &Path) -> StoreResult<Box<dyn StackStore>> {
    let url = match &profile.url {
        Some(url) => url.clone(),
        None => default_local_url(profile.store_type, profile_dir),
    };
    open_store(profile.store_type, &url)
}
