//! Repository façade: the single entry point tying configuration, store
//! backends, the flavor registry and analytics together.
//!
//! # Responsibility
//! - Resolve the active profile to a concrete store backend.
//! - Seed an empty store with the default local stack.
//! - Emit one analytics event after each successful tracked operation.
//!
//! # Invariants
//! - Construction is rejected while a pipeline step is executing.
//! - Analytics emission never affects the outcome of the operation that
//!   produced it.

use crate::analytics::{track_event, AnalyticsEvent};
use crate::config::{ConfigError, GlobalConfig};
use crate::environment;
use crate::model::component::{
    ComponentRecord, ComponentType, StackConfiguration, StackValidationError, StackWrapper,
    DEFAULT_STACK_NAME,
};
use crate::post_run::{MetadataError, PipelineRunView};
use crate::registry::{FlavorRegistry, RegistryError};
use crate::store::{self, StackStore, StoreError};
use log::info;
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, PoisonError};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Repository error taxonomy.
#[derive(Debug)]
pub enum RepositoryError {
    /// Repository access from inside a pipeline-step execution scope.
    StepContextAccess,
    Config(ConfigError),
    Store(StoreError),
    Registry(RegistryError),
    Metadata(MetadataError),
}

impl Display for RepositoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StepContextAccess => write!(
                f,
                "the repository cannot be accessed while a pipeline step is \
                 executing; read configuration values before the step starts \
                 and pass them in as step inputs"
            ),
            Self::Config(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
            Self::Metadata(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepositoryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StepContextAccess => None,
            Self::Config(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Registry(err) => Some(err),
            Self::Metadata(err) => Some(err),
        }
    }
}

impl From<ConfigError> for RepositoryError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<StoreError> for RepositoryError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<RegistryError> for RepositoryError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

impl From<MetadataError> for RepositoryError {
    fn from(value: MetadataError) -> Self {
        Self::Metadata(value)
    }
}

static GLOBAL: OnceCell<Mutex<Repository>> = OnceCell::new();

/// Stack repository bound to the store of one profile.
pub struct Repository {
    store: Box<dyn StackStore>,
    analytics_enabled: bool,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("store", &self.store.url())
            .field("analytics_enabled", &self.analytics_enabled)
            .finish()
    }
}

impl Repository {
    /// Process-wide repository handle, built from the global
    /// configuration's active profile on first access.
    pub fn global() -> RepositoryResult<&'static Mutex<Repository>> {
        if environment::step_is_running() {
            return Err(RepositoryError::StepContextAccess);
        }
        GLOBAL.get_or_try_init(|| {
            let config = GlobalConfig::global()?
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Ok(Mutex::new(Self::new(&config)?))
        })
    }

    /// Builds an independent repository from one configuration's active
    /// profile.
    ///
    /// An empty store is seeded with the default local stack, which is
    /// then activated.
    pub fn new(config: &GlobalConfig) -> RepositoryResult<Self> {
        if environment::step_is_running() {
            return Err(RepositoryError::StepContextAccess);
        }

        let profile = config.active_profile()?;
        let profile_dir = config.profile_dir(&profile.name);
        let store = store::store_for_profile(&profile, &profile_dir)?;

        let mut repository = Self {
            store,
            analytics_enabled: config.analytics_opt_in(),
        };
        repository.seed_default_stack(&profile_dir)?;
        info!(
            "event=repository_open module=repository profile={} url={}",
            profile.name,
            repository.store.url()
        );
        Ok(repository)
    }

    fn seed_default_stack(&mut self, profile_dir: &std::path::Path) -> RepositoryResult<()> {
        if !self.store.stack_configurations()?.is_empty() {
            return Ok(());
        }
        let stack = StackWrapper::default_local(profile_dir).map_err(StoreError::from)?;
        self.store.register_stack(&stack)?;
        self.store.set_active_stack(DEFAULT_STACK_NAME)?;
        info!("event=repository_seeded module=repository stack={DEFAULT_STACK_NAME}");
        self.track(AnalyticsEvent::InitializedRepository, BTreeMap::new());
        Ok(())
    }

    fn track(&self, event: AnalyticsEvent, metadata: BTreeMap<String, String>) {
        if self.analytics_enabled {
            track_event(event, metadata);
        }
    }

    /// Backend address the repository operates against.
    pub fn store_url(&self) -> &str {
        self.store.url()
    }

    // Stack operations.

    pub fn stacks(&self) -> RepositoryResult<Vec<StackWrapper>> {
        Ok(self.store.stacks()?)
    }

    pub fn stack_configurations(
        &self,
    ) -> RepositoryResult<BTreeMap<String, StackConfiguration>> {
        Ok(self.store.stack_configurations()?)
    }

    pub fn get_stack(&self, name: &str) -> RepositoryResult<StackWrapper> {
        Ok(self.store.get_stack(name)?)
    }

    pub fn active_stack_name(&self) -> RepositoryResult<String> {
        Ok(self.store.active_stack_name()?)
    }

    pub fn active_stack(&self) -> RepositoryResult<StackWrapper> {
        let name = self.store.active_stack_name()?;
        Ok(self.store.get_stack(&name)?)
    }

    pub fn activate_stack(&mut self, name: &str) -> RepositoryResult<()> {
        self.store.set_active_stack(name)?;
        self.track(
            AnalyticsEvent::ActivatedStack,
            BTreeMap::from([("stack".to_string(), name.to_string())]),
        );
        Ok(())
    }

    pub fn register_stack(&mut self, stack: &StackWrapper) -> RepositoryResult<()> {
        let flavors = self.store.register_stack(stack)?;
        let metadata = flavors
            .into_iter()
            .map(|(kind, flavor)| (kind.as_str().to_string(), flavor))
            .collect();
        self.track(AnalyticsEvent::RegisteredStack, metadata);
        Ok(())
    }

    pub fn deregister_stack(&mut self, name: &str) -> RepositoryResult<()> {
        self.store.deregister_stack(name)?;
        self.track(AnalyticsEvent::DeregisteredStack, BTreeMap::new());
        Ok(())
    }

    // Component operations.

    pub fn get_components(&self, kind: ComponentType) -> RepositoryResult<Vec<ComponentRecord>> {
        Ok(self.store.components(kind)?)
    }

    pub fn get_component(
        &self,
        kind: ComponentType,
        name: &str,
    ) -> RepositoryResult<ComponentRecord> {
        Ok(self.store.get_component(kind, name)?)
    }

    pub fn register_component(&mut self, component: &ComponentRecord) -> RepositoryResult<()> {
        self.store.register_component(component)?;
        self.track(
            AnalyticsEvent::RegisteredStackComponent,
            BTreeMap::from([
                ("type".to_string(), component.kind.as_str().to_string()),
                ("flavor".to_string(), component.flavor.clone()),
            ]),
        );
        Ok(())
    }

    pub fn deregister_component(
        &mut self,
        kind: ComponentType,
        name: &str,
    ) -> RepositoryResult<()> {
        self.store.deregister_component(kind, name)?;
        self.track(
            AnalyticsEvent::DeregisteredStackComponent,
            BTreeMap::from([("type".to_string(), kind.as_str().to_string())]),
        );
        Ok(())
    }

    // Post-execution records, served by one stack's metadata store.

    fn metadata_store_component(
        &self,
        registry: &FlavorRegistry,
        stack_name: Option<&str>,
    ) -> RepositoryResult<Box<dyn crate::registry::StackComponent>> {
        let stack = match stack_name {
            Some(name) => self.store.get_stack(name)?,
            None => self.active_stack()?,
        };
        let record = stack
            .component(ComponentType::MetadataStore)
            .ok_or(StoreError::InvalidStack(
                StackValidationError::MissingComponent(ComponentType::MetadataStore),
            ))?;
        Ok(registry.materialize(record)?)
    }

    /// Recorded runs served by the named stack's metadata store, or the
    /// active stack's when no name is given.
    pub fn pipeline_runs(
        &self,
        registry: &FlavorRegistry,
        stack_name: Option<&str>,
    ) -> RepositoryResult<Vec<PipelineRunView>> {
        let component = self.metadata_store_component(registry, stack_name)?;
        let reader = component
            .as_metadata_reader()
            .ok_or_else(|| RegistryError::NotAMetadataStore {
                flavor: component.flavor().to_string(),
            })?;
        let runs = reader.pipeline_runs()?;
        self.track(AnalyticsEvent::FetchedPipelineRuns, BTreeMap::new());
        Ok(runs)
    }

    /// One recorded run by name, scoped like [`Repository::pipeline_runs`].
    pub fn pipeline_run(
        &self,
        registry: &FlavorRegistry,
        stack_name: Option<&str>,
        run_name: &str,
    ) -> RepositoryResult<Option<PipelineRunView>> {
        let component = self.metadata_store_component(registry, stack_name)?;
        let reader = component
            .as_metadata_reader()
            .ok_or_else(|| RegistryError::NotAMetadataStore {
                flavor: component.flavor().to_string(),
            })?;
        let run = reader.pipeline_run(run_name)?;
        self.track(AnalyticsEvent::FetchedPipelineRuns, BTreeMap::new());
        Ok(run)
    }
}
