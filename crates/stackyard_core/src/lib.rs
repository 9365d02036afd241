//! Core persistence logic for Stackyard.
//! This crate is the single source of truth for stack, component and
//! profile invariants.

pub mod analytics;
pub mod config;
pub mod db;
pub mod environment;
pub mod logging;
pub mod model;
pub mod post_run;
pub mod registry;
pub mod repository;
pub mod store;

pub use analytics::{set_analytics_sink, AnalyticsEvent, AnalyticsSink};
pub use config::{ConfigError, ConfigResult, GlobalConfig, DEFAULT_PROFILE_NAME};
pub use environment::{step_is_running, StepExecutionScope};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::component::{
    ComponentRecord, ComponentType, StackConfiguration, StackWrapper, DEFAULT_STACK_NAME,
};
pub use model::profile::{Profile, StoreType};
pub use post_run::{MetadataReader, PipelineRunView, RunStatus};
pub use registry::{FlavorRegistry, RegistryError, StackComponent};
pub use repository::{Repository, RepositoryError, RepositoryResult};
pub use store::{
    LocalStackStore, SqlStackStore, StackStore, StoreError, StoreResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
