//! Flavor registry: explicit mapping from (component type, flavor) to a
//! component factory.
//!
//! # Responsibility
//! - Resolve stored (type, flavor) pairs to concrete component objects.
//! - Carry the builtin local flavors every fresh installation knows.
//!
//! # Invariants
//! - Registration of an already-taken (type, flavor) pair is rejected.
//! - Factories decode payloads themselves; the registry never inspects
//!   payload contents beyond handing them over.

use crate::model::component::{ComponentPayloadError, ComponentRecord, ComponentType};
use crate::post_run::{MetadataError, MetadataReader, PipelineRunView, RunStatus};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use uuid::Uuid;

/// Flavor tag of the builtin local orchestrator and artifact store.
pub const FLAVOR_LOCAL: &str = "local";
/// Flavor tag of the builtin sqlite metadata store.
pub const FLAVOR_SQLITE: &str = "sqlite";

/// Registry and factory errors.
#[derive(Debug)]
pub enum RegistryError {
    UnknownFlavor {
        kind: ComponentType,
        flavor: String,
    },
    DuplicateFlavor {
        kind: ComponentType,
        flavor: String,
    },
    /// The resolved component does not expose the requested collaborator
    /// interface.
    NotAMetadataStore {
        flavor: String,
    },
    Payload(ComponentPayloadError),
    /// The payload decoded as JSON but is missing a flavor-required field.
    MissingSetting {
        flavor: &'static str,
        field: &'static str,
    },
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownFlavor { kind, flavor } => {
                write!(f, "no {kind} implementation registered for flavor '{flavor}'")
            }
            Self::DuplicateFlavor { kind, flavor } => {
                write!(f, "a {kind} implementation for flavor '{flavor}' is already registered")
            }
            Self::NotAMetadataStore { flavor } => {
                write!(f, "component flavor '{flavor}' cannot serve pipeline run records")
            }
            Self::Payload(err) => write!(f, "{err}"),
            Self::MissingSetting { flavor, field } => {
                write!(f, "'{flavor}' component payload is missing setting `{field}`")
            }
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Payload(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ComponentPayloadError> for RegistryError {
    fn from(value: ComponentPayloadError) -> Self {
        Self::Payload(value)
    }
}

/// A materialized stack component.
pub trait StackComponent: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> ComponentType;
    fn name(&self) -> &str;
    fn flavor(&self) -> &str;
    fn identity_token(&self) -> Uuid;

    /// Metadata-store components that can serve post-execution records
    /// return themselves here.
    fn as_metadata_reader(&self) -> Option<&dyn MetadataReader> {
        None
    }
}

/// Builds one component object from its stored record.
pub type ComponentFactory =
    fn(&ComponentRecord) -> Result<Box<dyn StackComponent>, RegistryError>;

/// Explicit (type, flavor) to factory mapping, populated at startup and
/// queried when stored records need to become usable objects.
#[derive(Default)]
pub struct FlavorRegistry {
    factories: BTreeMap<(ComponentType, String), ComponentFactory>,
}

impl FlavorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the builtin local flavors.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        // Builtin registrations cannot collide in an empty registry.
        let _ = registry.register(ComponentType::Orchestrator, FLAVOR_LOCAL, local_orchestrator);
        let _ = registry.register(
            ComponentType::ArtifactStore,
            FLAVOR_LOCAL,
            local_artifact_store,
        );
        let _ = registry.register(
            ComponentType::MetadataStore,
            FLAVOR_SQLITE,
            sqlite_metadata_store,
        );
        registry
    }

    /// Registers one factory for a (type, flavor) pair.
    pub fn register(
        &mut self,
        kind: ComponentType,
        flavor: &str,
        factory: ComponentFactory,
    ) -> Result<(), RegistryError> {
        let key = (kind, flavor.to_string());
        if self.factories.contains_key(&key) {
            return Err(RegistryError::DuplicateFlavor {
                kind,
                flavor: flavor.to_string(),
            });
        }
        self.factories.insert(key, factory);
        Ok(())
    }

    /// Returns registered flavors for one component type, sorted.
    pub fn flavors(&self, kind: ComponentType) -> Vec<String> {
        self.factories
            .keys()
            .filter(|(registered_kind, _)| *registered_kind == kind)
            .map(|(_, flavor)| flavor.clone())
            .collect()
    }

    /// Builds a component object from a stored record.
    pub fn materialize(
        &self,
        record: &ComponentRecord,
    ) -> Result<Box<dyn StackComponent>, RegistryError> {
        let factory = self
            .factories
            .get(&(record.kind, record.flavor.clone()))
            .ok_or_else(|| RegistryError::UnknownFlavor {
                kind: record.kind,
                flavor: record.flavor.clone(),
            })?;
        factory(record)
    }
}

fn payload_object(
    record: &ComponentRecord,
) -> Result<serde_json::Map<String, serde_json::Value>, RegistryError> {
    let value: serde_json::Value = serde_json::from_slice(&record.payload)
        .map_err(|err| RegistryError::Payload(ComponentPayloadError::Malformed(err.to_string())))?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(RegistryError::Payload(ComponentPayloadError::Malformed(
            format!("expected JSON object, got {other}"),
        ))),
    }
}

fn string_setting(
    object: &serde_json::Map<String, serde_json::Value>,
    flavor: &'static str,
    field: &'static str,
) -> Result<String, RegistryError> {
    object
        .get(field)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or(RegistryError::MissingSetting { flavor, field })
}

/// Orchestrator running pipeline steps in the local process.
#[derive(Debug)]
struct LocalOrchestrator {
    name: String,
    uuid: Uuid,
}

impl StackComponent for LocalOrchestrator {
    fn kind(&self) -> ComponentType {
        ComponentType::Orchestrator
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn flavor(&self) -> &str {
        FLAVOR_LOCAL
    }

    fn identity_token(&self) -> Uuid {
        self.uuid
    }
}

fn local_orchestrator(
    record: &ComponentRecord,
) -> Result<Box<dyn StackComponent>, RegistryError> {
    Ok(Box::new(LocalOrchestrator {
        name: record.name.clone(),
        uuid: record.uuid,
    }))
}

/// Artifact store writing step outputs under a local directory.
#[derive(Debug)]
struct LocalArtifactStore {
    name: String,
    uuid: Uuid,
    #[allow(dead_code)]
    path: PathBuf,
}

impl StackComponent for LocalArtifactStore {
    fn kind(&self) -> ComponentType {
        ComponentType::ArtifactStore
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn flavor(&self) -> &str {
        FLAVOR_LOCAL
    }

    fn identity_token(&self) -> Uuid {
        self.uuid
    }
}

fn local_artifact_store(
    record: &ComponentRecord,
) -> Result<Box<dyn StackComponent>, RegistryError> {
    let object = payload_object(record)?;
    let path = string_setting(&object, FLAVOR_LOCAL, "path")?;
    Ok(Box::new(LocalArtifactStore {
        name: record.name.clone(),
        uuid: record.uuid,
        path: PathBuf::from(path),
    }))
}

/// Metadata store reading execution records from its own SQLite file.
#[derive(Debug)]
struct SqliteMetadataStore {
    name: String,
    uuid: Uuid,
    database: PathBuf,
}

impl SqliteMetadataStore {
    fn runs_table_exists(conn: &Connection) -> Result<bool, MetadataError> {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM sqlite_master
                WHERE type = 'table' AND name = 'pipeline_runs'
            );",
            [],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn parse_run(row: &rusqlite::Row<'_>) -> Result<PipelineRunView, MetadataError> {
        let status_text: String = row.get(2)?;
        let status = RunStatus::parse(&status_text).ok_or_else(|| {
            MetadataError::Corrupt(format!("unknown run status `{status_text}`"))
        })?;
        Ok(PipelineRunView {
            pipeline_name: row.get(0)?,
            run_name: row.get(1)?,
            status,
            finished_at_ms: row.get(3)?,
        })
    }
}

impl StackComponent for SqliteMetadataStore {
    fn kind(&self) -> ComponentType {
        ComponentType::MetadataStore
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn flavor(&self) -> &str {
        FLAVOR_SQLITE
    }

    fn identity_token(&self) -> Uuid {
        self.uuid
    }

    fn as_metadata_reader(&self) -> Option<&dyn MetadataReader> {
        Some(self)
    }
}

impl MetadataReader for SqliteMetadataStore {
    fn pipeline_runs(&self) -> Result<Vec<PipelineRunView>, MetadataError> {
        // A metadata database only appears once an execution engine has
        // recorded something; absence means no runs, not an error.
        if !self.database.is_file() {
            return Ok(Vec::new());
        }
        let conn = Connection::open(&self.database)?;
        if !Self::runs_table_exists(&conn)? {
            return Ok(Vec::new());
        }

        let mut stmt = conn.prepare(
            "SELECT pipeline_name, run_name, status, finished_at
             FROM pipeline_runs
             ORDER BY finished_at DESC, run_name ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut runs = Vec::new();
        while let Some(row) = rows.next()? {
            runs.push(Self::parse_run(row)?);
        }
        Ok(runs)
    }

    fn pipeline_run(&self, run_name: &str) -> Result<Option<PipelineRunView>, MetadataError> {
        Ok(self
            .pipeline_runs()?
            .into_iter()
            .find(|run| run.run_name == run_name))
    }
}

fn sqlite_metadata_store(
    record: &ComponentRecord,
) -> Result<Box<dyn StackComponent>, RegistryError> {
    let object = payload_object(record)?;
    let database = string_setting(&object, FLAVOR_SQLITE, "database")?;
    Ok(Box::new(SqliteMetadataStore {
        name: record.name.clone(),
        uuid: record.uuid,
        database: PathBuf::from(database),
    }))
}

#[cfg(test)]
mod tests {
    use super::{FlavorRegistry, RegistryError, FLAVOR_LOCAL, FLAVOR_SQLITE};
    use crate::model::component::{ComponentRecord, ComponentType};

    #[test]
    fn builtin_registry_materializes_default_flavors() {
        let registry = FlavorRegistry::builtin();
        let record = ComponentRecord::new(
            ComponentType::ArtifactStore,
            "default",
            FLAVOR_LOCAL,
            serde_json::json!({"path": "/tmp/artifacts"}),
        )
        .unwrap();

        let component = registry.materialize(&record).unwrap();
        assert_eq!(component.kind(), ComponentType::ArtifactStore);
        assert_eq!(component.flavor(), FLAVOR_LOCAL);
        assert_eq!(component.identity_token(), record.uuid);
        assert!(component.as_metadata_reader().is_none());
    }

    #[test]
    fn metadata_store_component_exposes_reader() {
        let registry = FlavorRegistry::builtin();
        let record = ComponentRecord::new(
            ComponentType::MetadataStore,
            "default",
            FLAVOR_SQLITE,
            serde_json::json!({"database": "/tmp/metadata.db"}),
        )
        .unwrap();

        let component = registry.materialize(&record).unwrap();
        assert!(component.as_metadata_reader().is_some());
    }

    #[test]
    fn unknown_flavor_is_rejected() {
        let registry = FlavorRegistry::builtin();
        let record = ComponentRecord::new(
            ComponentType::Orchestrator,
            "airflow",
            "airflow",
            serde_json::json!({}),
        )
        .unwrap();

        let err = registry.materialize(&record).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownFlavor { .. }));
    }

    #[test]
    fn duplicate_flavor_registration_is_rejected() {
        let mut registry = FlavorRegistry::builtin();
        let err = registry
            .register(
                ComponentType::Orchestrator,
                FLAVOR_LOCAL,
                super::local_orchestrator,
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateFlavor { .. }));
    }

    #[test]
    fn payload_missing_required_setting_is_rejected() {
        let registry = FlavorRegistry::builtin();
        let record = ComponentRecord::new(
            ComponentType::ArtifactStore,
            "default",
            FLAVOR_LOCAL,
            serde_json::json!({}),
        )
        .unwrap();

        let err = registry.materialize(&record).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::MissingSetting { field: "path", .. }
        ));
    }
}
