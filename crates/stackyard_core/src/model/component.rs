//! Stack and component domain models.
//!
//! # Responsibility
//! - Define the canonical component record shared by both storage backends.
//! - Provide the stack-level mapping from component type to component name.
//!
//! # Invariants
//! - A component's identity token is embedded in its payload under `uuid`
//!   and never changes for the lifetime of the logical component.
//! - A stack maps each component type to at most one component name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use uuid::Uuid;

/// Name given to the stack and components seeded into an empty store.
pub const DEFAULT_STACK_NAME: &str = "default";

/// Payload key carrying the component identity token.
pub const IDENTITY_TOKEN_KEY: &str = "uuid";

/// Typed slot a component occupies inside a stack.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    /// Executes pipeline graphs.
    Orchestrator,
    /// Records pipeline and step executions.
    MetadataStore,
    /// Stores step output artifacts.
    ArtifactStore,
    /// Holds container images for remote execution.
    ContainerRegistry,
    /// Resolves secret references for other components.
    SecretsManager,
}

impl ComponentType {
    /// All known component types, in slot order.
    pub const ALL: &'static [ComponentType] = &[
        ComponentType::Orchestrator,
        ComponentType::MetadataStore,
        ComponentType::ArtifactStore,
        ComponentType::ContainerRegistry,
        ComponentType::SecretsManager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::MetadataStore => "metadata_store",
            Self::ArtifactStore => "artifact_store",
            Self::ContainerRegistry => "container_registry",
            Self::SecretsManager => "secrets_manager",
        }
    }

    /// Plural form used for per-type payload directories.
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrators",
            Self::MetadataStore => "metadata_stores",
            Self::ArtifactStore => "artifact_stores",
            Self::ContainerRegistry => "container_registries",
            Self::SecretsManager => "secrets_managers",
        }
    }

    pub fn parse(value: &str) -> Option<ComponentType> {
        match value {
            "orchestrator" => Some(Self::Orchestrator),
            "metadata_store" => Some(Self::MetadataStore),
            "artifact_store" => Some(Self::ArtifactStore),
            "container_registry" => Some(Self::ContainerRegistry),
            "secrets_manager" => Some(Self::SecretsManager),
            _ => None,
        }
    }
}

impl Display for ComponentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while building or decoding component payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentPayloadError {
    /// Payload bytes are not a JSON object.
    Malformed(String),
    /// Payload object carries no identity token.
    MissingIdentityToken,
    /// Identity token is present but not a valid UUID.
    InvalidIdentityToken(String),
}

impl Display for ComponentPayloadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(message) => write!(f, "malformed component payload: {message}"),
            Self::MissingIdentityToken => {
                write!(f, "component payload carries no `{IDENTITY_TOKEN_KEY}` token")
            }
            Self::InvalidIdentityToken(value) => {
                write!(f, "component payload token is not a uuid: {value}")
            }
        }
    }
}

impl Error for ComponentPayloadError {}

/// One registered component: a typed, named, flavored configuration unit.
///
/// The payload is opaque JSON; this core only decodes it far enough to read
/// the identity token. Full decoding is the flavor registry's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRecord {
    pub kind: ComponentType,
    pub name: String,
    pub flavor: String,
    /// Stable identity token distinguishing re-registration of the same
    /// logical component from a naming conflict.
    pub uuid: Uuid,
    /// JSON object bytes embedding the identity token.
    pub payload: Vec<u8>,
}

impl ComponentRecord {
    /// Creates a record with a freshly allocated identity token.
    ///
    /// `settings` must be a JSON object; the token is inserted under
    /// `uuid` before serialization.
    pub fn new(
        kind: ComponentType,
        name: impl Into<String>,
        flavor: impl Into<String>,
        settings: serde_json::Value,
    ) -> Result<Self, ComponentPayloadError> {
        Self::with_token(kind, name, flavor, Uuid::new_v4(), settings)
    }

    /// Creates a record with a caller-provided identity token.
    ///
    /// Used by re-registration paths where the logical component already
    /// exists elsewhere and must keep its identity.
    pub fn with_token(
        kind: ComponentType,
        name: impl Into<String>,
        flavor: impl Into<String>,
        uuid: Uuid,
        settings: serde_json::Value,
    ) -> Result<Self, ComponentPayloadError> {
        let mut object = match settings {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(ComponentPayloadError::Malformed(format!(
                    "expected JSON object, got {other}"
                )))
            }
        };
        object.insert(
            IDENTITY_TOKEN_KEY.to_string(),
            serde_json::Value::String(uuid.to_string()),
        );
        let payload = serde_json::to_vec(&serde_json::Value::Object(object))
            .map_err(|err| ComponentPayloadError::Malformed(err.to_string()))?;

        Ok(Self {
            kind,
            name: name.into(),
            flavor: flavor.into(),
            uuid,
            payload,
        })
    }

    /// Rebuilds a record from stored payload bytes, decoding only the
    /// identity token.
    pub fn from_payload(
        kind: ComponentType,
        name: impl Into<String>,
        flavor: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<Self, ComponentPayloadError> {
        let uuid = Self::identity_token(&payload)?;
        Ok(Self {
            kind,
            name: name.into(),
            flavor: flavor.into(),
            uuid,
            payload,
        })
    }

    /// Extracts the identity token from payload bytes.
    pub fn identity_token(payload: &[u8]) -> Result<Uuid, ComponentPayloadError> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|err| ComponentPayloadError::Malformed(err.to_string()))?;
        let token = value
            .get(IDENTITY_TOKEN_KEY)
            .and_then(serde_json::Value::as_str)
            .ok_or(ComponentPayloadError::MissingIdentityToken)?;
        Uuid::parse_str(token)
            .map_err(|_| ComponentPayloadError::InvalidIdentityToken(token.to_string()))
    }
}

/// Stack validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackValidationError {
    /// A required component slot is empty.
    MissingComponent(ComponentType),
}

impl Display for StackValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingComponent(kind) => {
                write!(f, "stack is missing a required {kind} component")
            }
        }
    }
}

impl Error for StackValidationError {}

/// Per-stack mapping from component type to registered component name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackConfiguration {
    pub components: BTreeMap<ComponentType, String>,
}

impl StackConfiguration {
    pub fn new(components: BTreeMap<ComponentType, String>) -> Self {
        Self { components }
    }

    pub fn component_name(&self, kind: ComponentType) -> Option<&str> {
        self.components.get(&kind).map(String::as_str)
    }

    pub fn contains_component(&self, kind: ComponentType, name: &str) -> bool {
        self.component_name(kind) == Some(name)
    }

    /// Checks that every required slot is filled.
    ///
    /// A stack must carry an orchestrator, a metadata store and an artifact
    /// store; the remaining slots are optional.
    pub fn validate(&self) -> Result<(), StackValidationError> {
        for kind in [
            ComponentType::Orchestrator,
            ComponentType::MetadataStore,
            ComponentType::ArtifactStore,
        ] {
            if !self.components.contains_key(&kind) {
                return Err(StackValidationError::MissingComponent(kind));
            }
        }
        Ok(())
    }
}

/// A named stack together with the full records of its components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackWrapper {
    pub name: String,
    pub components: Vec<ComponentRecord>,
}

impl StackWrapper {
    pub fn new(name: impl Into<String>, components: Vec<ComponentRecord>) -> Self {
        Self {
            name: name.into(),
            components,
        }
    }

    /// Returns the record occupying the given slot, if any.
    pub fn component(&self, kind: ComponentType) -> Option<&ComponentRecord> {
        self.components.iter().find(|record| record.kind == kind)
    }

    /// Projects this stack onto its type-to-name configuration.
    pub fn configuration(&self) -> StackConfiguration {
        StackConfiguration::new(
            self.components
                .iter()
                .map(|record| (record.kind, record.name.clone()))
                .collect(),
        )
    }

    /// Builds the default local stack seeded into empty stores: a local
    /// orchestrator, a local artifact store and a sqlite metadata store.
    pub fn default_local(base_dir: &Path) -> Result<Self, ComponentPayloadError> {
        let orchestrator = ComponentRecord::new(
            ComponentType::Orchestrator,
            DEFAULT_STACK_NAME,
            crate::registry::FLAVOR_LOCAL,
            serde_json::json!({}),
        )?;
        let artifact_store = ComponentRecord::new(
            ComponentType::ArtifactStore,
            DEFAULT_STACK_NAME,
            crate::registry::FLAVOR_LOCAL,
            serde_json::json!({
                "path": base_dir.join("artifacts").display().to_string(),
            }),
        )?;
        let metadata_store = ComponentRecord::new(
            ComponentType::MetadataStore,
            DEFAULT_STACK_NAME,
            crate::registry::FLAVOR_SQLITE,
            serde_json::json!({
                "database": base_dir.join("metadata.db").display().to_string(),
            }),
        )?;

        Ok(Self::new(
            DEFAULT_STACK_NAME,
            vec![orchestrator, artifact_store, metadata_store],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ComponentPayloadError, ComponentRecord, ComponentType, StackConfiguration,
        StackValidationError, StackWrapper,
    };
    use std::collections::BTreeMap;
    use std::path::Path;

    #[test]
    fn component_type_parse_matches_as_str() {
        for kind in ComponentType::ALL {
            assert_eq!(ComponentType::parse(kind.as_str()), Some(*kind));
        }
        assert_eq!(ComponentType::parse("step_operator"), None);
    }

    #[test]
    fn record_roundtrips_identity_token_through_payload() {
        let record = ComponentRecord::new(
            ComponentType::SecretsManager,
            "vault",
            "local",
            serde_json::json!({"mount": "/secrets"}),
        )
        .unwrap();

        let reloaded = ComponentRecord::from_payload(
            record.kind,
            record.name.clone(),
            record.flavor.clone(),
            record.payload.clone(),
        )
        .unwrap();
        assert_eq!(reloaded.uuid, record.uuid);
        assert_eq!(reloaded, record);
    }

    #[test]
    fn record_rejects_non_object_settings() {
        let err = ComponentRecord::new(
            ComponentType::Orchestrator,
            "default",
            "local",
            serde_json::json!([1, 2, 3]),
        )
        .unwrap_err();
        assert!(matches!(err, ComponentPayloadError::Malformed(_)));
    }

    #[test]
    fn identity_token_requires_uuid_value() {
        let missing = ComponentRecord::identity_token(br#"{"path": "/tmp"}"#).unwrap_err();
        assert_eq!(missing, ComponentPayloadError::MissingIdentityToken);

        let invalid = ComponentRecord::identity_token(br#"{"uuid": "not-a-uuid"}"#).unwrap_err();
        assert!(matches!(
            invalid,
            ComponentPayloadError::InvalidIdentityToken(_)
        ));
    }

    #[test]
    fn configuration_validation_requires_core_slots() {
        let mut components = BTreeMap::new();
        components.insert(ComponentType::Orchestrator, "default".to_string());
        components.insert(ComponentType::ArtifactStore, "default".to_string());
        let err = StackConfiguration::new(components.clone())
            .validate()
            .unwrap_err();
        assert_eq!(
            err,
            StackValidationError::MissingComponent(ComponentType::MetadataStore)
        );

        components.insert(ComponentType::MetadataStore, "default".to_string());
        assert!(StackConfiguration::new(components).validate().is_ok());
    }

    #[test]
    fn default_local_stack_fills_required_slots() {
        let stack = StackWrapper::default_local(Path::new("/tmp/profile")).unwrap();
        assert_eq!(stack.name, "default");
        assert!(stack.configuration().validate().is_ok());
        assert!(stack.component(ComponentType::ContainerRegistry).is_none());
    }
}
