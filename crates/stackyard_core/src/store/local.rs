//! File-based stack store backend.
//!
//! # Responsibility
//! - Persist stacks and component registrations in one YAML index
//!   document, with one JSON payload file per component.
//!
//! # Invariants
//! - Every mutation rewrites the entire index document; there is no
//!   partial update and no optimistic concurrency check. Last writer wins.
//! - Component payload paths are deterministic: `<type-plural>/<name>.json`
//!   under the store root.

use crate::model::component::{ComponentRecord, ComponentType, StackConfiguration};
use crate::store::{StackStore, StoreError, StoreResult};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Index document file name under the store root.
pub const LOCAL_STORE_INDEX_FILE: &str = "stacks.yaml";

const LOCAL_URL_PREFIX: &str = "file://";

/// Durable index: active stack pointer, stack definitions and the
/// per-type component name-to-flavor registry.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    active_stack_name: Option<String>,
    #[serde(default)]
    stacks: BTreeMap<String, StackConfiguration>,
    #[serde(default)]
    components: BTreeMap<ComponentType, BTreeMap<String, String>>,
}

/// Stack store backed by a local directory.
#[derive(Debug)]
pub struct LocalStackStore {
    url: String,
    root: PathBuf,
    index: StoreIndex,
}

impl LocalStackStore {
    /// Opens a local store rooted at the directory the url points to,
    /// loading the index document when one exists.
    pub fn open(url: &str) -> StoreResult<Self> {
        let root = Self::path_from_url(url)?;
        let index_path = root.join(LOCAL_STORE_INDEX_FILE);

        let index = if index_path.is_file() {
            let raw = fs::read_to_string(&index_path)?;
            serde_yaml::from_str(&raw).map_err(|err| {
                StoreError::Corrupt(format!(
                    "index document {} failed to parse: {err}",
                    index_path.display()
                ))
            })?
        } else {
            StoreIndex::default()
        };

        Ok(Self {
            url: url.to_string(),
            root,
            index,
        })
    }

    /// Derives the local-backend url for a directory.
    pub fn local_url(path: &Path) -> String {
        format!("{LOCAL_URL_PREFIX}{}", path.display())
    }

    /// A local address is valid iff it points at an existing directory.
    pub fn is_valid_url(url: &str) -> bool {
        let path = Path::new(url.strip_prefix(LOCAL_URL_PREFIX).unwrap_or(url));
        path.is_dir()
    }

    fn path_from_url(url: &str) -> StoreResult<PathBuf> {
        if !Self::is_valid_url(url) {
            return Err(StoreError::InvalidUrl {
                store_type: crate::model::profile::StoreType::Local,
                url: url.to_string(),
            });
        }
        Ok(PathBuf::from(
            url.strip_prefix(LOCAL_URL_PREFIX).unwrap_or(url),
        ))
    }

    fn component_payload_path(&self, kind: ComponentType, name: &str) -> PathBuf {
        self.root.join(kind.plural()).join(format!("{name}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(LOCAL_STORE_INDEX_FILE)
    }

    fn write_index(&self) -> StoreResult<()> {
        let raw = serde_yaml::to_string(&self.index)
            .map_err(|err| StoreError::Corrupt(format!("index serialization failed: {err}")))?;
        fs::write(self.index_path(), raw)?;
        Ok(())
    }
}

impl StackStore for LocalStackStore {
    fn url(&self) -> &str {
        &self.url
    }

    fn active_stack_name(&self) -> StoreResult<String> {
        self.index
            .active_stack_name
            .clone()
            .ok_or(StoreError::NoActiveStack)
    }

    fn set_active_stack(&mut self, name: &str) -> StoreResult<()> {
        if !self.index.stacks.contains_key(name) {
            return Err(StoreError::StackNotFound(name.to_string()));
        }
        self.index.active_stack_name = Some(name.to_string());
        self.write_index()?;
        info!("event=stack_activated module=store backend=local name={name}");
        Ok(())
    }

    fn stack_configuration(&self, name: &str) -> StoreResult<StackConfiguration> {
        debug!("event=stack_fetch module=store backend=local name={name}");
        self.index
            .stacks
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::StackNotFound(name.to_string()))
    }

    fn stack_configurations(&self) -> StoreResult<BTreeMap<String, StackConfiguration>> {
        Ok(self.index.stacks.clone())
    }

    fn insert_component(&mut self, component: &ComponentRecord) -> StoreResult<()> {
        let components = self.index.components.entry(component.kind).or_default();
        if components.contains_key(&component.name) {
            return Err(StoreError::ComponentExists {
                kind: component.kind,
                name: component.name.clone(),
            });
        }

        let payload_path = self.component_payload_path(component.kind, &component.name);
        if let Some(parent) = payload_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&payload_path, &component.payload)?;

        self.index
            .components
            .entry(component.kind)
            .or_default()
            .insert(component.name.clone(), component.flavor.clone());
        self.write_index()?;
        info!(
            "event=component_registered module=store backend=local type={} name={}",
            component.kind, component.name
        );
        Ok(())
    }

    fn create_stack(&mut self, name: &str, configuration: &StackConfiguration) -> StoreResult<()> {
        self.index
            .stacks
            .insert(name.to_string(), configuration.clone());
        self.write_index()?;
        info!("event=stack_registered module=store backend=local name={name}");
        Ok(())
    }

    fn delete_stack(&mut self, name: &str) -> StoreResult<()> {
        if self.index.stacks.remove(name).is_none() {
            warn!(
                "event=stack_deregister module=store backend=local status=missing name={name}"
            );
            return Err(StoreError::StackNotFound(name.to_string()));
        }
        self.write_index()?;
        info!("event=stack_deregistered module=store backend=local name={name}");
        Ok(())
    }

    fn component_flavor_and_payload(
        &self,
        kind: ComponentType,
        name: &str,
    ) -> StoreResult<(String, Vec<u8>)> {
        let flavor = self
            .index
            .components
            .get(&kind)
            .and_then(|components| components.get(name))
            .cloned()
            .ok_or_else(|| StoreError::ComponentNotFound {
                kind,
                name: name.to_string(),
            })?;

        let payload = fs::read(self.component_payload_path(kind, name))?;
        Ok((flavor, payload))
    }

    fn component_names(&self, kind: ComponentType) -> StoreResult<Vec<String>> {
        Ok(self
            .index
            .components
            .get(&kind)
            .map(|components| components.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn delete_component(&mut self, kind: ComponentType, name: &str) -> StoreResult<()> {
        let removed = self
            .index
            .components
            .get_mut(&kind)
            .and_then(|components| components.remove(name));
        if removed.is_none() {
            warn!(
                "event=component_deregister module=store backend=local status=missing type={kind} name={name}"
            );
            return Err(StoreError::ComponentNotFound {
                kind,
                name: name.to_string(),
            });
        }
        self.write_index()?;

        let payload_path = self.component_payload_path(kind, name);
        if payload_path.is_file() {
            fs::remove_file(payload_path)?;
        }
        info!(
            "event=component_deregistered module=store backend=local type={kind} name={name}"
        );
        Ok(())
    }
}
