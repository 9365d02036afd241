//! Global configuration document and profile management.
//!
//! # Responsibility
//! - Own the on-disk YAML document: user identity, analytics opt-in,
//!   version stamp, profile map and the active-profile pointer.
//! - Migrate documents written by older releases and reject documents
//!   written by newer ones.
//! - Resolve per-field environment overrides at read time.
//!
//! # Invariants
//! - `user_id` is allocated once and never rewritten afterwards.
//! - A loaded configuration always contains at least one profile.
//! - Environment overrides affect reads only; the stored document is
//!   never mutated by an override.
//! - Every field write synchronously rewrites the whole document.

use crate::model::profile::{Profile, StoreType};
use crate::store::{self, StoreError};
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;
use walkdir::WalkDir;

/// File name of the configuration document inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Pre-YAML document written by early releases, read once and migrated.
pub const LEGACY_CONFIG_FILE_NAME: &str = ".stackyard.json";

/// Name of the profile created when a configuration has none.
pub const DEFAULT_PROFILE_NAME: &str = "default";

/// Prefix of per-field environment overrides, e.g.
/// `STACKYARD_ANALYTICS_OPT_IN`.
pub const CONFIG_ENV_PREFIX: &str = "STACKYARD_";

/// Environment variable overriding the default config directory.
pub const CONFIG_DIR_ENV: &str = "STACKYARD_CONFIG_PATH";

const PROFILES_DIR: &str = "profiles";

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration error taxonomy.
#[derive(Debug)]
pub enum ConfigError {
    ProfileNotFound(String),
    /// No active profile pointer is set.
    NoActiveProfile,
    /// A version stamp is not a `major.minor.patch` triple.
    InvalidVersion(String),
    /// The document was written by a newer release.
    NewerConfigVersion {
        stored: String,
        running: String,
    },
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Json(serde_json::Error),
    Store(StoreError),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProfileNotFound(name) => {
                write!(f, "no profile configured with name '{name}'")
            }
            Self::NoActiveProfile => write!(f, "no active profile is configured"),
            Self::InvalidVersion(value) => {
                write!(f, "'{value}' is not a valid major.minor.patch version")
            }
            Self::NewerConfigVersion { stored, running } => write!(
                f,
                "the configuration was written by version {stored}, newer than the \
                 running version {running}; refusing to load it"
            ),
            Self::Io(err) => write!(f, "{err}"),
            Self::Yaml(err) => write!(f, "{err}"),
            Self::Json(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Yaml(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Yaml(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<StoreError> for ConfigError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Release version triple, ordered numerically per component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Version(u64, u64, u64);

impl Version {
    fn parse(value: &str) -> Option<Version> {
        let mut parts = value.trim().splitn(3, '.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        Some(Version(major, minor, patch))
    }
}

fn running_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Serialized form of the configuration document.
///
/// Unknown fields from documents written by other versions are ignored
/// on read and dropped on the next write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ConfigDocument {
    user_id: Uuid,
    #[serde(default = "default_opt_in")]
    analytics_opt_in: bool,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    active_profile_name: Option<String>,
    #[serde(default)]
    profiles: BTreeMap<String, Profile>,
}

fn default_opt_in() -> bool {
    true
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            user_id: Uuid::new_v4(),
            analytics_opt_in: true,
            version: None,
            active_profile_name: None,
            profiles: BTreeMap::new(),
        }
    }
}

/// Global configuration rooted at one config directory.
#[derive(Debug)]
pub struct GlobalConfig {
    config_dir: PathBuf,
    doc: ConfigDocument,
}

static GLOBAL: OnceCell<Mutex<GlobalConfig>> = OnceCell::new();

impl GlobalConfig {
    /// Loads (or initializes) the configuration rooted at `config_dir`.
    ///
    /// Reads the YAML document when present, falls back to the legacy
    /// JSON document, else starts from defaults. The document is written
    /// back when it did not exist yet or when migration changed it, so
    /// the allocated `user_id` is durable after the first load.
    pub fn load(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let config_file = config_dir.join(CONFIG_FILE_NAME);
        let legacy_file = config_dir.join(LEGACY_CONFIG_FILE_NAME);

        let (doc, existed) = if config_file.is_file() {
            let text = std::fs::read_to_string(&config_file)?;
            (serde_yaml::from_str(&text)?, true)
        } else if legacy_file.is_file() {
            info!(
                "event=config_legacy_migrate module=config file={}",
                legacy_file.display()
            );
            let text = std::fs::read_to_string(&legacy_file)?;
            (serde_json::from_str(&text)?, false)
        } else {
            (ConfigDocument::default(), false)
        };

        let mut config = Self { config_dir, doc };
        let mut changed = config.migrate()?;
        changed |= config.ensure_default_profile()?;
        if changed || !existed {
            config.write()?;
        }
        debug!(
            "event=config_load module=config dir={} profiles={}",
            config.config_dir.display(),
            config.doc.profiles.len()
        );
        Ok(config)
    }

    /// Process-wide configuration handle, loaded from the default config
    /// directory on first access.
    pub fn global() -> ConfigResult<&'static Mutex<GlobalConfig>> {
        GLOBAL.get_or_try_init(|| Ok(Mutex::new(Self::load(default_config_dir())?)))
    }

    /// Directory this configuration is rooted at.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Storage directory owned by one profile.
    pub fn profile_dir(&self, name: &str) -> PathBuf {
        self.config_dir.join(PROFILES_DIR).join(name)
    }

    // Field accessors; each consults its environment override first.

    pub fn user_id(&self) -> Uuid {
        resolve_env_override("user_id", |raw| Uuid::parse_str(raw).ok())
            .unwrap_or(self.doc.user_id)
    }

    pub fn analytics_opt_in(&self) -> bool {
        resolve_env_override("analytics_opt_in", parse_bool)
            .unwrap_or(self.doc.analytics_opt_in)
    }

    pub fn version(&self) -> Option<String> {
        resolve_env_override("version", |raw| {
            Version::parse(raw).map(|_| raw.to_string())
        })
        .or_else(|| self.doc.version.clone())
    }

    pub fn active_profile_name(&self) -> Option<String> {
        resolve_env_override("active_profile_name", |raw| Some(raw.to_string()))
            .or_else(|| self.doc.active_profile_name.clone())
    }

    pub fn set_analytics_opt_in(&mut self, opt_in: bool) -> ConfigResult<()> {
        self.doc.analytics_opt_in = opt_in;
        self.write()
    }

    // Profile operations.

    /// Adds a new profile or updates an existing one.
    ///
    /// A profile without a url gets the default local url derived from
    /// its storage directory. For a new name the storage directory is
    /// created and the backend store is opened once so its on-disk state
    /// exists before the profile is ever activated.
    pub fn add_or_update_profile(&mut self, profile: &Profile) -> ConfigResult<Profile> {
        let mut profile = profile.clone();
        let profile_dir = self.profile_dir(&profile.name);
        if profile.url.is_none() {
            profile.url = Some(store::default_local_url(profile.store_type, &profile_dir));
        }

        let is_new = !self.doc.profiles.contains_key(&profile.name);
        if is_new {
            std::fs::create_dir_all(&profile_dir)?;
            if let Some(url) = &profile.url {
                store::open_store(profile.store_type, url)?;
            }
            info!(
                "event=profile_registered module=config name={} store_type={}",
                profile.name, profile.store_type
            );
        }

        self.doc
            .profiles
            .insert(profile.name.clone(), profile.clone());
        self.write()?;
        Ok(profile)
    }

    /// Fetches one profile; absence is not an error.
    pub fn get_profile(&self, name: &str) -> Option<&Profile> {
        self.doc.profiles.get(name)
    }

    /// All configured profiles.
    pub fn profiles(&self) -> &BTreeMap<String, Profile> {
        &self.doc.profiles
    }

    /// Points the active-profile pointer at an existing profile.
    pub fn activate_profile(&mut self, name: &str) -> ConfigResult<()> {
        if !self.doc.profiles.contains_key(name) {
            return Err(ConfigError::ProfileNotFound(name.to_string()));
        }
        self.doc.active_profile_name = Some(name.to_string());
        self.write()?;
        info!("event=profile_activated module=config name={name}");
        Ok(())
    }

    /// Deletes a profile and its owned storage directory.
    ///
    /// Deleting the active profile is allowed; activating a replacement
    /// is the caller's responsibility and reads through the dangling
    /// pointer fail with `ProfileNotFound` until then.
    pub fn delete_profile(&mut self, name: &str) -> ConfigResult<()> {
        if self.doc.profiles.remove(name).is_none() {
            return Err(ConfigError::ProfileNotFound(name.to_string()));
        }
        let profile_dir = self.profile_dir(name);
        if profile_dir.is_dir() {
            std::fs::remove_dir_all(&profile_dir)?;
        }
        self.write()?;
        info!("event=profile_deleted module=config name={name}");
        Ok(())
    }

    /// Resolves the active profile.
    pub fn active_profile(&self) -> ConfigResult<Profile> {
        let name = self
            .active_profile_name()
            .ok_or(ConfigError::NoActiveProfile)?;
        self.get_profile(&name)
            .cloned()
            .ok_or(ConfigError::ProfileNotFound(name))
    }

    /// Exports this configuration to `target_dir`, reduced to the active
    /// profile.
    ///
    /// The active profile's storage directory is duplicated under the
    /// target and the exported profile url is rewritten so it resolves
    /// under `load_dir` (the directory the export will be loaded from,
    /// `target_dir` when they coincide).
    pub fn export_with_active_profile(
        &self,
        target_dir: &Path,
        load_dir: Option<&Path>,
    ) -> ConfigResult<()> {
        let active = self.active_profile()?;
        let load_dir = load_dir.unwrap_or(target_dir);

        let mut exported = GlobalConfig {
            config_dir: target_dir.to_path_buf(),
            doc: self.doc.clone(),
        };
        exported.doc.profiles = BTreeMap::new();

        let source_storage = self.profile_dir(&active.name);
        let target_storage = exported.profile_dir(&active.name);
        if source_storage.is_dir() {
            copy_tree(&source_storage, &target_storage)?;
        }

        let mut profile = active.clone();
        if let Some(url) = &profile.url {
            let source_prefix = self.config_dir.display().to_string();
            let load_prefix = load_dir.display().to_string();
            profile.url = Some(url.replacen(&source_prefix, &load_prefix, 1));
        }
        exported
            .doc
            .profiles
            .insert(profile.name.clone(), profile.clone());
        exported.doc.active_profile_name = Some(profile.name);
        exported.write()?;
        info!(
            "event=config_export module=config target={}",
            target_dir.display()
        );
        Ok(())
    }

    fn migrate(&mut self) -> ConfigResult<bool> {
        let running = running_version();
        let running_parsed = Version::parse(running)
            .ok_or_else(|| ConfigError::InvalidVersion(running.to_string()))?;

        let stored = match &self.doc.version {
            None => {
                self.doc.version = Some(running.to_string());
                return Ok(true);
            }
            Some(stored) => stored.clone(),
        };
        let stored_parsed =
            Version::parse(&stored).ok_or_else(|| ConfigError::InvalidVersion(stored.clone()))?;

        if stored_parsed > running_parsed {
            return Err(ConfigError::NewerConfigVersion {
                stored,
                running: running.to_string(),
            });
        }
        if stored_parsed < running_parsed {
            info!(
                "event=config_migrate module=config from={stored} to={running}"
            );
            self.doc.version = Some(running.to_string());
            return Ok(true);
        }
        Ok(false)
    }

    /// Guarantees at least one profile; creates and activates the local
    /// default when the map is empty.
    fn ensure_default_profile(&mut self) -> ConfigResult<bool> {
        if !self.doc.profiles.is_empty() {
            return Ok(false);
        }
        let profile_dir = self.profile_dir(DEFAULT_PROFILE_NAME);
        std::fs::create_dir_all(&profile_dir)?;
        let url = store::default_local_url(StoreType::Local, &profile_dir);
        store::open_store(StoreType::Local, &url)?;

        let profile = Profile::with_url(DEFAULT_PROFILE_NAME, StoreType::Local, url);
        self.doc.profiles.insert(profile.name.clone(), profile);
        self.doc.active_profile_name = Some(DEFAULT_PROFILE_NAME.to_string());
        info!("event=profile_registered module=config name={DEFAULT_PROFILE_NAME} status=default");
        Ok(true)
    }

    fn write(&self) -> ConfigResult<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        let text = serde_yaml::to_string(&self.doc)?;
        std::fs::write(self.config_dir.join(CONFIG_FILE_NAME), text)?;
        Ok(())
    }
}

/// Resolves one per-field environment override.
///
/// A set and parseable `STACKYARD_<FIELD>` value wins for the current
/// read only; unset or unparseable values fall back to the stored one.
fn resolve_env_override<T>(field: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let variable = format!("{CONFIG_ENV_PREFIX}{}", field.to_uppercase());
    let raw = std::env::var(&variable).ok()?;
    match parse(&raw) {
        Some(value) => Some(value),
        None => {
            warn!(
                "event=config_env_override module=config status=unparseable variable={variable}"
            );
            None
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Default config directory: `STACKYARD_CONFIG_PATH`, else
/// `$XDG_CONFIG_HOME/stackyard`, else `$HOME/.config/stackyard`.
pub fn default_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("stackyard");
    }
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".config").join("stackyard"),
        Err(_) => PathBuf::from(".stackyard"),
    }
}

fn copy_tree(source: &Path, target: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination)?;
        } else {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{parse_bool, Version};

    #[test]
    fn version_parse_accepts_triples_only() {
        assert_eq!(Version::parse("0.4.0"), Some(Version(0, 4, 0)));
        assert_eq!(Version::parse("12.0.3"), Some(Version(12, 0, 3)));
        assert_eq!(Version::parse("0.4"), None);
        assert_eq!(Version::parse("0.4.x"), None);
        assert_eq!(Version::parse(""), None);
    }

    #[test]
    fn version_ordering_is_numeric() {
        assert!(Version::parse("0.10.0") > Version::parse("0.9.9"));
        assert!(Version::parse("1.0.0") > Version::parse("0.99.99"));
    }

    #[test]
    fn bool_override_accepts_common_spellings() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("False"), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("yes"), None);
    }
}
