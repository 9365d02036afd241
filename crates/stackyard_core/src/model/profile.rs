//! Configuration profiles: named pointers to one storage backend.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Storage backend selector for a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Flat-file backend rooted at a local directory.
    Local,
    /// Relational backend reached through a database url.
    Sql,
}

impl StoreType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Sql => "sql",
        }
    }

    pub fn parse(value: &str) -> Option<StoreType> {
        match value {
            "local" => Some(Self::Local),
            "sql" => Some(Self::Sql),
            _ => None,
        }
    }
}

impl Default for StoreType {
    fn default() -> Self {
        Self::Local
    }
}

impl Display for StoreType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named pointer to one backend configuration.
///
/// The url is optional; when absent, a default local url is derived from
/// the profile's storage directory at resolution time. Unknown fields from
/// documents written by other versions are ignored on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub store_type: StoreType,
}

impl Profile {
    /// Creates a local-backend profile with a derived-on-demand url.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
            store_type: StoreType::Local,
        }
    }

    /// Creates a profile pointing at an explicit backend url.
    pub fn with_url(
        name: impl Into<String>,
        store_type: StoreType,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: Some(url.into()),
            store_type,
        }
    }
}
