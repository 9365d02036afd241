//! Relational stack store backend.
//!
//! # Responsibility
//! - Persist stacks, components and their associations as SQLite rows.
//! - Run every mutating operation in its own transaction.
//!
//! # Invariants
//! - Deleting a stack deletes its association rows in the same
//!   transaction; no cascade is assumed.
//! - The active-stack pointer lives in the singleton `store_config` row
//!   and only ever references an existing stack.
//!
//! Cross-process isolation is out of scope: two processes can both pass
//! an existence check before either writes. This check-then-act race is
//! accepted for the intended single-workstation usage.

use crate::db::{open_db, open_db_in_memory};
use crate::model::component::{ComponentRecord, ComponentType, StackConfiguration};
use crate::store::{StackStore, StoreError, StoreResult};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

const SQL_URL_PREFIX: &str = "sqlite://";

/// Database file name used for derived local addresses.
pub const SQL_STORE_FILE: &str = "stacks.db";

/// Stack store backed by a SQLite database.
#[derive(Debug)]
pub struct SqlStackStore {
    url: String,
    conn: Connection,
}

impl SqlStackStore {
    /// Opens (and migrates) the database the url points to.
    pub fn open(url: &str) -> StoreResult<Self> {
        let path = Self::path_from_url(url)?;
        debug!("event=sql_store_open module=store backend=sql url={url}");
        let conn = if path == ":memory:" {
            open_db_in_memory()?
        } else {
            open_db(path)?
        };
        Ok(Self {
            url: url.to_string(),
            conn,
        })
    }

    /// Derives a file-embedded database url for a directory.
    pub fn local_url(path: &Path) -> String {
        format!("{SQL_URL_PREFIX}{}/{SQL_STORE_FILE}", path.display())
    }

    /// A SQL address is valid iff it carries the url scheme and a
    /// non-empty database path.
    pub fn is_valid_url(url: &str) -> bool {
        url.strip_prefix(SQL_URL_PREFIX)
            .is_some_and(|path| !path.trim().is_empty())
    }

    fn path_from_url(url: &str) -> StoreResult<&str> {
        match url.strip_prefix(SQL_URL_PREFIX) {
            Some(path) if !path.trim().is_empty() => Ok(path),
            _ => Err(StoreError::InvalidUrl {
                store_type: crate::model::profile::StoreType::Sql,
                url: url.to_string(),
            }),
        }
    }

    fn stack_exists(conn: &Connection, name: &str) -> StoreResult<bool> {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM stacks WHERE name = ?1);",
            [name],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn parse_component_type(value: &str) -> StoreResult<ComponentType> {
        ComponentType::parse(value).ok_or_else(|| {
            StoreError::Corrupt(format!("unknown component type `{value}` in store row"))
        })
    }
}

impl StackStore for SqlStackStore {
    fn url(&self) -> &str {
        &self.url
    }

    fn active_stack_name(&self) -> StoreResult<String> {
        let active: Option<String> = self.conn.query_row(
            "SELECT active_stack FROM store_config WHERE id = 0;",
            [],
            |row| row.get(0),
        )?;
        active.ok_or(StoreError::NoActiveStack)
    }

    fn set_active_stack(&mut self, name: &str) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        if !Self::stack_exists(&tx, name)? {
            return Err(StoreError::StackNotFound(name.to_string()));
        }
        tx.execute(
            "UPDATE store_config SET active_stack = ?1 WHERE id = 0;",
            [name],
        )?;
        tx.commit()?;
        info!("event=stack_activated module=store backend=sql name={name}");
        Ok(())
    }

    fn stack_configuration(&self, name: &str) -> StoreResult<StackConfiguration> {
        debug!("event=stack_fetch module=store backend=sql name={name}");
        if !Self::stack_exists(&self.conn, name)? {
            return Err(StoreError::StackNotFound(name.to_string()));
        }

        let mut stmt = self.conn.prepare(
            "SELECT component_type, component_name
             FROM stack_definitions
             WHERE stack_name = ?1;",
        )?;
        let mut rows = stmt.query([name])?;
        let mut components = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let type_text: String = row.get(0)?;
            let component_name: String = row.get(1)?;
            components.insert(Self::parse_component_type(&type_text)?, component_name);
        }
        Ok(StackConfiguration::new(components))
    }

    fn stack_configurations(&self) -> StoreResult<BTreeMap<String, StackConfiguration>> {
        let mut stmt = self.conn.prepare("SELECT name FROM stacks ORDER BY name;")?;
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        let mut configurations = BTreeMap::new();
        for name in names {
            let configuration = self.stack_configuration(&name)?;
            configurations.insert(name, configuration);
        }
        Ok(configurations)
    }

    fn insert_component(&mut self, component: &ComponentRecord) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        let taken: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM components WHERE component_type = ?1 AND name = ?2;",
                params![component.kind.as_str(), component.name],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(StoreError::ComponentExists {
                kind: component.kind,
                name: component.name.clone(),
            });
        }

        tx.execute(
            "INSERT INTO components (component_type, name, flavor, payload)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                component.kind.as_str(),
                component.name,
                component.flavor,
                component.payload,
            ],
        )?;
        tx.commit()?;
        info!(
            "event=component_registered module=store backend=sql type={} name={}",
            component.kind, component.name
        );
        Ok(())
    }

    fn create_stack(&mut self, name: &str, configuration: &StackConfiguration) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO stacks (name, created_by) VALUES (?1, 'local');",
            [name],
        )?;
        for (kind, component_name) in &configuration.components {
            tx.execute(
                "INSERT INTO stack_definitions (stack_name, component_type, component_name)
                 VALUES (?1, ?2, ?3);",
                params![name, kind.as_str(), component_name],
            )?;
        }
        tx.commit()?;
        info!("event=stack_registered module=store backend=sql name={name}");
        Ok(())
    }

    fn delete_stack(&mut self, name: &str) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM stack_definitions WHERE stack_name = ?1;",
            [name],
        )?;
        let changed = tx.execute("DELETE FROM stacks WHERE name = ?1;", [name])?;
        if changed == 0 {
            return Err(StoreError::StackNotFound(name.to_string()));
        }
        tx.commit()?;
        info!("event=stack_deregistered module=store backend=sql name={name}");
        Ok(())
    }

    fn component_flavor_and_payload(
        &self,
        kind: ComponentType,
        name: &str,
    ) -> StoreResult<(String, Vec<u8>)> {
        self.conn
            .query_row(
                "SELECT flavor, payload FROM components
                 WHERE component_type = ?1 AND name = ?2;",
                params![kind.as_str(), name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| StoreError::ComponentNotFound {
                kind,
                name: name.to_string(),
            })
    }

    fn component_names(&self, kind: ComponentType) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM components WHERE component_type = ?1 ORDER BY name;",
        )?;
        let names = stmt
            .query_map([kind.as_str()], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(names)
    }

    fn delete_component(&mut self, kind: ComponentType, name: &str) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "DELETE FROM components WHERE component_type = ?1 AND name = ?2;",
            params![kind.as_str(), name],
        )?;
        if changed == 0 {
            return Err(StoreError::ComponentNotFound {
                kind,
                name: name.to_string(),
            });
        }
        tx.commit()?;
        info!(
            "event=component_deregistered module=store backend=sql type={kind} name={name}"
        );
        Ok(())
    }
}
