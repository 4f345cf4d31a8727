//! Versioned schema migrations
//!
//! Table setup handles the per-type schemas; migrations cover everything
//! else a deployment accumulates (seed rows, auxiliary tables, manual
//! repairs). Applied versions are tracked in a `schema_migrations` table so
//! a migration runs once per database.

use crate::core::database::Database;
use crate::core::error::{DatabaseError, Result};
use crate::core::statement::Statement;
use chrono::Utc;
use tracing::info;

/// A single schema migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Monotonic version; applied in ascending order
    pub version: i64,
    /// Human-readable label recorded alongside the version
    pub name: String,
    /// Command applying the migration
    pub up: String,
    /// Command reverting the migration, when reversible
    pub down: Option<String>,
}

impl Migration {
    /// An irreversible migration
    pub fn new(version: i64, name: impl Into<String>, up: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            up: up.into(),
            down: None,
        }
    }

    /// A reversible migration
    pub fn reversible(
        version: i64,
        name: impl Into<String>,
        up: impl Into<String>,
        down: impl Into<String>,
    ) -> Self {
        Self {
            version,
            name: name.into(),
            up: up.into(),
            down: Some(down.into()),
        }
    }
}

/// Applies migrations in version order and records what ran
#[derive(Debug, Default)]
pub struct MigrationManager {
    migrations: Vec<Migration>,
}

impl MigrationManager {
    /// Create a manager with no migrations
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a migration, keeping the list sorted by version
    pub fn add(&mut self, migration: Migration) -> Result<()> {
        if self.migrations.iter().any(|m| m.version == migration.version) {
            return Err(DatabaseError::migration(format!(
                "duplicate migration version {}",
                migration.version
            )));
        }
        self.migrations.push(migration);
        self.migrations.sort_by_key(|m| m.version);
        Ok(())
    }

    /// The registered migrations, in version order
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Ensure the tracking table exists
    pub async fn ensure_table(&self, db: &dyn Database) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({} BIGINT PRIMARY KEY, {} VARCHAR(128), {} VARCHAR(32))",
            db.quote_identifier("schema_migrations"),
            db.quote_identifier("version"),
            db.quote_identifier("name"),
            db.quote_identifier("applied_at")
        );
        db.execute_raw(&sql).await?;
        Ok(())
    }

    /// Versions already applied to this database
    pub async fn applied_versions(&self, db: &dyn Database) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            db.quote_identifier("version"),
            db.quote_identifier("schema_migrations"),
            db.quote_identifier("version")
        );
        let statement = Statement::prepare(sql);
        let mut rows = db.query_statement(&statement).await?;
        let mut versions = Vec::with_capacity(rows.len());
        while rows.next().is_some() {
            versions.push(rows.get::<i64>("version")?);
        }
        Ok(versions)
    }

    /// Apply every migration not yet recorded, returning how many ran
    pub async fn migrate_up(&self, db: &dyn Database) -> Result<usize> {
        self.ensure_table(db).await?;
        let applied = self.applied_versions(db).await?;
        let mut ran = 0;
        for migration in &self.migrations {
            if applied.contains(&migration.version) {
                continue;
            }
            db.execute_raw(&migration.up).await.map_err(|e| {
                DatabaseError::migration(format!(
                    "migration {} '{}' failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            self.record(db, migration).await?;
            info!(version = migration.version, name = %migration.name, "applied migration");
            ran += 1;
        }
        Ok(ran)
    }

    /// Revert the most recently applied migration
    pub async fn rollback_last(&self, db: &dyn Database) -> Result<Option<i64>> {
        self.ensure_table(db).await?;
        let applied = self.applied_versions(db).await?;
        let last = match applied.last() {
            Some(v) => *v,
            None => return Ok(None),
        };
        let migration = self
            .migrations
            .iter()
            .find(|m| m.version == last)
            .ok_or_else(|| {
                DatabaseError::migration(format!("applied version {last} is not registered"))
            })?;
        let down = migration.down.as_ref().ok_or_else(|| {
            DatabaseError::migration(format!("migration {last} '{}' is irreversible", migration.name))
        })?;

        db.execute_raw(down).await?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = :version",
            db.quote_identifier("schema_migrations"),
            db.quote_identifier("version")
        );
        let mut statement = Statement::prepare(sql);
        statement.bind("version", last)?;
        db.execute_statement(&statement).await?;
        info!(version = last, "rolled back migration");
        Ok(Some(last))
    }

    async fn record(&self, db: &dyn Database, migration: &Migration) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({}, {}, {}) VALUES (:version, :name, :applied_at)",
            db.quote_identifier("schema_migrations"),
            db.quote_identifier("version"),
            db.quote_identifier("name"),
            db.quote_identifier("applied_at")
        );
        let mut statement = Statement::prepare(sql);
        statement.bind("version", migration.version)?;
        statement.bind("name", migration.name.as_str())?;
        statement.bind("applied_at", Utc::now().to_rfc3339())?;
        db.execute_statement(&statement).await?;
        Ok(())
    }
}
