///! SQLite persistence layer
///!
///! Stores host connection records, the per-category host cache, and the
///! port-mapping snapshots. Cache writes are delete-then-insert inside one
///! transaction: a category for a host is either the old set or the new
///! set, never a mix.

pub mod migrations;

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use switchyard_common::{HostConfig, PortMapping, Result};

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (and create if missing) the database at the given URL.
    pub async fn new(database_url: &str) -> Result<Self> {
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            if let Some(parent) = Path::new(path).parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    switchyard_common::Error::System(format!(
                        "Failed to create DB directory: {}",
                        e
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| {
                switchyard_common::Error::System(format!("Invalid database URL: {}", e))
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await
            .map_err(|e| {
                switchyard_common::Error::System(format!("Database connection failed: {}", e))
            })?;

        tracing::info!("Database connection established");

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await?;
        tracing::info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // Host config operations

    pub async fn list_hosts(&self) -> Result<Vec<HostConfig>> {
        hosts::list_hosts(&self.pool).await
    }

    pub async fn get_host(&self, name: &str) -> Result<HostConfig> {
        hosts::get_host(&self.pool, name).await
    }

    pub async fn create_host(&self, host: &HostConfig) -> Result<()> {
        hosts::create_host(&self.pool, host).await
    }

    pub async fn delete_host(&self, name: &str) -> Result<()> {
        hosts::delete_host(&self.pool, name).await
    }

    // Cache operations

    pub async fn put_cache(
        &self,
        host_id: &str,
        category: &str,
        data: &serde_json::Value,
    ) -> Result<()> {
        cache::put(&self.pool, host_id, category, data).await
    }

    pub async fn get_cache(&self, host_id: &str, category: &str) -> Result<Option<cache::Entry>> {
        cache::get(&self.pool, host_id, category).await
    }

    pub async fn invalidate_cache(&self, host_id: &str, category: &str) -> Result<bool> {
        cache::invalidate(&self.pool, host_id, category).await
    }

    // Port mapping operations

    pub async fn save_port_mapping(&self, mapping: &PortMapping) -> Result<()> {
        mappings::save(&self.pool, mapping).await
    }

    pub async fn load_port_mapping(&self, host_id: &str) -> Result<Option<PortMapping>> {
        mappings::load(&self.pool, host_id).await
    }

    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("Database connection closed");
    }
}

/// Host connection record operations
pub mod hosts {
    use super::*;
    use sqlx::Row;

    pub async fn create_host(pool: &SqlitePool, host: &HostConfig) -> Result<()> {
        sqlx::query(
            "INSERT INTO host_configs (name, hostname, port, username, ssh_key_path, password, description)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&host.name)
        .bind(&host.hostname)
        .bind(host.port as i64)
        .bind(&host.username)
        .bind(&host.ssh_key_path)
        .bind(&host.password)
        .bind(&host.description)
        .execute(pool)
        .await
        .map_err(|e| switchyard_common::Error::System(format!("Failed to create host: {}", e)))?;

        Ok(())
    }

    pub async fn get_host(pool: &SqlitePool, name: &str) -> Result<HostConfig> {
        let row = sqlx::query("SELECT * FROM host_configs WHERE name = ?")
            .bind(name)
            .fetch_one(pool)
            .await
            .map_err(|_| switchyard_common::Error::HostNotFound(name.to_string()))?;

        Ok(row_to_host(&row))
    }

    pub async fn list_hosts(pool: &SqlitePool) -> Result<Vec<HostConfig>> {
        let rows = sqlx::query("SELECT * FROM host_configs ORDER BY name")
            .fetch_all(pool)
            .await
            .map_err(|e| {
                switchyard_common::Error::System(format!("Failed to list hosts: {}", e))
            })?;

        Ok(rows.iter().map(row_to_host).collect())
    }

    pub async fn delete_host(pool: &SqlitePool, name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM host_configs WHERE name = ?")
            .bind(name)
            .execute(pool)
            .await
            .map_err(|e| {
                switchyard_common::Error::System(format!("Failed to delete host: {}", e))
            })?;

        if result.rows_affected() == 0 {
            return Err(switchyard_common::Error::HostNotFound(name.to_string()));
        }

        Ok(())
    }

    fn row_to_host(row: &sqlx::sqlite::SqliteRow) -> HostConfig {
        let port: i64 = row.get("port");
        HostConfig {
            name: row.get("name"),
            hostname: row.get("hostname"),
            port: port as u16,
            username: row.get("username"),
            ssh_key_path: row.get("ssh_key_path"),
            password: row.get("password"),
            description: row.get("description"),
        }
    }
}

/// Per-category host cache operations
pub mod cache {
    use super::*;
    use chrono::{DateTime, Utc};
    use sqlx::Row;

    /// One cached category for a host.
    pub struct Entry {
        pub data: serde_json::Value,
        pub last_updated: DateTime<Utc>,
    }

    /// Replace the cached data for (host, category): delete the old rows,
    /// insert the new one, commit as a unit.
    pub async fn put(
        pool: &SqlitePool,
        host_id: &str,
        category: &str,
        data: &serde_json::Value,
    ) -> Result<()> {
        let payload = serde_json::to_string(data).map_err(|e| {
            switchyard_common::Error::System(format!("Failed to serialize cache data: {}", e))
        })?;

        let mut tx = pool.begin().await.map_err(|e| {
            switchyard_common::Error::System(format!("Failed to begin transaction: {}", e))
        })?;

        sqlx::query("DELETE FROM host_cache WHERE host_id = ? AND category = ?")
            .bind(host_id)
            .bind(category)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                switchyard_common::Error::System(format!("Failed to clear cache: {}", e))
            })?;

        sqlx::query(
            "INSERT INTO host_cache (host_id, category, data, last_updated) VALUES (?, ?, ?, ?)",
        )
        .bind(host_id)
        .bind(category)
        .bind(payload)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| switchyard_common::Error::System(format!("Failed to write cache: {}", e)))?;

        tx.commit().await.map_err(|e| {
            switchyard_common::Error::System(format!("Failed to commit cache write: {}", e))
        })?;

        Ok(())
    }

    pub async fn get(pool: &SqlitePool, host_id: &str, category: &str) -> Result<Option<Entry>> {
        let row = sqlx::query(
            "SELECT data, last_updated FROM host_cache WHERE host_id = ? AND category = ?",
        )
        .bind(host_id)
        .bind(category)
        .fetch_optional(pool)
        .await
        .map_err(|e| switchyard_common::Error::System(format!("Failed to read cache: {}", e)))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: String = row.get("data");
        let data = serde_json::from_str(&payload).map_err(|e| {
            switchyard_common::Error::System(format!("Corrupt cache entry: {}", e))
        })?;

        Ok(Some(Entry {
            data,
            last_updated: row.get("last_updated"),
        }))
    }

    /// Drop a category without refreshing it. Returns whether anything was
    /// actually deleted.
    pub async fn invalidate(pool: &SqlitePool, host_id: &str, category: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM host_cache WHERE host_id = ? AND category = ?")
            .bind(host_id)
            .bind(category)
            .execute(pool)
            .await
            .map_err(|e| {
                switchyard_common::Error::System(format!("Failed to invalidate cache: {}", e))
            })?;

        Ok(result.rows_affected() > 0)
    }
}

/// Port-mapping snapshot operations
pub mod mappings {
    use super::*;
    use sqlx::Row;

    /// Store a full snapshot, discarding whatever was there before. The old
    /// and new set never coexist.
    pub async fn save(pool: &SqlitePool, mapping: &PortMapping) -> Result<()> {
        let payload = serde_json::to_string(mapping).map_err(|e| {
            switchyard_common::Error::System(format!("Failed to serialize port mapping: {}", e))
        })?;

        let mut tx = pool.begin().await.map_err(|e| {
            switchyard_common::Error::System(format!("Failed to begin transaction: {}", e))
        })?;

        sqlx::query("DELETE FROM port_mappings WHERE host_id = ?")
            .bind(&mapping.host_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                switchyard_common::Error::System(format!("Failed to clear port mapping: {}", e))
            })?;

        sqlx::query("INSERT INTO port_mappings (host_id, data, last_updated) VALUES (?, ?, ?)")
            .bind(&mapping.host_id)
            .bind(payload)
            .bind(mapping.last_updated)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                switchyard_common::Error::System(format!("Failed to write port mapping: {}", e))
            })?;

        tx.commit().await.map_err(|e| {
            switchyard_common::Error::System(format!("Failed to commit port mapping: {}", e))
        })?;

        Ok(())
    }

    pub async fn load(pool: &SqlitePool, host_id: &str) -> Result<Option<PortMapping>> {
        let row = sqlx::query("SELECT data FROM port_mappings WHERE host_id = ?")
            .bind(host_id)
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                switchyard_common::Error::System(format!("Failed to read port mapping: {}", e))
            })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: String = row.get("data");
        let mapping = serde_json::from_str(&payload).map_err(|e| {
            switchyard_common::Error::System(format!("Corrupt port mapping entry: {}", e))
        })?;

        Ok(Some(mapping))
    }
}
