///! Database migrations

use sqlx::SqlitePool;
use switchyard_common::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            executed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| {
        switchyard_common::Error::System(format!("Failed to create migrations table: {}", e))
    })?;

    run_migration(pool, "001_create_host_configs_table", MIGRATION_001_HOST_CONFIGS).await?;
    run_migration(pool, "002_create_host_cache_table", MIGRATION_002_HOST_CACHE).await?;
    run_migration(pool, "003_create_host_cache_index", MIGRATION_003_HOST_CACHE_INDEX).await?;
    run_migration(pool, "004_create_port_mappings_table", MIGRATION_004_PORT_MAPPINGS).await?;

    Ok(())
}

async fn run_migration(pool: &SqlitePool, name: &str, sql: &str) -> Result<()> {
    use sqlx::Row;

    let row = sqlx::query("SELECT COUNT(*) as count FROM migrations WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await
        .map_err(|e| switchyard_common::Error::System(format!("Migration check failed: {}", e)))?;

    let count: i64 = row.get("count");
    if count > 0 {
        tracing::debug!("Migration {} already applied", name);
        return Ok(());
    }

    tracing::info!("Running migration: {}", name);

    sqlx::query(sql).execute(pool).await.map_err(|e| {
        switchyard_common::Error::System(format!("Migration {} failed: {}", name, e))
    })?;

    sqlx::query("INSERT INTO migrations (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await
        .map_err(|e| {
            switchyard_common::Error::System(format!("Failed to record migration: {}", e))
        })?;

    tracing::info!("Migration {} completed", name);

    Ok(())
}

const MIGRATION_001_HOST_CONFIGS: &str = "
CREATE TABLE host_configs (
    name TEXT PRIMARY KEY,
    hostname TEXT NOT NULL,
    port INTEGER NOT NULL DEFAULT 22,
    username TEXT NOT NULL,
    ssh_key_path TEXT,
    password TEXT,
    description TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
";

const MIGRATION_002_HOST_CACHE: &str = "
CREATE TABLE host_cache (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    host_id TEXT NOT NULL,
    category TEXT NOT NULL,
    data TEXT NOT NULL,
    last_updated TIMESTAMP NOT NULL
);
";

const MIGRATION_003_HOST_CACHE_INDEX: &str = "
CREATE INDEX idx_host_cache_lookup ON host_cache (host_id, category);
";

const MIGRATION_004_PORT_MAPPINGS: &str = "
CREATE TABLE port_mappings (
    host_id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    last_updated TIMESTAMP NOT NULL
);
";
