use anyhow::{anyhow, Context, Result};
use provgraph_core::{format_rfc3339, now_utc};
use rusqlite::{params, Connection, OptionalExtension};

pub const GRAPH_MIGRATION_VERSION: i64 = 1;

pub(crate) const SCHEMA_GRAPH_V1: &str = r"
CREATE TABLE IF NOT EXISTS artifacts (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE,
  artifact_type TEXT NOT NULL CHECK (
    artifact_type IN (
      'dataset',
      'code',
      'model',
      'hyperparameters',
      'parameters',
      'results'
    )
  ),
  owner_id TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pipelines (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE,
  owner_id TEXT NOT NULL,
  created_at TEXT NOT NULL
);

-- One row per edge. The (source, target, pipeline) triple spans three link
-- tables and has no unique index; writers check for an existing edge inside
-- a BEGIN IMMEDIATE transaction before inserting.
CREATE TABLE IF NOT EXISTS connections (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS artifact_pipelines (
  artifact_id INTEGER NOT NULL REFERENCES artifacts(id) ON DELETE CASCADE,
  pipeline_id INTEGER NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
  PRIMARY KEY (artifact_id, pipeline_id)
);

CREATE TABLE IF NOT EXISTS connection_source_artifact (
  connection_id INTEGER NOT NULL UNIQUE REFERENCES connections(id) ON DELETE CASCADE,
  artifact_id INTEGER NOT NULL REFERENCES artifacts(id) ON DELETE CASCADE,
  PRIMARY KEY (connection_id, artifact_id)
);

CREATE TABLE IF NOT EXISTS connection_target_artifact (
  connection_id INTEGER NOT NULL UNIQUE REFERENCES connections(id) ON DELETE CASCADE,
  artifact_id INTEGER NOT NULL REFERENCES artifacts(id) ON DELETE CASCADE,
  PRIMARY KEY (connection_id, artifact_id)
);

CREATE TABLE IF NOT EXISTS connection_pipeline (
  connection_id INTEGER NOT NULL UNIQUE REFERENCES connections(id) ON DELETE CASCADE,
  pipeline_id INTEGER NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
  PRIMARY KEY (connection_id, pipeline_id)
);

CREATE INDEX IF NOT EXISTS idx_artifact_pipelines_pipeline
  ON artifact_pipelines(pipeline_id, artifact_id);
CREATE INDEX IF NOT EXISTS idx_connection_source_artifact
  ON connection_source_artifact(artifact_id);
CREATE INDEX IF NOT EXISTS idx_connection_target_artifact
  ON connection_target_artifact(artifact_id);
CREATE INDEX IF NOT EXISTS idx_connection_pipeline_pipeline
  ON connection_pipeline(pipeline_id);
CREATE INDEX IF NOT EXISTS idx_artifacts_type
  ON artifacts(artifact_type, id);
";

/// Tables that every migrated database must carry.
pub const GRAPH_TABLES: [&str; 7] = [
    "artifacts",
    "pipelines",
    "connections",
    "artifact_pipelines",
    "connection_source_artifact",
    "connection_target_artifact",
    "connection_pipeline",
];

pub(crate) fn apply_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )
    .context("failed to ensure schema_migrations exists")?;

    if let Some(version) = latest_migration(conn)? {
        if version > GRAPH_MIGRATION_VERSION {
            return Err(anyhow!(
                "database schema version {version} is newer than supported version {GRAPH_MIGRATION_VERSION}"
            ));
        }
    }

    conn.execute_batch(SCHEMA_GRAPH_V1)
        .context("failed to apply provenance graph schema")?;

    let now = format_rfc3339(now_utc()).map_err(|err| anyhow!(err.to_string()))?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![GRAPH_MIGRATION_VERSION, now],
    )
    .context("failed to register provenance graph schema migration")?;

    for table in GRAPH_TABLES {
        if !table_exists(conn, table)? {
            return Err(anyhow!("migration left required table {table} missing"));
        }
    }

    Ok(())
}

pub(crate) fn latest_migration(conn: &Connection) -> Result<Option<i64>> {
    let version = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get::<_, Option<i64>>(0)
        })
        .context("failed to query schema_migrations")?;
    Ok(version)
}

pub(crate) fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT 1
             FROM sqlite_master
             WHERE type = 'table' AND name = ?1
             LIMIT 1",
            params![table_name],
            |_| Ok(()),
        )
        .optional()
        .context("failed to query sqlite_master")?
        .is_some();

    Ok(exists)
}
