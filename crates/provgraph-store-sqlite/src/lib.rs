#![allow(clippy::missing_errors_doc)]

//! SQLite persistence for the provenance graph.
//!
//! [`SqliteGraphStore`] owns one connection and runs every mutation inside a
//! single immediate transaction. The registries are stateless and take the
//! connection (or open transaction) explicitly, so they compose inside one
//! unit of work.

mod artifacts;
mod connections;
mod pipelines;
mod protocol;
mod schema;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use provgraph_core::{
    parse_rfc3339_utc, Artifact, ArtifactType, Connection as GraphConnection, CreateConnection,
    GraphError, GraphPolicy, GraphStats, MutationOperation, MutationSummary, OwnerId, Pipeline,
    RegisterArtifact,
};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, TransactionBehavior};
use time::OffsetDateTime;

pub use artifacts::ArtifactRegistry;
pub use connections::ConnectionRegistry;
pub use pipelines::PipelineRegistry;
pub use schema::{GRAPH_MIGRATION_VERSION, GRAPH_TABLES};

pub struct SqliteGraphStore {
    conn: Connection,
    policy: GraphPolicy,
}

impl SqliteGraphStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_policy(path, GraphPolicy::default())
    }

    pub fn open_with_policy(path: &Path, policy: GraphPolicy) -> Result<Self> {
        policy.validate().context("invalid graph policy")?;

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to configure sqlite pragmas")?;
        conn.busy_timeout(Duration::from_millis(policy.busy_timeout_ms))
            .context("failed to configure sqlite busy timeout")?;

        Ok(Self { conn, policy })
    }

    #[must_use]
    pub fn policy(&self) -> &GraphPolicy {
        &self.policy
    }

    pub fn migrate(&self) -> Result<()> {
        schema::apply_migrations(&self.conn)
    }

    pub fn schema_version(&self) -> Result<Option<i64>> {
        schema::latest_migration(&self.conn)
    }

    /// Registers an artifact, optionally inside a pipeline and connected from
    /// an upstream source artifact.
    pub fn register_artifact(
        &mut self,
        request: &RegisterArtifact,
    ) -> Result<MutationSummary, GraphError> {
        request.validate()?;
        self.mutate(MutationOperation::RegisterArtifact, |conn, policy, summary| {
            protocol::register_artifact(conn, request, policy, summary)
        })
    }

    pub fn create_connection(
        &mut self,
        request: &CreateConnection,
    ) -> Result<MutationSummary, GraphError> {
        request.validate()?;
        self.mutate(MutationOperation::CreateConnection, |conn, _, summary| {
            protocol::create_connection(conn, request, summary)
        })
    }

    pub fn remove_artifact(
        &mut self,
        name: &str,
        caller: &OwnerId,
    ) -> Result<MutationSummary, GraphError> {
        self.mutate(MutationOperation::RemoveArtifact, |conn, _, summary| {
            protocol::remove_artifact(conn, name, caller, summary)
        })
    }

    pub fn remove_pipeline(
        &mut self,
        name: &str,
        caller: &OwnerId,
    ) -> Result<MutationSummary, GraphError> {
        self.mutate(MutationOperation::RemovePipeline, |conn, _, summary| {
            protocol::remove_pipeline(conn, name, caller, summary)
        })
    }

    pub fn get_artifact(&self, name: &str) -> Result<Artifact, GraphError> {
        ArtifactRegistry::get_by_name(&self.conn, name)
    }

    pub fn get_pipeline(&self, name: &str) -> Result<Pipeline, GraphError> {
        PipelineRegistry::get_by_name(&self.conn, name)
    }

    pub fn list_artifacts(&self) -> Result<Vec<Artifact>, GraphError> {
        ArtifactRegistry::get_all(&self.conn)
    }

    pub fn list_artifacts_by_pipeline(&self, pipeline: &str) -> Result<Vec<Artifact>, GraphError> {
        ArtifactRegistry::get_by_pipeline(&self.conn, pipeline)
    }

    pub fn list_artifacts_by_type(
        &self,
        pipeline: &str,
        artifact_type: ArtifactType,
    ) -> Result<Vec<Artifact>, GraphError> {
        ArtifactRegistry::get_by_pipeline_and_type(&self.conn, pipeline, artifact_type)
    }

    pub fn list_pipelines(&self) -> Result<Vec<Pipeline>, GraphError> {
        PipelineRegistry::get_all(&self.conn)
    }

    pub fn list_pipelines_by_artifact(&self, artifact: &str) -> Result<Vec<Pipeline>, GraphError> {
        PipelineRegistry::get_by_artifact(&self.conn, artifact)
    }

    pub fn list_connections(&self) -> Result<Vec<GraphConnection>, GraphError> {
        ConnectionRegistry::get_all(&self.conn)
    }

    pub fn list_connections_by_pipeline(
        &self,
        pipeline: &str,
    ) -> Result<Vec<GraphConnection>, GraphError> {
        ConnectionRegistry::get_by_pipeline(&self.conn, pipeline)
    }

    pub fn list_neighbors(&self, artifact: &str) -> Result<Vec<Artifact>, GraphError> {
        ArtifactRegistry::neighbors(&self.conn, artifact)
    }

    pub fn stats(&self) -> Result<GraphStats, GraphError> {
        Ok(GraphStats {
            artifacts: self.count_rows("artifacts")?,
            pipelines: self.count_rows("pipelines")?,
            connections: self.count_rows("connections")?,
            memberships: self.count_rows("artifact_pipelines")?,
        })
    }

    fn count_rows(&self, table: &str) -> Result<usize, GraphError> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .map_err(storage)?;
        count_to_usize(count)
    }

    /// Runs `apply` inside one immediate transaction: committed when it
    /// returns `Ok`, rolled back otherwise.
    fn mutate<F>(
        &mut self,
        operation: MutationOperation,
        apply: F,
    ) -> Result<MutationSummary, GraphError>
    where
        F: FnOnce(&Connection, &GraphPolicy, &mut MutationSummary) -> Result<(), GraphError>,
    {
        let mut summary = MutationSummary::new(operation);
        let span = tracing::info_span!(
            "mutation",
            op = operation.as_str(),
            mutation_id = %summary.mutation_id
        );
        let _entered = span.enter();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage)?;

        match apply(&tx, &self.policy, &mut summary) {
            Ok(()) => {
                tx.commit().map_err(storage)?;
                tracing::info!(
                    facts = summary.facts.len(),
                    writes = summary.write_count(),
                    "mutation committed"
                );
                Ok(summary)
            }
            Err(err) => {
                tracing::warn!(kind = err.kind().as_str(), error = %err, "mutation rolled back");
                if let Err(rollback_err) = tx.rollback() {
                    tracing::warn!(error = %rollback_err, "explicit rollback failed");
                }
                Err(err)
            }
        }
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

pub(crate) fn storage(err: rusqlite::Error) -> GraphError {
    GraphError::Storage(err.to_string())
}

pub(crate) enum InsertOutcome {
    Inserted(i64),
    Conflict,
}

/// Classifies the result of a single-row insert into a table with a unique
/// name column.
pub(crate) fn insert_outcome(
    conn: &Connection,
    result: rusqlite::Result<usize>,
) -> Result<InsertOutcome, GraphError> {
    match result {
        Ok(_) => Ok(InsertOutcome::Inserted(conn.last_insert_rowid())),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Ok(InsertOutcome::Conflict)
        }
        Err(err) => Err(storage(err)),
    }
}

pub(crate) fn conversion_failure(column: usize, kind: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        kind,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

pub(crate) fn parse_owner(column: usize, raw: &str) -> rusqlite::Result<OwnerId> {
    OwnerId::parse(raw).map_err(|err| conversion_failure(column, Type::Text, err.to_string()))
}

pub(crate) fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<OffsetDateTime> {
    parse_rfc3339_utc(raw).map_err(|err| conversion_failure(column, Type::Text, err.to_string()))
}

pub(crate) fn count_to_usize(count: i64) -> Result<usize, GraphError> {
    usize::try_from(count)
        .map_err(|_| GraphError::Storage(format!("row count out of range: {count}")))
}

pub(crate) fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>, GraphError> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row.map_err(storage)?);
    }
    Ok(values)
}
