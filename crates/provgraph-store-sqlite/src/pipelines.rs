use provgraph_core::{format_rfc3339, now_utc, EntityKind, Fact, GraphError, OwnerId, Pipeline};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{
    collect_rows, count_to_usize, insert_outcome, parse_owner, parse_timestamp, storage,
    InsertOutcome,
};

/// Lifecycle, membership and queries for pipeline nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineRegistry;

impl PipelineRegistry {
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Pipeline>, GraphError> {
        conn.query_row(
            "SELECT p.id, p.name, p.owner_id, p.created_at
             FROM pipelines p
             WHERE p.name = ?1",
            params![name],
            parse_pipeline_row,
        )
        .optional()
        .map_err(storage)
    }

    pub fn get_by_name(conn: &Connection, name: &str) -> Result<Pipeline, GraphError> {
        Self::find_by_name(conn, name)?
            .ok_or_else(|| GraphError::not_found(EntityKind::Pipeline, name))
    }

    pub fn get_all(conn: &Connection) -> Result<Vec<Pipeline>, GraphError> {
        let mut stmt = conn
            .prepare(
                "SELECT p.id, p.name, p.owner_id, p.created_at
                 FROM pipelines p
                 ORDER BY p.id ASC",
            )
            .map_err(storage)?;
        let rows = stmt.query_map([], parse_pipeline_row).map_err(storage)?;
        collect_rows(rows)
    }

    /// Pipelines the named artifact belongs to. An unknown artifact belongs
    /// to none.
    pub fn get_by_artifact(
        conn: &Connection,
        artifact_name: &str,
    ) -> Result<Vec<Pipeline>, GraphError> {
        let mut stmt = conn
            .prepare(
                "SELECT p.id, p.name, p.owner_id, p.created_at
                 FROM pipelines p
                 JOIN artifact_pipelines ap ON ap.pipeline_id = p.id
                 JOIN artifacts a ON a.id = ap.artifact_id
                 WHERE a.name = ?1
                 ORDER BY p.id ASC",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![artifact_name], parse_pipeline_row)
            .map_err(storage)?;
        collect_rows(rows)
    }

    /// Returns the pipeline named `name`, creating it owned by `owner` when
    /// absent.
    ///
    /// A newly created pipeline gets `initial_member` as its first member.
    /// An existing pipeline is returned untouched. The flag is true when this
    /// call created the pipeline.
    pub fn get_or_create(
        conn: &Connection,
        name: &str,
        owner: &OwnerId,
        initial_member: Option<i64>,
    ) -> Result<(Pipeline, bool), GraphError> {
        if let Some(existing) = Self::find_by_name(conn, name)? {
            return Ok((existing, false));
        }
        let (pipeline, created) = Self::insert_or_resolve(conn, name, owner)?;
        if created {
            if let Some(artifact_id) = initial_member {
                Self::add_member(conn, artifact_id, pipeline.id)?;
            }
        }
        Ok((pipeline, created))
    }

    /// Inserts without a prior lookup; a unique-name conflict resolves to the
    /// row that won.
    pub(crate) fn insert_or_resolve(
        conn: &Connection,
        name: &str,
        owner: &OwnerId,
    ) -> Result<(Pipeline, bool), GraphError> {
        let created_at = now_utc();
        let result = conn.execute(
            "INSERT INTO pipelines(name, owner_id, created_at) VALUES (?1, ?2, ?3)",
            params![name, owner.as_str(), format_rfc3339(created_at)?],
        );

        match insert_outcome(conn, result)? {
            InsertOutcome::Inserted(id) => {
                tracing::debug!(pipeline = name, id, "pipeline inserted");
                Ok((
                    Pipeline {
                        id,
                        name: name.to_string(),
                        owner_id: owner.clone(),
                        created_at,
                    },
                    true,
                ))
            }
            InsertOutcome::Conflict => {
                tracing::warn!(
                    pipeline = name,
                    "pipeline name taken by a concurrent insert; resolving existing row"
                );
                let existing = Self::find_by_name(conn, name)?.ok_or_else(|| {
                    GraphError::Storage(format!(
                        "pipeline '{name}' reported a unique conflict but could not be re-read"
                    ))
                })?;
                Ok((existing, false))
            }
        }
    }

    #[must_use]
    pub fn can_modify(pipeline: &Pipeline, caller: &OwnerId) -> bool {
        pipeline.can_modify(caller)
    }

    pub fn is_member(
        conn: &Connection,
        artifact_id: i64,
        pipeline_id: i64,
    ) -> Result<bool, GraphError> {
        conn.query_row(
            "SELECT 1 FROM artifact_pipelines WHERE artifact_id = ?1 AND pipeline_id = ?2",
            params![artifact_id, pipeline_id],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(storage)
    }

    /// Adds a membership edge. Returns false when it was already present.
    pub fn add_member(
        conn: &Connection,
        artifact_id: i64,
        pipeline_id: i64,
    ) -> Result<bool, GraphError> {
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO artifact_pipelines(artifact_id, pipeline_id)
                 VALUES (?1, ?2)",
                params![artifact_id, pipeline_id],
            )
            .map_err(storage)?;
        Ok(inserted == 1)
    }

    pub fn member_count(conn: &Connection, pipeline_id: i64) -> Result<usize, GraphError> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM artifact_pipelines WHERE pipeline_id = ?1",
                params![pipeline_id],
                |row| row.get(0),
            )
            .map_err(storage)?;
        count_to_usize(count)
    }

    /// Deletes an owned, empty pipeline and every connection scoped to it.
    ///
    /// Checks run in order: existence, ownership, emptiness.
    pub fn remove(conn: &Connection, name: &str, caller: &OwnerId) -> Result<Fact, GraphError> {
        let pipeline = Self::get_by_name(conn, name)?;
        if !Self::can_modify(&pipeline, caller) {
            return Err(GraphError::permission_denied(EntityKind::Pipeline, name));
        }

        let members = Self::member_count(conn, pipeline.id)?;
        if members > 0 {
            return Err(GraphError::NotEmpty {
                pipeline: pipeline.name,
                members,
            });
        }

        let connections_removed = conn
            .execute(
                "DELETE FROM connections
                 WHERE id IN (
                    SELECT connection_id FROM connection_pipeline WHERE pipeline_id = ?1
                 )",
                params![pipeline.id],
            )
            .map_err(storage)?;
        conn.execute("DELETE FROM pipelines WHERE id = ?1", params![pipeline.id])
            .map_err(storage)?;

        tracing::debug!(pipeline = name, connections_removed, "pipeline removed");

        Ok(Fact::PipelineRemoved {
            pipeline: pipeline.name,
            connections_removed,
        })
    }
}

fn parse_pipeline_row(row: &Row<'_>) -> rusqlite::Result<Pipeline> {
    Ok(Pipeline {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_id: parse_owner(2, &row.get::<_, String>(2)?)?,
        created_at: parse_timestamp(3, &row.get::<_, String>(3)?)?,
    })
}
