use std::collections::BTreeSet;

use provgraph_core::{
    format_rfc3339, now_utc, Artifact, ArtifactType, EntityKind, Fact, GraphError, OwnerId,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{
    collect_rows, conversion_failure, insert_outcome, parse_owner, parse_timestamp, storage,
    InsertOutcome,
};

/// Lifecycle and queries for artifact nodes.
///
/// Stateless: every call takes the connection or open transaction it should
/// run against.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactRegistry;

impl ArtifactRegistry {
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Artifact>, GraphError> {
        conn.query_row(
            "SELECT a.id, a.name, a.artifact_type, a.owner_id, a.created_at
             FROM artifacts a
             WHERE a.name = ?1",
            params![name],
            parse_artifact_row,
        )
        .optional()
        .map_err(storage)
    }

    pub fn get_by_name(conn: &Connection, name: &str) -> Result<Artifact, GraphError> {
        Self::find_by_name(conn, name)?
            .ok_or_else(|| GraphError::not_found(EntityKind::Artifact, name))
    }

    pub fn get_all(conn: &Connection) -> Result<Vec<Artifact>, GraphError> {
        let mut stmt = conn
            .prepare(
                "SELECT a.id, a.name, a.artifact_type, a.owner_id, a.created_at
                 FROM artifacts a
                 ORDER BY a.id ASC",
            )
            .map_err(storage)?;
        let rows = stmt.query_map([], parse_artifact_row).map_err(storage)?;
        collect_rows(rows)
    }

    /// Members of the named pipeline. An unknown pipeline has no members.
    pub fn get_by_pipeline(
        conn: &Connection,
        pipeline_name: &str,
    ) -> Result<Vec<Artifact>, GraphError> {
        let mut stmt = conn
            .prepare(
                "SELECT a.id, a.name, a.artifact_type, a.owner_id, a.created_at
                 FROM artifacts a
                 JOIN artifact_pipelines ap ON ap.artifact_id = a.id
                 JOIN pipelines p ON p.id = ap.pipeline_id
                 WHERE p.name = ?1
                 ORDER BY a.id ASC",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![pipeline_name], parse_artifact_row)
            .map_err(storage)?;
        collect_rows(rows)
    }

    pub fn get_by_pipeline_and_type(
        conn: &Connection,
        pipeline_name: &str,
        artifact_type: ArtifactType,
    ) -> Result<Vec<Artifact>, GraphError> {
        let mut stmt = conn
            .prepare(
                "SELECT a.id, a.name, a.artifact_type, a.owner_id, a.created_at
                 FROM artifacts a
                 JOIN artifact_pipelines ap ON ap.artifact_id = a.id
                 JOIN pipelines p ON p.id = ap.pipeline_id
                 WHERE p.name = ?1 AND a.artifact_type = ?2
                 ORDER BY a.id ASC",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map(
                params![pipeline_name, artifact_type.as_str()],
                parse_artifact_row,
            )
            .map_err(storage)?;
        collect_rows(rows)
    }

    /// Artifacts one edge away from `name` in any pipeline: downstream
    /// targets first, then upstream sources, each listed once.
    pub fn neighbors(conn: &Connection, name: &str) -> Result<Vec<Artifact>, GraphError> {
        let artifact = Self::get_by_name(conn, name)?;
        let mut stmt = conn
            .prepare(
                "SELECT a.id, a.name, a.artifact_type, a.owner_id, a.created_at
                 FROM (
                    SELECT ct.artifact_id AS neighbor_id, cs.connection_id AS connection_id, 0 AS direction
                    FROM connection_source_artifact cs
                    JOIN connection_target_artifact ct ON ct.connection_id = cs.connection_id
                    WHERE cs.artifact_id = ?1
                    UNION ALL
                    SELECT cs.artifact_id AS neighbor_id, ct.connection_id AS connection_id, 1 AS direction
                    FROM connection_target_artifact ct
                    JOIN connection_source_artifact cs ON cs.connection_id = ct.connection_id
                    WHERE ct.artifact_id = ?1
                 ) edges
                 JOIN artifacts a ON a.id = edges.neighbor_id
                 ORDER BY edges.direction ASC, edges.connection_id ASC",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![artifact.id], parse_artifact_row)
            .map_err(storage)?;

        let mut seen = BTreeSet::new();
        Ok(collect_rows(rows)?
            .into_iter()
            .filter(|neighbor| seen.insert(neighbor.id))
            .collect())
    }

    #[must_use]
    pub fn can_modify(artifact: &Artifact, caller: &OwnerId) -> bool {
        artifact.can_modify(caller)
    }

    /// Returns the artifact named `name`, inserting it when absent.
    ///
    /// An existing artifact is returned unchanged: type and owner are never
    /// overwritten here. The flag is true when this call inserted the row.
    pub fn create(
        conn: &Connection,
        name: &str,
        artifact_type: ArtifactType,
        owner: &OwnerId,
    ) -> Result<(Artifact, bool), GraphError> {
        if let Some(existing) = Self::find_by_name(conn, name)? {
            return Ok((existing, false));
        }
        Self::insert_or_resolve(conn, name, artifact_type, owner)
    }

    /// Inserts without a prior lookup; a unique-name conflict resolves to the
    /// row that won.
    pub(crate) fn insert_or_resolve(
        conn: &Connection,
        name: &str,
        artifact_type: ArtifactType,
        owner: &OwnerId,
    ) -> Result<(Artifact, bool), GraphError> {
        let created_at = now_utc();
        let result = conn.execute(
            "INSERT INTO artifacts(name, artifact_type, owner_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                name,
                artifact_type.as_str(),
                owner.as_str(),
                format_rfc3339(created_at)?,
            ],
        );

        match insert_outcome(conn, result)? {
            InsertOutcome::Inserted(id) => {
                tracing::debug!(artifact = name, id, "artifact inserted");
                Ok((
                    Artifact {
                        id,
                        name: name.to_string(),
                        artifact_type,
                        owner_id: owner.clone(),
                        created_at,
                    },
                    true,
                ))
            }
            InsertOutcome::Conflict => {
                tracing::warn!(
                    artifact = name,
                    "artifact name taken by a concurrent insert; resolving existing row"
                );
                let existing = Self::find_by_name(conn, name)?.ok_or_else(|| {
                    GraphError::Storage(format!(
                        "artifact '{name}' reported a unique conflict but could not be re-read"
                    ))
                })?;
                Ok((existing, false))
            }
        }
    }

    /// Deletes an owned artifact together with every connection it takes
    /// part in and every pipeline membership it holds.
    pub fn remove(conn: &Connection, name: &str, caller: &OwnerId) -> Result<Fact, GraphError> {
        let artifact = Self::get_by_name(conn, name)?;
        if !Self::can_modify(&artifact, caller) {
            return Err(GraphError::permission_denied(EntityKind::Artifact, name));
        }

        let connections_removed = conn
            .execute(
                "DELETE FROM connections
                 WHERE id IN (
                    SELECT connection_id FROM connection_source_artifact WHERE artifact_id = ?1
                    UNION
                    SELECT connection_id FROM connection_target_artifact WHERE artifact_id = ?1
                 )",
                params![artifact.id],
            )
            .map_err(storage)?;
        let memberships_removed = conn
            .execute(
                "DELETE FROM artifact_pipelines WHERE artifact_id = ?1",
                params![artifact.id],
            )
            .map_err(storage)?;
        conn.execute("DELETE FROM artifacts WHERE id = ?1", params![artifact.id])
            .map_err(storage)?;

        tracing::debug!(
            artifact = name,
            connections_removed,
            memberships_removed,
            "artifact removed"
        );

        Ok(Fact::ArtifactRemoved {
            artifact: artifact.name,
            connections_removed,
            memberships_removed,
        })
    }
}

pub(crate) fn parse_artifact_row(row: &Row<'_>) -> rusqlite::Result<Artifact> {
    let artifact_type_raw: String = row.get(2)?;
    let artifact_type = ArtifactType::parse(&artifact_type_raw).ok_or_else(|| {
        conversion_failure(
            2,
            Type::Text,
            format!("invalid artifact_type: {artifact_type_raw}"),
        )
    })?;

    Ok(Artifact {
        id: row.get(0)?,
        name: row.get(1)?,
        artifact_type,
        owner_id: parse_owner(3, &row.get::<_, String>(3)?)?,
        created_at: parse_timestamp(4, &row.get::<_, String>(4)?)?,
    })
}
