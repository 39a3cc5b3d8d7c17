use provgraph_core::{
    format_rfc3339, now_utc, Artifact, Connection as GraphConnection, CreateConnection,
    EntityKind, ExistingEntity, Fact, GraphError, NodeRef, OwnerId, Pipeline,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::artifacts::ArtifactRegistry;
use crate::pipelines::PipelineRegistry;
use crate::{collect_rows, storage};

const CONNECTION_SELECT: &str = "SELECT c.id, sa.id, sa.name, ta.id, ta.name, p.id, p.name
     FROM connections c
     JOIN connection_source_artifact cs ON cs.connection_id = c.id
     JOIN artifacts sa ON sa.id = cs.artifact_id
     JOIN connection_target_artifact ct ON ct.connection_id = c.id
     JOIN artifacts ta ON ta.id = ct.artifact_id
     JOIN connection_pipeline cp ON cp.connection_id = c.id
     JOIN pipelines p ON p.id = cp.pipeline_id";

/// Lifecycle and queries for directed, pipeline-scoped edges.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionRegistry;

impl ConnectionRegistry {
    pub fn get_all(conn: &Connection) -> Result<Vec<GraphConnection>, GraphError> {
        let mut stmt = conn
            .prepare(&format!("{CONNECTION_SELECT} ORDER BY c.id ASC"))
            .map_err(storage)?;
        let rows = stmt.query_map([], parse_connection_row).map_err(storage)?;
        collect_rows(rows)
    }

    pub fn get_by_pipeline(
        conn: &Connection,
        pipeline_name: &str,
    ) -> Result<Vec<GraphConnection>, GraphError> {
        let mut stmt = conn
            .prepare(&format!(
                "{CONNECTION_SELECT} WHERE p.name = ?1 ORDER BY c.id ASC"
            ))
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![pipeline_name], parse_connection_row)
            .map_err(storage)?;
        collect_rows(rows)
    }

    /// Exact (source, target, pipeline) lookup.
    pub fn get_existing(
        conn: &Connection,
        source_id: i64,
        target_id: i64,
        pipeline_id: i64,
    ) -> Result<Option<GraphConnection>, GraphError> {
        conn.query_row(
            &format!(
                "{CONNECTION_SELECT}
                 WHERE sa.id = ?1 AND ta.id = ?2 AND p.id = ?3
                 ORDER BY c.id ASC
                 LIMIT 1"
            ),
            params![source_id, target_id, pipeline_id],
            parse_connection_row,
        )
        .optional()
        .map_err(storage)
    }

    /// Connections carry no owner; the owner of their pipeline decides.
    pub fn can_modify(
        conn: &Connection,
        connection: &GraphConnection,
        caller: &OwnerId,
    ) -> Result<bool, GraphError> {
        let owner: Option<String> = conn
            .query_row(
                "SELECT owner_id FROM pipelines WHERE id = ?1",
                params![connection.pipeline.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        match owner {
            Some(owner) => Ok(owner == caller.as_str()),
            None => Err(GraphError::not_found(
                EntityKind::Pipeline,
                connection.pipeline.name.clone(),
            )),
        }
    }

    fn insert(
        conn: &Connection,
        source: &Artifact,
        target: &Artifact,
        pipeline: &Pipeline,
    ) -> Result<GraphConnection, GraphError> {
        conn.execute(
            "INSERT INTO connections(created_at) VALUES (?1)",
            params![format_rfc3339(now_utc())?],
        )
        .map_err(storage)?;
        let id = conn.last_insert_rowid();

        conn.execute(
            "INSERT INTO connection_source_artifact(connection_id, artifact_id) VALUES (?1, ?2)",
            params![id, source.id],
        )
        .map_err(storage)?;
        conn.execute(
            "INSERT INTO connection_target_artifact(connection_id, artifact_id) VALUES (?1, ?2)",
            params![id, target.id],
        )
        .map_err(storage)?;
        conn.execute(
            "INSERT INTO connection_pipeline(connection_id, pipeline_id) VALUES (?1, ?2)",
            params![id, pipeline.id],
        )
        .map_err(storage)?;

        tracing::debug!(
            connection_id = id,
            source = %source.name,
            target = %target.name,
            pipeline = %pipeline.name,
            "connection inserted"
        );

        Ok(GraphConnection {
            id,
            source: node(source.id, &source.name),
            target: node(target.id, &target.name),
            pipeline: node(pipeline.id, &pipeline.name),
        })
    }

    /// Creates the `source -> target` edge inside `pipeline` unless it already
    /// exists. A new edge also makes `source` a member of the pipeline.
    ///
    /// The caller has already checked that `pipeline` may be modified.
    pub(crate) fn link(
        conn: &Connection,
        source: &Artifact,
        target: &Artifact,
        pipeline: &Pipeline,
        facts: &mut Vec<Fact>,
    ) -> Result<(), GraphError> {
        if Self::get_existing(conn, source.id, target.id, pipeline.id)?.is_some() {
            facts.push(Fact::AlreadyExisted {
                entity: ExistingEntity::Connection {
                    source: source.name.clone(),
                    target: target.name.clone(),
                    pipeline: pipeline.name.clone(),
                },
            });
            return Ok(());
        }

        if PipelineRegistry::add_member(conn, source.id, pipeline.id)? {
            facts.push(Fact::MembershipAdded {
                artifact: source.name.clone(),
                pipeline: pipeline.name.clone(),
            });
        }
        Self::insert(conn, source, target, pipeline)?;
        facts.push(Fact::ConnectionCreated {
            source: source.name.clone(),
            target: target.name.clone(),
            pipeline: pipeline.name.clone(),
        });
        Ok(())
    }

    /// Connects two existing artifacts inside an existing pipeline owned by
    /// the caller, adding whichever endpoint memberships are missing.
    ///
    /// Issues several statements; run it inside an immediate transaction so
    /// the duplicate check and the insert are not interleaved with another
    /// writer.
    pub fn create(conn: &Connection, request: &CreateConnection) -> Result<Vec<Fact>, GraphError> {
        request.validate()?;
        let source = ArtifactRegistry::get_by_name(conn, &request.source)?;
        let target = ArtifactRegistry::get_by_name(conn, &request.target)?;
        let pipeline = PipelineRegistry::get_by_name(conn, &request.pipeline)?;
        if !PipelineRegistry::can_modify(&pipeline, &request.owner) {
            return Err(GraphError::permission_denied(
                EntityKind::Pipeline,
                &request.pipeline,
            ));
        }

        let mut facts = Vec::new();
        if PipelineRegistry::add_member(conn, target.id, pipeline.id)? {
            facts.push(Fact::MembershipAdded {
                artifact: target.name.clone(),
                pipeline: pipeline.name.clone(),
            });
        }
        Self::link(conn, &source, &target, &pipeline, &mut facts)?;
        Ok(facts)
    }
}

fn node(id: i64, name: &str) -> NodeRef {
    NodeRef {
        id,
        name: name.to_string(),
    }
}

fn parse_connection_row(row: &Row<'_>) -> rusqlite::Result<GraphConnection> {
    Ok(GraphConnection {
        id: row.get(0)?,
        source: NodeRef {
            id: row.get(1)?,
            name: row.get(2)?,
        },
        target: NodeRef {
            id: row.get(3)?,
            name: row.get(4)?,
        },
        pipeline: NodeRef {
            id: row.get(5)?,
            name: row.get(6)?,
        },
    })
}
