//! Composite mutations built from the registries.
//!
//! Each function runs against an already-open transaction and records every
//! step it applies (or finds already in place) on the summary. Returning an
//! error leaves the rollback to the caller.

use provgraph_core::{
    CreateConnection, EntityKind, ExistingEntity, Fact, GraphError, GraphPolicy,
    MutationSummary, NewPipelineSource, OwnerId, RegisterArtifact,
};
use rusqlite::Connection;

use crate::artifacts::ArtifactRegistry;
use crate::connections::ConnectionRegistry;
use crate::pipelines::PipelineRegistry;

pub(crate) fn register_artifact(
    conn: &Connection,
    request: &RegisterArtifact,
    policy: &GraphPolicy,
    summary: &mut MutationSummary,
) -> Result<(), GraphError> {
    let (artifact, artifact_created) =
        ArtifactRegistry::create(conn, &request.name, request.artifact_type, &request.owner)?;
    tracing::debug!(artifact = %artifact.name, created = artifact_created, "artifact resolved");
    summary.push(if artifact_created {
        Fact::ArtifactCreated {
            artifact: artifact.name.clone(),
            artifact_type: artifact.artifact_type,
        }
    } else {
        Fact::AlreadyExisted {
            entity: ExistingEntity::Artifact {
                name: artifact.name.clone(),
            },
        }
    });

    let Some(pipeline_name) = request.pipeline.as_deref() else {
        summary.push(Fact::NoPipelineLinked {
            artifact: artifact.name,
        });
        return Ok(());
    };

    let (pipeline, pipeline_created) =
        PipelineRegistry::get_or_create(conn, pipeline_name, &request.owner, Some(artifact.id))?;
    tracing::debug!(pipeline = %pipeline.name, created = pipeline_created, "pipeline resolved");

    if pipeline_created {
        summary.push(Fact::PipelineCreated {
            pipeline: pipeline.name.clone(),
        });
        summary.push(Fact::MembershipAdded {
            artifact: artifact.name.clone(),
            pipeline: pipeline.name.clone(),
        });

        match (&request.source, policy.new_pipeline_source) {
            (None, _) => return Ok(()),
            (Some(source), NewPipelineSource::Skip) => {
                // A deferred link still requires the source to exist.
                ArtifactRegistry::get_by_name(conn, source)?;
                tracing::debug!(
                    source = %source,
                    pipeline = %pipeline.name,
                    "source linking skipped for new pipeline"
                );
                summary.push(Fact::SourceLinkDeferred {
                    source: source.clone(),
                    pipeline: pipeline.name,
                });
                return Ok(());
            }
            (Some(_), NewPipelineSource::Link) => {}
        }
    } else {
        summary.push(Fact::AlreadyExisted {
            entity: ExistingEntity::Pipeline {
                name: pipeline.name.clone(),
            },
        });
        if !PipelineRegistry::can_modify(&pipeline, &request.owner) {
            return Err(GraphError::permission_denied(
                EntityKind::Pipeline,
                pipeline.name,
            ));
        }

        if PipelineRegistry::add_member(conn, artifact.id, pipeline.id)? {
            summary.push(Fact::MembershipAdded {
                artifact: artifact.name.clone(),
                pipeline: pipeline.name.clone(),
            });
        } else {
            summary.push(Fact::AlreadyExisted {
                entity: ExistingEntity::Membership {
                    artifact: artifact.name.clone(),
                    pipeline: pipeline.name.clone(),
                },
            });
        }
    }

    let Some(source_name) = request.source.as_deref() else {
        return Ok(());
    };
    let source = ArtifactRegistry::get_by_name(conn, source_name)?;
    ConnectionRegistry::link(conn, &source, &artifact, &pipeline, &mut summary.facts)
}

pub(crate) fn create_connection(
    conn: &Connection,
    request: &CreateConnection,
    summary: &mut MutationSummary,
) -> Result<(), GraphError> {
    for fact in ConnectionRegistry::create(conn, request)? {
        summary.push(fact);
    }
    Ok(())
}

pub(crate) fn remove_artifact(
    conn: &Connection,
    name: &str,
    caller: &OwnerId,
    summary: &mut MutationSummary,
) -> Result<(), GraphError> {
    summary.push(ArtifactRegistry::remove(conn, name, caller)?);
    Ok(())
}

pub(crate) fn remove_pipeline(
    conn: &Connection,
    name: &str,
    caller: &OwnerId,
    summary: &mut MutationSummary,
) -> Result<(), GraphError> {
    summary.push(PipelineRegistry::remove(conn, name, caller)?);
    Ok(())
}
