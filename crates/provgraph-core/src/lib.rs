//! Domain model for the pipeline provenance graph.
//!
//! Artifacts, pipelines and the directed connections between artifacts are
//! plain values here. Persistence lives in `provgraph-store-sqlite`; this crate
//! only defines the shapes, the request validation rules, the typed error
//! taxonomy and the structured result of a mutation.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, UtcOffset};
use ulid::Ulid;

pub const SUMMARY_CONTRACT_VERSION: &str = "mutation_summary.v1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Artifact,
    Pipeline,
    Connection,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Artifact => "artifact",
            Self::Pipeline => "pipeline",
            Self::Connection => "connection",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum GraphError {
    #[error("{entity} '{name}' not found")]
    NotFound { entity: EntityKind, name: String },
    #[error("permission denied: {entity} '{name}' can only be modified by its owner")]
    PermissionDenied { entity: EntityKind, name: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("pipeline '{pipeline}' is not empty: {members} member artifacts remain")]
    NotEmpty { pipeline: String, members: usize },
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    Validation,
    NotEmpty,
    Storage,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::Validation => "validation",
            Self::NotEmpty => "not_empty",
            Self::Storage => "storage",
        }
    }
}

impl GraphError {
    pub fn not_found(entity: EntityKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            name: name.into(),
        }
    }

    pub fn permission_denied(entity: EntityKind, name: impl Into<String>) -> Self {
        Self::PermissionDenied {
            entity,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotEmpty { .. } => ErrorKind::NotEmpty,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Dataset,
    Code,
    Model,
    Hyperparameters,
    Parameters,
    Results,
}

impl ArtifactType {
    pub const ALL: [Self; 6] = [
        Self::Dataset,
        Self::Code,
        Self::Model,
        Self::Hyperparameters,
        Self::Parameters,
        Self::Results,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dataset => "dataset",
            Self::Code => "code",
            Self::Model => "model",
            Self::Hyperparameters => "hyperparameters",
            Self::Parameters => "parameters",
            Self::Results => "results",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "dataset" => Some(Self::Dataset),
            "code" => Some(Self::Code),
            "model" => Some(Self::Model),
            "hyperparameters" => Some(Self::Hyperparameters),
            "parameters" => Some(Self::Parameters),
            "results" => Some(Self::Results),
            _ => None,
        }
    }
}

impl Display for ArtifactType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque identifier of the acting user.
///
/// Two calls carrying equal strings are treated as the same owner. No attempt
/// is made to authenticate the value.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Wraps a caller-supplied owner identifier.
    ///
    /// # Errors
    /// Returns [`GraphError::Validation`] when the identifier is blank.
    pub fn parse(raw: &str) -> Result<Self, GraphError> {
        if raw.trim().is_empty() {
            return Err(GraphError::Validation(
                "owner id MUST be provided for every mutation".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OwnerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    pub id: i64,
    pub name: String,
    pub artifact_type: ArtifactType,
    pub owner_id: OwnerId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Artifact {
    #[must_use]
    pub fn can_modify(&self, caller: &OwnerId) -> bool {
        &self.owner_id == caller
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pipeline {
    pub id: i64,
    pub name: String,
    pub owner_id: OwnerId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Pipeline {
    #[must_use]
    pub fn can_modify(&self, caller: &OwnerId) -> bool {
        &self.owner_id == caller
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub id: i64,
    pub name: String,
}

/// Directed edge between two artifacts, scoped to one pipeline.
///
/// A connection has no owner of its own; modification rights follow the
/// owner of [`Connection::pipeline`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Connection {
    pub id: i64,
    pub source: NodeRef,
    pub target: NodeRef,
    pub pipeline: NodeRef,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GraphStats {
    pub artifacts: usize,
    pub pipelines: usize,
    pub connections: usize,
    pub memberships: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterArtifact {
    pub name: String,
    pub artifact_type: ArtifactType,
    pub owner: OwnerId,
    pub pipeline: Option<String>,
    pub source: Option<String>,
}

impl RegisterArtifact {
    /// Validates the request shape before any storage access.
    ///
    /// # Errors
    /// Returns [`GraphError::Validation`] for blank names, a source without a
    /// pipeline, or a source naming the registered artifact itself.
    pub fn validate(&self) -> Result<(), GraphError> {
        validate_name("artifact name", &self.name)?;

        if let Some(pipeline) = &self.pipeline {
            validate_name("pipeline name", pipeline)?;
        }

        if let Some(source) = &self.source {
            validate_name("source artifact name", source)?;
            if self.pipeline.is_none() {
                return Err(GraphError::Validation(
                    "source artifact specified without pipeline".to_string(),
                ));
            }
            if source == &self.name {
                return Err(GraphError::Validation(format!(
                    "artifact '{}' cannot be its own source",
                    self.name
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateConnection {
    pub source: String,
    pub target: String,
    pub pipeline: String,
    pub owner: OwnerId,
}

impl CreateConnection {
    /// Validates the request shape before any storage access.
    ///
    /// # Errors
    /// Returns [`GraphError::Validation`] for blank names or a self-edge.
    pub fn validate(&self) -> Result<(), GraphError> {
        validate_name("source artifact name", &self.source)?;
        validate_name("target artifact name", &self.target)?;
        validate_name("pipeline name", &self.pipeline)?;

        if self.source == self.target {
            return Err(GraphError::Validation(format!(
                "connection source and target MUST differ (got '{}')",
                self.source
            )));
        }

        Ok(())
    }
}

fn validate_name(label: &str, value: &str) -> Result<(), GraphError> {
    if value.trim().is_empty() {
        return Err(GraphError::Validation(format!("{label} cannot be empty")));
    }
    Ok(())
}

/// What registration does with a source artifact when the pipeline it names
/// is created by the same call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NewPipelineSource {
    /// Stop after creating the pipeline; the source is not linked.
    #[default]
    Skip,
    /// Continue into source linking as for an existing pipeline.
    Link,
}

impl NewPipelineSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Link => "link",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "skip" => Some(Self::Skip),
            "link" => Some(Self::Link),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct GraphPolicy {
    pub new_pipeline_source: NewPipelineSource,
    pub busy_timeout_ms: u64,
}

impl Default for GraphPolicy {
    fn default() -> Self {
        Self {
            new_pipeline_source: NewPipelineSource::Skip,
            busy_timeout_ms: 5_000,
        }
    }
}

impl GraphPolicy {
    /// Validates policy bounds.
    ///
    /// # Errors
    /// Returns [`GraphError::Validation`] when `busy_timeout_ms` is zero.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.busy_timeout_ms == 0 {
            return Err(GraphError::Validation(
                "busy_timeout_ms MUST be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Decodes and validates a policy from JSON. Missing fields take defaults.
    ///
    /// # Errors
    /// Returns [`GraphError::Validation`] when decoding fails or decoded
    /// values violate policy bounds.
    pub fn from_json(value: &Value) -> Result<Self, GraphError> {
        let policy: Self = serde_json::from_value(value.clone())
            .map_err(|err| GraphError::Validation(format!("invalid policy JSON payload: {err}")))?;
        policy.validate()?;
        Ok(policy)
    }
}

/// Entity a mutation step found already in place instead of creating it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExistingEntity {
    Artifact {
        name: String,
    },
    Pipeline {
        name: String,
    },
    Membership {
        artifact: String,
        pipeline: String,
    },
    Connection {
        source: String,
        target: String,
        pipeline: String,
    },
}

/// One applied (or confirmed) step of a graph mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "fact", rename_all = "snake_case")]
pub enum Fact {
    ArtifactCreated {
        artifact: String,
        artifact_type: ArtifactType,
    },
    PipelineCreated {
        pipeline: String,
    },
    MembershipAdded {
        artifact: String,
        pipeline: String,
    },
    ConnectionCreated {
        source: String,
        target: String,
        pipeline: String,
    },
    AlreadyExisted {
        entity: ExistingEntity,
    },
    NoPipelineLinked {
        artifact: String,
    },
    SourceLinkDeferred {
        source: String,
        pipeline: String,
    },
    ArtifactRemoved {
        artifact: String,
        connections_removed: usize,
        memberships_removed: usize,
    },
    PipelineRemoved {
        pipeline: String,
        connections_removed: usize,
    },
}

impl Fact {
    /// True when the step wrote to the graph.
    #[must_use]
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            Self::AlreadyExisted { .. } | Self::NoPipelineLinked { .. } | Self::SourceLinkDeferred { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MutationOperation {
    RegisterArtifact,
    CreateConnection,
    RemoveArtifact,
    RemovePipeline,
}

impl MutationOperation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RegisterArtifact => "register_artifact",
            Self::CreateConnection => "create_connection",
            Self::RemoveArtifact => "remove_artifact",
            Self::RemovePipeline => "remove_pipeline",
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RenderStyle {
    Plain,
    Ansi,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutationSummary {
    pub contract_version: String,
    pub mutation_id: Ulid,
    pub operation: MutationOperation,
    pub facts: Vec<Fact>,
}

impl MutationSummary {
    #[must_use]
    pub fn new(operation: MutationOperation) -> Self {
        Self {
            contract_version: SUMMARY_CONTRACT_VERSION.to_string(),
            mutation_id: Ulid::new(),
            operation,
            facts: Vec::new(),
        }
    }

    pub fn push(&mut self, fact: Fact) {
        self.facts.push(fact);
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.facts.iter().filter(|fact| fact.is_write()).count()
    }

    /// True when every step found its entity already in place.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.write_count() == 0
    }

    #[must_use]
    pub fn render(&self, style: RenderStyle) -> String {
        let paint = Painter { style };
        let mut out = String::new();
        for fact in &self.facts {
            out.push_str(&paint.line(fact));
            out.push('\n');
        }
        out
    }
}

#[derive(Clone, Copy)]
enum Tone {
    Artifact,
    Pipeline,
    Created,
    Connected,
    Deleted,
}

impl Tone {
    fn code(self) -> &'static str {
        match self {
            Self::Artifact => "\u{1b}[94m",
            Self::Pipeline => "\u{1b}[95m",
            Self::Created => "\u{1b}[1;92m",
            Self::Connected => "\u{1b}[1;93m",
            Self::Deleted => "\u{1b}[1;91m",
        }
    }
}

struct Painter {
    style: RenderStyle,
}

impl Painter {
    fn paint(&self, tone: Tone, text: &str) -> String {
        match self.style {
            RenderStyle::Plain => text.to_string(),
            RenderStyle::Ansi => format!("{}{text}\u{1b}[0m", tone.code()),
        }
    }

    fn artifact(&self, name: &str) -> String {
        self.paint(Tone::Artifact, name)
    }

    fn pipeline(&self, name: &str) -> String {
        self.paint(Tone::Pipeline, name)
    }

    fn line(&self, fact: &Fact) -> String {
        let created = self.paint(Tone::Created, "CREATED");
        let connected = self.paint(Tone::Connected, "CONNECTED");
        let deleted = self.paint(Tone::Deleted, "DELETED");

        match fact {
            Fact::ArtifactCreated { artifact, .. } => {
                format!("{created} artifact {}.", self.artifact(artifact))
            }
            Fact::PipelineCreated { pipeline } => {
                format!("{created} pipeline {}.", self.pipeline(pipeline))
            }
            Fact::MembershipAdded { artifact, pipeline } => format!(
                "{connected} artifact {} to pipeline {}.",
                self.artifact(artifact),
                self.pipeline(pipeline)
            ),
            Fact::ConnectionCreated {
                source,
                target,
                pipeline,
            } => format!(
                "{connected} {} to {} within pipeline {}.",
                self.artifact(source),
                self.artifact(target),
                self.pipeline(pipeline)
            ),
            Fact::AlreadyExisted { entity } => match entity {
                ExistingEntity::Artifact { name } => {
                    format!("Artifact {} already exists.", self.artifact(name))
                }
                ExistingEntity::Pipeline { name } => {
                    format!("Pipeline {} found.", self.pipeline(name))
                }
                ExistingEntity::Membership { artifact, pipeline } => format!(
                    "Artifact {} is already linked to pipeline {}.",
                    self.artifact(artifact),
                    self.pipeline(pipeline)
                ),
                ExistingEntity::Connection {
                    source,
                    target,
                    pipeline,
                } => format!(
                    "Connection between {} and {} already exists within pipeline {}.",
                    self.artifact(source),
                    self.artifact(target),
                    self.pipeline(pipeline)
                ),
            },
            Fact::NoPipelineLinked { .. } => "No pipeline linked.".to_string(),
            Fact::SourceLinkDeferred { source, pipeline } => format!(
                "Source {} was not linked: pipeline {} was created by this call.",
                self.artifact(source),
                self.pipeline(pipeline)
            ),
            Fact::ArtifactRemoved {
                artifact,
                connections_removed,
                memberships_removed,
            } => format!(
                "{deleted} artifact {} ({connections_removed} connections, {memberships_removed} pipeline memberships removed).",
                self.artifact(artifact)
            ),
            Fact::PipelineRemoved {
                pipeline,
                connections_removed,
            } => format!(
                "{deleted} pipeline {} ({connections_removed} connections removed).",
                self.pipeline(pipeline)
            ),
        }
    }
}

/// Parses an RFC3339 timestamp and requires a UTC offset.
///
/// # Errors
/// Returns [`GraphError::Validation`] when parsing fails or the offset is not
/// UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, GraphError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| GraphError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(GraphError::Validation(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`GraphError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, GraphError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| GraphError::Validation(format!("failed to format RFC3339 timestamp: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn owner(raw: &str) -> OwnerId {
        must_ok(OwnerId::parse(raw))
    }

    fn register(name: &str, pipeline: Option<&str>, source: Option<&str>) -> RegisterArtifact {
        RegisterArtifact {
            name: name.to_string(),
            artifact_type: ArtifactType::Dataset,
            owner: owner("u1"),
            pipeline: pipeline.map(str::to_string),
            source: source.map(str::to_string),
        }
    }

    #[test]
    fn artifact_type_parse_matches_as_str() {
        for artifact_type in ArtifactType::ALL {
            assert_eq!(ArtifactType::parse(artifact_type.as_str()), Some(artifact_type));
        }
        assert_eq!(ArtifactType::parse("notebook"), None);
        assert_eq!(ArtifactType::parse("Dataset"), None);
    }

    #[test]
    fn owner_id_rejects_blank_values() {
        assert!(OwnerId::parse("").is_err());
        assert!(OwnerId::parse("   ").is_err());
        assert_eq!(owner("alice").as_str(), "alice");
    }

    #[test]
    fn can_modify_compares_owner_strings() {
        let pipeline = Pipeline {
            id: 1,
            name: "WPF".to_string(),
            owner_id: owner("owner1"),
            created_at: now_utc(),
        };
        assert!(pipeline.can_modify(&owner("owner1")));
        assert!(!pipeline.can_modify(&owner("owner2")));
        assert!(!pipeline.can_modify(&owner("Owner1")));
    }

    #[test]
    fn register_validation_rejects_source_without_pipeline() {
        let err = register("clean.csv", None, Some("raw.csv")).validate();
        assert_eq!(
            err,
            Err(GraphError::Validation(
                "source artifact specified without pipeline".to_string()
            ))
        );
    }

    #[test]
    fn register_validation_rejects_self_source_and_blank_names() {
        assert!(register("a", Some("P"), Some("a")).validate().is_err());
        assert!(register(" ", None, None).validate().is_err());
        assert!(register("a", Some(""), None).validate().is_err());
        must_ok(register("a", Some("P"), Some("b")).validate());
        must_ok(register("a", None, None).validate());
    }

    #[test]
    fn connection_validation_rejects_self_edges() {
        let request = CreateConnection {
            source: "x".to_string(),
            target: "x".to_string(),
            pipeline: "P".to_string(),
            owner: owner("u1"),
        };
        assert!(matches!(request.validate(), Err(GraphError::Validation(_))));
    }

    #[test]
    fn error_kinds_have_stable_codes() {
        let cases = [
            (GraphError::not_found(EntityKind::Artifact, "a"), "not_found"),
            (
                GraphError::permission_denied(EntityKind::Pipeline, "p"),
                "permission_denied",
            ),
            (GraphError::Validation("bad".to_string()), "validation"),
            (
                GraphError::NotEmpty {
                    pipeline: "p".to_string(),
                    members: 2,
                },
                "not_empty",
            ),
            (GraphError::Storage("io".to_string()), "storage"),
        ];
        for (err, code) in cases {
            assert_eq!(err.kind().as_str(), code);
        }
        assert_eq!(
            GraphError::not_found(EntityKind::Pipeline, "WPF").to_string(),
            "pipeline 'WPF' not found"
        );
    }

    #[test]
    fn policy_from_json_fills_defaults_and_validates() {
        let policy = must_ok(GraphPolicy::from_json(&json!({"new_pipeline_source": "link"})));
        assert_eq!(policy.new_pipeline_source, NewPipelineSource::Link);
        assert_eq!(policy.busy_timeout_ms, 5_000);

        assert!(GraphPolicy::from_json(&json!({"busy_timeout_ms": 0})).is_err());
        assert!(GraphPolicy::from_json(&json!({"unknown": true})).is_err());
        assert!(GraphPolicy::from_json(&json!({"new_pipeline_source": "maybe"})).is_err());
    }

    #[test]
    fn summary_json_shape_is_tagged() {
        let mut summary = MutationSummary::new(MutationOperation::RegisterArtifact);
        summary.push(Fact::ArtifactCreated {
            artifact: "raw.csv".to_string(),
            artifact_type: ArtifactType::Dataset,
        });
        summary.push(Fact::AlreadyExisted {
            entity: ExistingEntity::Pipeline {
                name: "WPF".to_string(),
            },
        });

        let value = must_ok(serde_json::to_value(&summary));
        assert_eq!(value["contract_version"], json!("mutation_summary.v1"));
        assert_eq!(value["operation"], json!("register_artifact"));
        assert_eq!(
            value["facts"],
            json!([
                {"fact": "artifact_created", "artifact": "raw.csv", "artifact_type": "dataset"},
                {"fact": "already_existed", "entity": {"kind": "pipeline", "name": "WPF"}}
            ])
        );
        assert_eq!(summary.write_count(), 1);
        assert!(!summary.is_noop());
    }

    #[test]
    fn plain_render_reads_like_the_protocol_log() {
        let mut summary = MutationSummary::new(MutationOperation::RegisterArtifact);
        summary.push(Fact::ArtifactCreated {
            artifact: "clean.csv".to_string(),
            artifact_type: ArtifactType::Dataset,
        });
        summary.push(Fact::AlreadyExisted {
            entity: ExistingEntity::Pipeline {
                name: "WPF".to_string(),
            },
        });
        summary.push(Fact::MembershipAdded {
            artifact: "clean.csv".to_string(),
            pipeline: "WPF".to_string(),
        });
        summary.push(Fact::ConnectionCreated {
            source: "raw.csv".to_string(),
            target: "clean.csv".to_string(),
            pipeline: "WPF".to_string(),
        });

        assert_eq!(
            summary.render(RenderStyle::Plain),
            "CREATED artifact clean.csv.\n\
             Pipeline WPF found.\n\
             CONNECTED artifact clean.csv to pipeline WPF.\n\
             CONNECTED raw.csv to clean.csv within pipeline WPF.\n"
        );
    }

    #[test]
    fn ansi_render_wraps_names_in_color_codes() {
        let mut summary = MutationSummary::new(MutationOperation::RemovePipeline);
        summary.push(Fact::PipelineRemoved {
            pipeline: "WPF".to_string(),
            connections_removed: 0,
        });
        let rendered = summary.render(RenderStyle::Ansi);
        assert!(rendered.contains("\u{1b}[1;91mDELETED\u{1b}[0m"));
        assert!(rendered.contains("\u{1b}[95mWPF\u{1b}[0m"));
    }

    #[test]
    fn rfc3339_helpers_round_trip_utc_only() {
        let parsed = must_ok(parse_rfc3339_utc("2026-02-07T12:00:00Z"));
        assert_eq!(must_ok(format_rfc3339(parsed)), "2026-02-07T12:00:00Z");
        assert!(parse_rfc3339_utc("2026-02-07T12:00:00+02:00").is_err());
    }
}
