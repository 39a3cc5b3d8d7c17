//! Command surface for the provenance graph.
//!
//! Hosts embed it through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_command_with_db`] for executing one [`Command`] against a DB path.
//! - [`run_command`] for execution against an existing [`SqliteGraphStore`].
//!
//! Queries print pretty JSON. Mutations print the rendered summary, or the
//! summary JSON with `--json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use provgraph_core::{
    ArtifactType, CreateConnection, ErrorKind, GraphError, GraphPolicy, MutationSummary,
    NewPipelineSource, OwnerId, RegisterArtifact, RenderStyle,
};
use provgraph_store_sqlite::SqliteGraphStore;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "provgraph")]
#[command(about = "Provenance graph of ML pipeline artifacts")]
pub struct Cli {
    #[arg(
        long,
        env = "PROVGRAPH_DB",
        default_value = "./provgraph.sqlite3",
        global = true
    )]
    db: PathBuf,

    /// Identity recorded as owner of created entities; required by mutations.
    #[arg(long, env = "PROVGRAPH_OWNER", global = true)]
    owner: Option<String>,

    /// JSON file holding a graph policy.
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    #[arg(long, value_enum, global = true)]
    new_pipeline_source: Option<NewPipelineSourceArg>,

    /// Print mutation summaries as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Color rendered mutation summaries with ANSI escapes.
    #[arg(long, global = true, conflicts_with = "json")]
    color: bool,

    /// Tracing filter directives; overrides `RUST_LOG`.
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    #[must_use]
    pub fn log_filter(&self) -> Option<&str> {
        self.log_filter.as_deref()
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register an artifact, optionally in a pipeline and connected from a source.
    Register(RegisterArgs),
    /// Connect two existing artifacts inside an existing pipeline.
    Connect(ConnectArgs),
    Artifacts {
        #[command(subcommand)]
        command: ArtifactsCommand,
    },
    Pipelines {
        #[command(subcommand)]
        command: PipelinesCommand,
    },
    Connections {
        #[command(subcommand)]
        command: ConnectionsCommand,
    },
    Stats,
}

#[derive(Debug, Args)]
pub struct RegisterArgs {
    #[arg(long)]
    name: String,
    #[arg(long = "type", value_enum)]
    artifact_type: ArtifactTypeArg,
    #[arg(long)]
    pipeline: Option<String>,
    #[arg(long)]
    source: Option<String>,
}

#[derive(Debug, Args)]
pub struct ConnectArgs {
    #[arg(long)]
    source: String,
    #[arg(long)]
    target: String,
    #[arg(long)]
    pipeline: String,
}

#[derive(Debug, Args)]
pub struct NameArgs {
    name: String,
}

#[derive(Debug, Subcommand)]
pub enum ArtifactsCommand {
    List(ArtifactsListArgs),
    Show(NameArgs),
    /// Artifacts directly upstream or downstream of the named one.
    Neighbors(NameArgs),
    Remove(NameArgs),
}

#[derive(Debug, Args)]
pub struct ArtifactsListArgs {
    #[arg(long)]
    pipeline: Option<String>,
    #[arg(long = "type", value_enum, requires = "pipeline")]
    artifact_type: Option<ArtifactTypeArg>,
}

#[derive(Debug, Subcommand)]
pub enum PipelinesCommand {
    List(PipelinesListArgs),
    Show(NameArgs),
    Remove(NameArgs),
}

#[derive(Debug, Args)]
pub struct PipelinesListArgs {
    #[arg(long)]
    artifact: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ConnectionsCommand {
    List(ConnectionsListArgs),
}

#[derive(Debug, Args)]
pub struct ConnectionsListArgs {
    #[arg(long)]
    pipeline: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ArtifactTypeArg {
    Dataset,
    Code,
    Model,
    Hyperparameters,
    Parameters,
    Results,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum NewPipelineSourceArg {
    Skip,
    Link,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SummaryFormat {
    Text(RenderStyle),
    Json,
}

/// Per-invocation settings that are not part of a [`Command`].
#[derive(Debug, Clone)]
pub struct Invocation {
    pub owner: Option<String>,
    pub format: SummaryFormat,
}

/// Executes the parsed top-level CLI command.
///
/// # Errors
/// Returns an error when the policy cannot be loaded, the store cannot be
/// opened or migrated, or the command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let policy = load_policy(cli.policy.as_deref(), cli.new_pipeline_source)?;
    let invocation = Invocation {
        owner: cli.owner,
        format: if cli.json {
            SummaryFormat::Json
        } else if cli.color {
            SummaryFormat::Text(RenderStyle::Ansi)
        } else {
            SummaryFormat::Text(RenderStyle::Plain)
        },
    };
    run_command_with_db(&cli.db, policy, cli.command, &invocation)
}

/// Executes one command using the provided `SQLite` DB path.
///
/// # Errors
/// Returns an error when store open/migrate fails or the command fails.
pub fn run_command_with_db(
    db_path: &Path,
    policy: GraphPolicy,
    command: Command,
    invocation: &Invocation,
) -> Result<()> {
    tracing::debug!(db = %db_path.display(), policy = ?policy, "opening graph store");
    let mut store = SqliteGraphStore::open_with_policy(db_path, policy)?;
    store.migrate()?;
    run_command(command, invocation, &mut store)
}

/// Executes one command against an existing store handle and prints its
/// output to stdout.
///
/// # Errors
/// Returns an error when validation, ownership checks, or persistence fail.
pub fn run_command(
    command: Command,
    invocation: &Invocation,
    store: &mut SqliteGraphStore,
) -> Result<()> {
    let output = execute(command, invocation, store)?;
    print!("{output}");
    Ok(())
}

fn execute(
    command: Command,
    invocation: &Invocation,
    store: &mut SqliteGraphStore,
) -> Result<String> {
    match command {
        Command::Register(args) => {
            let request = RegisterArtifact {
                name: args.name,
                artifact_type: map_artifact_type(args.artifact_type),
                owner: require_owner(invocation)?,
                pipeline: args.pipeline,
                source: args.source,
            };
            let summary = store.register_artifact(&request)?;
            render_summary(&summary, invocation.format)
        }
        Command::Connect(args) => {
            let request = CreateConnection {
                source: args.source,
                target: args.target,
                pipeline: args.pipeline,
                owner: require_owner(invocation)?,
            };
            let summary = store.create_connection(&request)?;
            render_summary(&summary, invocation.format)
        }
        Command::Artifacts { command } => execute_artifacts(command, invocation, store),
        Command::Pipelines { command } => execute_pipelines(command, invocation, store),
        Command::Connections { command } => match command {
            ConnectionsCommand::List(args) => match args.pipeline {
                Some(pipeline) => pretty(&store.list_connections_by_pipeline(&pipeline)?),
                None => pretty(&store.list_connections()?),
            },
        },
        Command::Stats => pretty(&store.stats()?),
    }
}

fn execute_artifacts(
    command: ArtifactsCommand,
    invocation: &Invocation,
    store: &mut SqliteGraphStore,
) -> Result<String> {
    match command {
        ArtifactsCommand::List(args) => match (args.pipeline, args.artifact_type) {
            (Some(pipeline), Some(artifact_type)) => pretty(
                &store.list_artifacts_by_type(&pipeline, map_artifact_type(artifact_type))?,
            ),
            (Some(pipeline), None) => pretty(&store.list_artifacts_by_pipeline(&pipeline)?),
            (None, _) => pretty(&store.list_artifacts()?),
        },
        ArtifactsCommand::Show(args) => pretty(&store.get_artifact(&args.name)?),
        ArtifactsCommand::Neighbors(args) => pretty(&store.list_neighbors(&args.name)?),
        ArtifactsCommand::Remove(args) => {
            let owner = require_owner(invocation)?;
            let summary = store.remove_artifact(&args.name, &owner)?;
            render_summary(&summary, invocation.format)
        }
    }
}

fn execute_pipelines(
    command: PipelinesCommand,
    invocation: &Invocation,
    store: &mut SqliteGraphStore,
) -> Result<String> {
    match command {
        PipelinesCommand::List(args) => match args.artifact {
            Some(artifact) => pretty(&store.list_pipelines_by_artifact(&artifact)?),
            None => pretty(&store.list_pipelines()?),
        },
        PipelinesCommand::Show(args) => pretty(&store.get_pipeline(&args.name)?),
        PipelinesCommand::Remove(args) => {
            let owner = require_owner(invocation)?;
            let summary = store.remove_pipeline(&args.name, &owner)?;
            render_summary(&summary, invocation.format)
        }
    }
}

fn require_owner(invocation: &Invocation) -> Result<OwnerId> {
    let Some(raw) = invocation.owner.as_deref() else {
        return Err(GraphError::Validation(
            "--owner (or PROVGRAPH_OWNER) is required for mutating commands".to_string(),
        )
        .into());
    };
    Ok(OwnerId::parse(raw)?)
}

fn render_summary(summary: &MutationSummary, format: SummaryFormat) -> Result<String> {
    match format {
        SummaryFormat::Text(style) => Ok(summary.render(style)),
        SummaryFormat::Json => pretty(summary),
    }
}

fn pretty<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut body = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    body.push('\n');
    Ok(body)
}

/// Loads the graph policy from an optional JSON file, then applies the
/// command-line override.
///
/// # Errors
/// Returns an error when the file cannot be read or holds an invalid policy.
pub fn load_policy(
    path: Option<&Path>,
    new_pipeline_source: Option<NewPipelineSourceArg>,
) -> Result<GraphPolicy> {
    let mut policy = match path {
        Some(path) => {
            let body = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read policy file {}", path.display()))?;
            let value: Value = serde_json::from_str(&body)
                .with_context(|| format!("policy file {} is not valid JSON", path.display()))?;
            GraphPolicy::from_json(&value)?
        }
        None => GraphPolicy::default(),
    };

    if let Some(value) = new_pipeline_source {
        policy.new_pipeline_source = match value {
            NewPipelineSourceArg::Skip => NewPipelineSource::Skip,
            NewPipelineSourceArg::Link => NewPipelineSource::Link,
        };
    }
    Ok(policy)
}

fn map_artifact_type(value: ArtifactTypeArg) -> ArtifactType {
    match value {
        ArtifactTypeArg::Dataset => ArtifactType::Dataset,
        ArtifactTypeArg::Code => ArtifactType::Code,
        ArtifactTypeArg::Model => ArtifactType::Model,
        ArtifactTypeArg::Hyperparameters => ArtifactType::Hyperparameters,
        ArtifactTypeArg::Parameters => ArtifactType::Parameters,
        ArtifactTypeArg::Results => ArtifactType::Results,
    }
}

/// Wraps an argument parsing failure as a validation error so it reaches
/// stderr through the same envelope as every other failure.
#[must_use]
pub fn usage_error(err: &clap::Error) -> anyhow::Error {
    GraphError::Validation(err.to_string().trim_end().to_string()).into()
}

fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.downcast_ref::<GraphError>().map(GraphError::kind)
}

/// Stable code for the error envelope: the graph error kind, or `internal`.
#[must_use]
pub fn error_code(err: &anyhow::Error) -> &'static str {
    error_kind(err).map_or("internal", ErrorKind::as_str)
}

#[must_use]
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match error_kind(err) {
        Some(ErrorKind::Validation) => 2,
        Some(ErrorKind::NotFound) => 3,
        Some(ErrorKind::PermissionDenied) => 4,
        Some(ErrorKind::NotEmpty) => 5,
        Some(ErrorKind::Storage) | None => 1,
    }
}

/// Single-line JSON error envelope written to stderr on failure.
#[must_use]
pub fn error_envelope(err: &anyhow::Error) -> String {
    serde_json::json!({
        "code": error_code(err),
        "message": format!("{err:#}"),
    })
    .to_string()
}
