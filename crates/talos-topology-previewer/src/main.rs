//! Prints the resource graph a cluster definition would declare, without touching a cloud
//! account.
//!
//! The definition file is a [`ClusterDefinition`] with an additional `environment` section that
//! describes the account (networks, region and the addresses resources would get):
//!
//! ```yaml
//! environment:
//!   region: us-east-1
//!   networks:
//!     - id: vpc-0a1b2c
//!       publicSubnets: [subnet-1]
//! defaults:
//!   endpointToOverwrite: talos.cluster
//!   network: vpc-0a1b2c
//! controlPlane:
//!   name: cp
//!   nodeConfigFile: controlplane.yaml
//! ```
use std::{
    collections::BTreeMap,
    io::Write as _,
    path::{Path, PathBuf},
};

use clap::Parser;
use serde::{Deserialize, de::IgnoredAny};
use snafu::{ResultExt, Snafu, ensure};
use talos_topology::{
    cluster::{self, ClusterDefinition, assemble_cluster},
    logging::{self, initialize_logging},
    provision::{Blueprint, BlueprintEnvironment},
};

const APP_NAME: &str = "talos-topology-previewer";
const ENV_VAR_LOGGING: &str = "TALOS_TOPOLOGY_PREVIEWER_LOG";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to read cluster definition from {path}", path = path.display()))]
    ReadDefinition {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse cluster definition from {path}", path = path.display()))]
    ParseDefinition {
        source: serde_yaml::Error,
        path: PathBuf,
    },

    #[snafu(display("cluster definition has unknown fields {fields:?}"))]
    UnknownFields { fields: Vec<String> },

    #[snafu(display("failed to load node configs"))]
    LoadNodeConfigs { source: cluster::Error },

    #[snafu(display("failed to assemble cluster"))]
    AssembleCluster { source: cluster::Error },

    #[snafu(display("failed to render resource graph as YAML"))]
    RenderYaml { source: serde_yaml::Error },

    #[snafu(display("failed to render resource graph as JSON"))]
    RenderJson { source: serde_json::Error },

    #[snafu(display("failed to write resource graph"))]
    WriteOutput { source: std::io::Error },
}

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path of the cluster definition (YAML).
    definition: PathBuf,

    /// Directory `nodeConfigFile` paths are relative to. Defaults to the directory of the
    /// definition.
    #[arg(long)]
    base_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t)]
    output: OutputFormat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Preview {
    #[serde(default)]
    environment: BlueprintEnvironment,

    #[serde(flatten)]
    cluster: ClusterDefinition,

    /// Keys that are neither part of the environment nor the cluster definition.
    #[serde(flatten)]
    unknown: BTreeMap<String, IgnoredAny>,
}

#[snafu::report]
fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    initialize_logging(ENV_VAR_LOGGING, APP_NAME).context(InitializeLoggingSnafu)?;

    let base_dir = match cli.base_dir {
        Some(base_dir) => base_dir,
        None => cli
            .definition
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };

    let definition = std::fs::read_to_string(&cli.definition).context(ReadDefinitionSnafu {
        path: &cli.definition,
    })?;
    let preview: Preview = serde_yaml::from_str(&definition).context(ParseDefinitionSnafu {
        path: &cli.definition,
    })?;

    let rendered = render(preview, &base_dir, cli.output)?;
    std::io::stdout()
        .lock()
        .write_all(rendered.as_bytes())
        .context(WriteOutputSnafu)
}

/// Assembles the cluster into a [`Blueprint`] and renders its declarations.
fn render(preview: Preview, base_dir: &Path, output: OutputFormat) -> Result<String, Error> {
    let Preview {
        environment,
        mut cluster,
        unknown,
    } = preview;
    ensure!(
        unknown.is_empty(),
        UnknownFieldsSnafu {
            fields: unknown.into_keys().collect::<Vec<_>>(),
        }
    );
    cluster
        .load_node_configs(base_dir)
        .context(LoadNodeConfigsSnafu)?;

    let mut blueprint = Blueprint::new(environment);
    assemble_cluster(&mut blueprint, &cluster).context(AssembleClusterSnafu)?;
    tracing::debug!(
        declarations = blueprint.declarations().len(),
        "rendering resource graph"
    );

    match output {
        OutputFormat::Yaml => {
            serde_yaml::to_string(blueprint.declarations()).context(RenderYamlSnafu)
        }
        OutputFormat::Json => {
            serde_json::to_string_pretty(blueprint.declarations()).context(RenderJsonSnafu)
        }
    }
}
