use std::path::PathBuf;
use std::process::ExitCode;

use api_topology_core::parameter_keys::Stage;
use api_topology_core::profile::TopologyProfile;
use api_topology_deploy::adapters::artifact_store::{
    DistArtifacts, DEFAULT_ARTIFACT_PREFIX, DEFAULT_DIST_DIR,
};
use api_topology_deploy::error::DeployError;
use api_topology_deploy::handlers::synth::{
    load_topology_config, synthesize, write_template, ConfigOverrides,
};
use api_topology_deploy::logging;
use clap::Parser;

/// Render the topology template without deploying it.
#[derive(Parser)]
#[command(name = "synth_topology")]
struct Args {
    /// Topology descriptor file
    #[arg(long, default_value = "config/topology.json")]
    config: PathBuf,
    /// Stage overriding the descriptor's
    #[arg(long, env = "TOPOLOGY_STAGE")]
    stage: Option<Stage>,
    /// Profile overriding the descriptor's (full|reduced)
    #[arg(long, env = "TOPOLOGY_PROFILE")]
    profile: Option<TopologyProfile>,
    /// Directory holding `{function}.zip` packages
    #[arg(long, default_value = DEFAULT_DIST_DIR)]
    dist_dir: PathBuf,
    /// Bucket the packages are deployed from
    #[arg(long, env = "ARTIFACT_BUCKET", default_value = "artifacts")]
    artifact_bucket: String,
    #[arg(long, default_value = DEFAULT_ARTIFACT_PREFIX)]
    artifact_prefix: String,
    /// Skip the package existence check
    #[arg(long)]
    skip_package_check: bool,
    /// Write the template here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn run(args: Args) -> Result<(), DeployError> {
    let overrides = ConfigOverrides {
        stage: args.stage,
        profile: args.profile,
    };
    let config = load_topology_config(&args.config, &overrides)?;

    let mut artifacts = DistArtifacts::new(
        &args.dist_dir,
        args.artifact_bucket,
        args.artifact_prefix,
        config.service_name.clone(),
    );
    if args.skip_package_check {
        artifacts = artifacts.without_package_check();
    }

    let template = synthesize(&config, &artifacts)?;
    match args.output {
        Some(path) => write_template(&template, &path),
        None => {
            println!("{}", template.to_pretty_json());
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(&args.log_level);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(component = "synth", event = "synth_failed", error = %error);
            ExitCode::FAILURE
        }
    }
}
