use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use api_topology_core::parameter_keys::Stage;
use api_topology_core::profile::TopologyProfile;
use api_topology_deploy::adapters::artifact_store::{
    DistArtifacts, S3ArtifactUploader, DEFAULT_ARTIFACT_PREFIX, DEFAULT_DIST_DIR,
};
use api_topology_deploy::adapters::provisioner::CloudFormationProvisioner;
use api_topology_deploy::error::DeployError;
use api_topology_deploy::handlers::deploy::deploy_topology;
use api_topology_deploy::handlers::synth::{load_topology_config, ConfigOverrides};
use api_topology_deploy::logging;
use chrono::Utc;
use clap::Parser;

/// Upload function packages and create or update the service stack.
#[derive(Parser)]
#[command(name = "deploy_topology")]
struct Args {
    #[arg(long, default_value = "config/topology.json")]
    config: PathBuf,
    #[arg(long, env = "TOPOLOGY_STAGE")]
    stage: Option<Stage>,
    #[arg(long, env = "TOPOLOGY_PROFILE")]
    profile: Option<TopologyProfile>,
    #[arg(long, default_value = DEFAULT_DIST_DIR)]
    dist_dir: PathBuf,
    #[arg(long, env = "ARTIFACT_BUCKET")]
    artifact_bucket: String,
    #[arg(long, default_value = DEFAULT_ARTIFACT_PREFIX)]
    artifact_prefix: String,
    /// Seconds between stack status polls
    #[arg(long, default_value_t = 10)]
    poll_interval_secs: u64,
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

async fn run(args: Args) -> Result<(), DeployError> {
    let overrides = ConfigOverrides {
        stage: args.stage,
        profile: args.profile,
    };
    let config = load_topology_config(&args.config, &overrides)?;
    let artifacts = DistArtifacts::new(
        &args.dist_dir,
        args.artifact_bucket,
        args.artifact_prefix,
        config.service_name.clone(),
    )
    .for_build(Utc::now());

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let uploader = S3ArtifactUploader::new(aws_sdk_s3::Client::new(&aws_config));
    let provisioner =
        CloudFormationProvisioner::new(aws_sdk_cloudformation::Client::new(&aws_config))
            .with_poll_interval(Duration::from_secs(args.poll_interval_secs));

    let report = deploy_topology(&config, &artifacts, &uploader, &provisioner)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(&args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(component = "deploy", event = "deploy_failed", error = %error);
            ExitCode::FAILURE
        }
    }
}
