use std::path::PathBuf;
use std::process::ExitCode;

use api_topology_core::pipeline::run::{run_pipeline, Notifier};
use api_topology_core::pipeline::plan_pipeline;
use api_topology_deploy::adapters::command::ProcessCommandRunner;
use api_topology_deploy::adapters::notifier::{LogNotifier, SnsNotifier};
use api_topology_deploy::adapters::parameter_store::SsmParameterStore;
use api_topology_deploy::error::DeployError;
use api_topology_deploy::handlers::pipeline::{load_pipeline_config, CommandStageExecutor};
use api_topology_deploy::logging;
use clap::Parser;

/// Plan the delivery pipeline and either print the plan or run it locally.
#[derive(Parser)]
#[command(name = "run_pipeline")]
struct Args {
    #[arg(long, default_value = "config/pipeline.json")]
    config: PathBuf,
    /// Print the stage plan for the CI runner and exit
    #[arg(long)]
    plan_only: bool,
    /// Notification topic overriding the descriptor's
    #[arg(long, env = "NOTIFY_TOPIC_ARN")]
    topic_arn: Option<String>,
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

async fn run(args: Args) -> Result<bool, DeployError> {
    let mut config = load_pipeline_config(&args.config)?;
    if args.topic_arn.is_some() {
        config.notify.topic_arn = args.topic_arn;
    }

    let plan = plan_pipeline(&config)?;
    if args.plan_only {
        println!("{}", plan.to_json_pretty()?);
        return Ok(true);
    }

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let store = SsmParameterStore::new(aws_sdk_ssm::Client::new(&aws_config));
    let runner = ProcessCommandRunner::new();
    let mut executor = CommandStageExecutor::new(&config, &runner, &store);

    let sns_notifier = config
        .notify
        .topic_arn
        .as_ref()
        .map(|topic_arn| SnsNotifier::new(aws_sdk_sns::Client::new(&aws_config), topic_arn));
    let notifier: &dyn Notifier = match &sns_notifier {
        Some(notifier) => notifier,
        None => &LogNotifier,
    };

    let report = run_pipeline(&plan, &mut executor, notifier);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.succeeded())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(&args.log_level);

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            tracing::error!(component = "pipeline", event = "pipeline_aborted", error = %error);
            ExitCode::FAILURE
        }
    }
}
