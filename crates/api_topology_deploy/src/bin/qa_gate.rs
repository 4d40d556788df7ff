use std::process::ExitCode;

use api_topology_core::qa_gate::{
    GateVerdict, QaGateConfig, DEFAULT_COLLECTION, DEFAULT_RUNNER, DEFAULT_URL_VARIABLE,
};
use api_topology_deploy::adapters::command::ProcessCommandRunner;
use api_topology_deploy::adapters::parameter_store::SsmParameterStore;
use api_topology_deploy::handlers::qa_gate::run_qa_gate;
use api_topology_deploy::logging;
use clap::Parser;

/// Run the contract-test collection against the published API URL.
#[derive(Parser)]
#[command(name = "qa_gate")]
struct Args {
    /// Parameter holding the deployed API's base URL
    #[arg(long, env = "API_URL_PARAMETER")]
    url_parameter: String,
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    collection: String,
    #[arg(long, default_value = DEFAULT_RUNNER)]
    runner: String,
    #[arg(long, default_value = DEFAULT_URL_VARIABLE)]
    url_variable: String,
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(&args.log_level);

    let config = QaGateConfig {
        url_parameter: Some(args.url_parameter.clone()),
        collection_path: args.collection,
        url_variable: args.url_variable,
        runner: args.runner,
    };
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let store = SsmParameterStore::new(aws_sdk_ssm::Client::new(&aws_config));

    match run_qa_gate(&config, &args.url_parameter, &store, &ProcessCommandRunner::new()) {
        GateVerdict::Passed => ExitCode::SUCCESS,
        GateVerdict::Failed { .. } => ExitCode::FAILURE,
    }
}
