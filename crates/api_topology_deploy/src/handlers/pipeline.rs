use std::collections::BTreeMap;
use std::path::Path;

use api_topology_core::pipeline::run::{StageExecutor, StageResult};
use api_topology_core::pipeline::{ArtifactRef, PipelineConfig, PipelineStageSpec, StageKind};
use api_topology_core::qa_gate::GateVerdict;

use crate::adapters::command::CommandRunner;
use crate::adapters::parameter_store::ParameterStore;
use crate::error::DeployError;
use crate::handlers::qa_gate::gate_url;
use crate::handlers::synth::{load_topology_config, ConfigOverrides};

/// Reads a pipeline descriptor and checks its deploy target against the
/// topology descriptor it points at.
pub fn load_pipeline_config(path: &Path) -> Result<PipelineConfig, DeployError> {
    let text = std::fs::read_to_string(path)
        .map_err(|error| DeployError::io(format!("failed to read {}", path.display()), error))?;
    let config = PipelineConfig::from_json_str(&text)?;
    if let Some(target) = &config.deploy {
        let topology = load_topology_config(
            Path::new(&target.topology_config),
            &ConfigOverrides::default(),
        )?;
        target.check_topology(&topology)?;
    }
    Ok(config)
}

/// Local stand-in for the CI runner: runs each stage's commands in order
/// and derives the stage outputs.
pub struct CommandStageExecutor<'a> {
    config: &'a PipelineConfig,
    runner: &'a dyn CommandRunner,
    store: &'a dyn ParameterStore,
}

impl<'a> CommandStageExecutor<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        runner: &'a dyn CommandRunner,
        store: &'a dyn ParameterStore,
    ) -> Self {
        Self {
            config,
            runner,
            store,
        }
    }

    fn run_commands(&self, stage: &PipelineStageSpec) -> Result<(), String> {
        for command in &stage.commands {
            let outcome = self.runner.run(command)?;
            if !outcome.success() {
                return Err(match outcome.exit_code {
                    Some(code) => format!("`{command}` exited with status {code}"),
                    None => format!("`{command}` was terminated by a signal"),
                });
            }
        }
        Ok(())
    }

    fn gateway_url(&self) -> Result<String, String> {
        let target = self
            .config
            .deploy
            .as_ref()
            .ok_or_else(|| "no deploy target configured".to_string())?;
        let parameter = self.url_parameter(&target.url_parameter());
        match self.store.get_parameter(&parameter)? {
            Some(url) if !url.trim().is_empty() => Ok(url),
            _ => Err(format!("deployed stack did not publish {parameter}")),
        }
    }

    fn url_parameter(&self, derived: &str) -> String {
        self.config
            .qa_gate
            .url_parameter
            .clone()
            .unwrap_or_else(|| derived.to_string())
    }
}

impl StageExecutor for CommandStageExecutor<'_> {
    fn execute(
        &mut self,
        stage: &PipelineStageSpec,
        inputs: &BTreeMap<ArtifactRef, String>,
    ) -> StageResult {
        match stage.kind {
            StageKind::Source => match self.run_commands(stage) {
                Ok(()) => outputs([(
                    ArtifactRef::source(),
                    format!("{}@{}", self.config.source.repository, self.config.source.branch),
                )]),
                Err(reason) => StageResult::failed(reason),
            },
            StageKind::Build => match self.run_commands(stage) {
                Ok(()) => outputs([(ArtifactRef::build(), self.config.build.output_dir.clone())]),
                Err(reason) => StageResult::failed(reason),
            },
            StageKind::DeployService => {
                if let Err(reason) = self.run_commands(stage) {
                    return StageResult::failed(reason);
                }
                match self.gateway_url() {
                    Ok(url) => outputs([(ArtifactRef::gateway_url(), url)]),
                    Err(reason) => StageResult::failed(reason),
                }
            }
            StageKind::QaGate => {
                let Some(url) = inputs.get(&ArtifactRef::gateway_url()) else {
                    return StageResult::failed("gateway_url was not handed to the gate");
                };
                let parameter = self.config.deploy.as_ref().map_or_else(
                    || self.url_parameter(""),
                    |target| self.url_parameter(&target.url_parameter()),
                );
                match gate_url(&self.config.qa_gate, &parameter, url, self.runner) {
                    GateVerdict::Passed => StageResult::succeeded(),
                    GateVerdict::Failed { reason } => StageResult::failed(reason),
                }
            }
            StageKind::Notify => StageResult::succeeded(),
        }
    }
}

fn outputs<const N: usize>(values: [(ArtifactRef, String); N]) -> StageResult {
    StageResult::Succeeded {
        outputs: values.into_iter().collect(),
    }
}
