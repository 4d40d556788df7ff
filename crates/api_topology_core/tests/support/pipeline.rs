#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use api_topology_core::pipeline::run::{
    Notifier, PipelineNotification, StageExecutor, StageResult,
};
use api_topology_core::pipeline::{ArtifactRef, PipelineStageSpec, StageKind};

/// Executor that succeeds with synthetic outputs unless a stage is scripted
/// to fail, and records what each stage received.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    failures: BTreeMap<StageKind, String>,
    pub calls: Vec<(StageKind, BTreeMap<ArtifactRef, String>)>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, kind: StageKind, reason: &str) -> Self {
        self.failures.insert(kind, reason.to_string());
        self
    }

    pub fn executed(&self) -> Vec<StageKind> {
        self.calls.iter().map(|(kind, _)| *kind).collect()
    }

    pub fn inputs_of(&self, kind: StageKind) -> Option<&BTreeMap<ArtifactRef, String>> {
        self.calls
            .iter()
            .find(|(executed, _)| *executed == kind)
            .map(|(_, inputs)| inputs)
    }
}

impl StageExecutor for ScriptedExecutor {
    fn execute(
        &mut self,
        stage: &PipelineStageSpec,
        inputs: &BTreeMap<ArtifactRef, String>,
    ) -> StageResult {
        self.calls.push((stage.kind, inputs.clone()));
        if let Some(reason) = self.failures.get(&stage.kind) {
            return StageResult::failed(reason.clone());
        }
        let outputs = stage
            .outputs
            .iter()
            .map(|output| {
                let value = if output.as_str() == ArtifactRef::GATEWAY_URL {
                    "https://abc123.execute-api.eu-west-1.amazonaws.com/dev/".to_string()
                } else {
                    format!("{output}@{}", stage.name)
                };
                (output.clone(), value)
            })
            .collect();
        StageResult::Succeeded { outputs }
    }
}

#[derive(Debug, Default)]
pub struct CapturingNotifier {
    pub sent: Mutex<Vec<PipelineNotification>>,
    pub fail_with: Option<String>,
}

impl CapturingNotifier {
    pub fn sent(&self) -> Vec<PipelineNotification> {
        self.sent.lock().expect("notifier mutex").clone()
    }
}

impl Notifier for CapturingNotifier {
    fn notify(&self, notification: &PipelineNotification) -> Result<(), String> {
        self.sent
            .lock()
            .map_err(|_| "notifier mutex poisoned".to_string())?
            .push(notification.clone());
        match &self.fail_with {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
