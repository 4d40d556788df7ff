//! Sequential execution of a [`PipelinePlan`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ArtifactRef, PipelinePlan, PipelineStageSpec, StageKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResult {
    Succeeded {
        outputs: BTreeMap<ArtifactRef, String>,
    },
    Failed {
        reason: String,
    },
}

impl StageResult {
    pub fn succeeded() -> Self {
        Self::Succeeded {
            outputs: BTreeMap::new(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Runs the work of one stage. `inputs` holds exactly the artifacts the
/// stage declares.
pub trait StageExecutor {
    fn execute(
        &mut self,
        stage: &PipelineStageSpec,
        inputs: &BTreeMap<ArtifactRef, String>,
    ) -> StageResult;
}

pub trait Notifier {
    fn notify(&self, notification: &PipelineNotification) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed { reason: String },
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub kind: StageKind,
    #[serde(flatten)]
    pub status: StageStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineNotification {
    pub pipeline: String,
    pub status: PipelineStatus,
    pub failed_stage: Option<String>,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub pipeline: String,
    pub status: PipelineStatus,
    pub stages: Vec<StageRecord>,
    pub artifacts: BTreeMap<ArtifactRef, String>,
    pub notification_error: Option<String>,
}

impl PipelineReport {
    pub fn stage_status(&self, kind: StageKind) -> Option<&StageStatus> {
        self.stages
            .iter()
            .find(|record| record.kind == kind)
            .map(|record| &record.status)
    }

    pub fn succeeded(&self) -> bool {
        self.status == PipelineStatus::Succeeded
    }
}

/// Runs every stage in plan order. The first failure stops all later stages
/// except notify, which runs once with the final status. Nothing is retried.
pub fn run_pipeline(
    plan: &PipelinePlan,
    executor: &mut dyn StageExecutor,
    notifier: &dyn Notifier,
) -> PipelineReport {
    let mut artifacts: BTreeMap<ArtifactRef, String> = BTreeMap::new();
    let mut records = Vec::with_capacity(plan.stages.len());
    let mut failure: Option<(String, String)> = None;

    for stage in plan.stages.iter().filter(|stage| stage.kind != StageKind::Notify) {
        if failure.is_some() {
            records.push(record(stage, StageStatus::NotRun));
            continue;
        }

        tracing::info!(
            component = "pipeline_runner",
            event = "stage_started",
            pipeline = %plan.name,
            stage = %stage.name,
        );

        let inputs: BTreeMap<ArtifactRef, String> = stage
            .inputs
            .iter()
            .filter_map(|input| {
                artifacts
                    .get(input)
                    .map(|value| (input.clone(), value.clone()))
            })
            .collect();

        let status = match executor.execute(stage, &inputs) {
            StageResult::Succeeded { outputs } => match missing_output(stage, &outputs) {
                Some(missing) => StageStatus::Failed {
                    reason: format!("stage did not produce declared artifact '{missing}'"),
                },
                None => {
                    for output in &stage.outputs {
                        if let Some(value) = outputs.get(output) {
                            artifacts.insert(output.clone(), value.clone());
                        }
                    }
                    StageStatus::Succeeded
                }
            },
            StageResult::Failed { reason } => StageStatus::Failed { reason },
        };

        match &status {
            StageStatus::Failed { reason } => {
                tracing::warn!(
                    component = "pipeline_runner",
                    event = "stage_failed",
                    pipeline = %plan.name,
                    stage = %stage.name,
                    reason = %reason,
                );
                failure = Some((stage.name.clone(), reason.clone()));
            }
            _ => tracing::info!(
                component = "pipeline_runner",
                event = "stage_succeeded",
                pipeline = %plan.name,
                stage = %stage.name,
            ),
        }
        records.push(record(stage, status));
    }

    let status = if failure.is_some() {
        PipelineStatus::Failed
    } else {
        PipelineStatus::Succeeded
    };

    let mut notification_error = None;
    if let Some(stage) = plan.stage(StageKind::Notify) {
        let notification = build_notification(&plan.name, failure.as_ref());
        let notify_status = match notifier.notify(&notification) {
            Ok(()) => StageStatus::Succeeded,
            Err(error) => {
                tracing::warn!(
                    component = "pipeline_runner",
                    event = "notification_failed",
                    pipeline = %plan.name,
                    error = %error,
                );
                notification_error = Some(error.clone());
                StageStatus::Failed { reason: error }
            }
        };
        records.push(record(stage, notify_status));
    }

    tracing::info!(
        component = "pipeline_runner",
        event = "pipeline_finished",
        pipeline = %plan.name,
        status = ?status,
    );

    PipelineReport {
        pipeline: plan.name.clone(),
        status,
        stages: records,
        artifacts,
        notification_error,
    }
}

fn record(stage: &PipelineStageSpec, status: StageStatus) -> StageRecord {
    StageRecord {
        name: stage.name.clone(),
        kind: stage.kind,
        status,
    }
}

fn missing_output<'a>(
    stage: &'a PipelineStageSpec,
    outputs: &BTreeMap<ArtifactRef, String>,
) -> Option<&'a ArtifactRef> {
    stage
        .outputs
        .iter()
        .find(|output| !outputs.contains_key(*output))
}

fn build_notification(pipeline: &str, failure: Option<&(String, String)>) -> PipelineNotification {
    match failure {
        None => PipelineNotification {
            pipeline: pipeline.to_string(),
            status: PipelineStatus::Succeeded,
            failed_stage: None,
            subject: format!("{pipeline}: succeeded"),
            message: format!("Pipeline {pipeline} completed all stages."),
        },
        Some((stage, reason)) => PipelineNotification {
            pipeline: pipeline.to_string(),
            status: PipelineStatus::Failed,
            failed_stage: Some(stage.clone()),
            subject: format!("{pipeline}: failed at {stage}"),
            message: format!("Pipeline {pipeline} failed at stage {stage}: {reason}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::pipeline::{plan_pipeline, DeployTarget, PipelineConfig};

    struct ScriptedExecutor {
        fail: Option<StageKind>,
        omit_outputs: Option<StageKind>,
        seen: Vec<(StageKind, BTreeMap<ArtifactRef, String>)>,
    }

    impl ScriptedExecutor {
        fn new() -> Self {
            Self {
                fail: None,
                omit_outputs: None,
                seen: Vec::new(),
            }
        }
    }

    impl StageExecutor for ScriptedExecutor {
        fn execute(
            &mut self,
            stage: &PipelineStageSpec,
            inputs: &BTreeMap<ArtifactRef, String>,
        ) -> StageResult {
            self.seen.push((stage.kind, inputs.clone()));
            if self.fail == Some(stage.kind) {
                return StageResult::failed("exit status 1");
            }
            if self.omit_outputs == Some(stage.kind) {
                return StageResult::succeeded();
            }
            StageResult::Succeeded {
                outputs: stage
                    .outputs
                    .iter()
                    .map(|output| (output.clone(), format!("{output}-value")))
                    .collect(),
            }
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        error: Option<String>,
        sent: RefCell<Vec<PipelineNotification>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: &PipelineNotification) -> Result<(), String> {
            self.sent.borrow_mut().push(notification.clone());
            match &self.error {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            }
        }
    }

    fn plan() -> PipelinePlan {
        let config = PipelineConfig::from_json_str(
            r#"{
                "name": "users-api-delivery",
                "source": {"repository": "https://example.com/users-api.git"},
                "deploy": {"service_name": "users-api", "stage": "dev", "artifact_bucket": "b"}
            }"#,
        )
        .expect("config should parse");
        assert!(matches!(config.deploy, Some(DeployTarget { .. })));
        plan_pipeline(&config).expect("plan should build")
    }

    #[test]
    fn successful_run_passes_artifacts_forward() {
        let mut executor = ScriptedExecutor::new();
        let notifier = RecordingNotifier::default();

        let report = run_pipeline(&plan(), &mut executor, &notifier);

        assert!(report.succeeded());
        let (_, gate_inputs) = executor
            .seen
            .iter()
            .find(|(kind, _)| *kind == StageKind::QaGate)
            .expect("gate executed");
        assert_eq!(
            gate_inputs.keys().cloned().collect::<Vec<_>>(),
            vec![ArtifactRef::gateway_url()]
        );
        let sent = notifier.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, PipelineStatus::Succeeded);
    }

    #[test]
    fn failure_halts_later_stages_and_notifies_failure() {
        let mut executor = ScriptedExecutor::new();
        executor.fail = Some(StageKind::Build);
        let notifier = RecordingNotifier::default();

        let report = run_pipeline(&plan(), &mut executor, &notifier);

        assert_eq!(report.status, PipelineStatus::Failed);
        assert_eq!(
            executor.seen.iter().map(|(kind, _)| *kind).collect::<Vec<_>>(),
            vec![StageKind::Source, StageKind::Build]
        );
        assert_eq!(report.stage_status(StageKind::DeployService), Some(&StageStatus::NotRun));
        assert_eq!(report.stage_status(StageKind::QaGate), Some(&StageStatus::NotRun));
        assert_eq!(report.stage_status(StageKind::Notify), Some(&StageStatus::Succeeded));

        let sent = notifier.sent.borrow();
        assert_eq!(sent[0].failed_stage.as_deref(), Some("build"));
        assert!(sent[0].message.contains("exit status 1"));
    }

    #[test]
    fn qa_gate_failure_fails_pipeline() {
        let mut executor = ScriptedExecutor::new();
        executor.fail = Some(StageKind::QaGate);
        let notifier = RecordingNotifier::default();

        let report = run_pipeline(&plan(), &mut executor, &notifier);

        assert!(!report.succeeded());
        assert_eq!(
            notifier.sent.borrow()[0].failed_stage.as_deref(),
            Some("qa-gate")
        );
    }

    #[test]
    fn missing_declared_output_is_stage_failure() {
        let mut executor = ScriptedExecutor::new();
        executor.omit_outputs = Some(StageKind::DeployService);
        let notifier = RecordingNotifier::default();

        let report = run_pipeline(&plan(), &mut executor, &notifier);

        assert!(!report.succeeded());
        assert!(matches!(
            report.stage_status(StageKind::DeployService),
            Some(StageStatus::Failed { reason }) if reason.contains("gateway_url")
        ));
        assert_eq!(report.stage_status(StageKind::QaGate), Some(&StageStatus::NotRun));
    }

    #[test]
    fn notification_error_does_not_change_status() {
        let mut executor = ScriptedExecutor::new();
        let notifier = RecordingNotifier {
            error: Some("topic not found".to_string()),
            ..RecordingNotifier::default()
        };

        let report = run_pipeline(&plan(), &mut executor, &notifier);

        assert!(report.succeeded());
        assert_eq!(report.notification_error.as_deref(), Some("topic not found"));
    }
}
