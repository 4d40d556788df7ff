//! Delivery pipeline planning.
//!
//! Every candidate stage carries an [`InclusionPredicate`]. Predicates are
//! evaluated once, in ordinal order, when the plan is built; the resulting
//! [`PipelinePlan`] is a fixed list that the local runner and the CI runner
//! both consume unchanged.

pub mod run;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::parameter_keys::{api_url_parameter, Stage};
use crate::qa_gate::QaGateConfig;
use crate::topology::TopologyConfig;

pub const DEFAULT_TOPOLOGY_CONFIG: &str = "config/topology.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Source,
    Build,
    DeployService,
    QaGate,
    Notify,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Source,
        StageKind::Build,
        StageKind::DeployService,
        StageKind::QaGate,
        StageKind::Notify,
    ];

    pub fn ordinal(self) -> u32 {
        match self {
            Self::Source => 0,
            Self::Build => 1,
            Self::DeployService => 2,
            Self::QaGate => 3,
            Self::Notify => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Build => "build",
            Self::DeployService => "deploy-service",
            Self::QaGate => "qa-gate",
            Self::Notify => "notify",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of a value handed from one stage to a later one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub const SOURCE: &'static str = "source";
    pub const BUILD: &'static str = "build";
    pub const GATEWAY_URL: &'static str = "gateway_url";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn source() -> Self {
        Self::new(Self::SOURCE)
    }

    pub fn build() -> Self {
        Self::new(Self::BUILD)
    }

    pub fn gateway_url() -> Self {
        Self::new(Self::GATEWAY_URL)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InclusionPredicate {
    Always,
    DeployTargetConfigured,
    /// Holds when the deploy-service stage made it into the same plan.
    DeployStageIncluded,
}

impl InclusionPredicate {
    fn holds(self, config: &PipelineConfig, included: &[StageKind]) -> bool {
        match self {
            Self::Always => true,
            Self::DeployTargetConfigured => config.deploy.is_some(),
            Self::DeployStageIncluded => included.contains(&StageKind::DeployService),
        }
    }
}

/// One external process invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStageSpec {
    pub name: String,
    pub ordinal: u32,
    pub kind: StageKind,
    pub predicate: InclusionPredicate,
    #[serde(default)]
    pub inputs: BTreeSet<ArtifactRef>,
    #[serde(default)]
    pub outputs: BTreeSet<ArtifactRef>,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub repository: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_build_commands")]
    pub commands: Vec<CommandSpec>,
    /// Directory holding the packaged functions once the build succeeds.
    #[serde(default = "default_build_output")]
    pub output_dir: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            commands: default_build_commands(),
            output_dir: default_build_output(),
        }
    }
}

/// The service stack a pipeline run deploys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTarget {
    pub service_name: String,
    pub stage: Stage,
    pub artifact_bucket: String,
    #[serde(default = "default_topology_config")]
    pub topology_config: String,
}

impl DeployTarget {
    pub fn url_parameter(&self) -> String {
        api_url_parameter(&self.stage, &self.service_name)
    }

    /// The gate looks up the URL under this target's service name, so the
    /// deployed descriptor must publish under the same one.
    pub fn check_topology(&self, topology: &TopologyConfig) -> Result<(), PipelineError> {
        if topology.service_name != self.service_name {
            return Err(PipelineError::ServiceNameMismatch {
                target: self.service_name.clone(),
                topology_config: self.topology_config.clone(),
                declared: topology.service_name.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub topic_arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub source: SourceConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub deploy: Option<DeployTarget>,
    #[serde(default)]
    pub qa_gate: QaGateConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(text).map_err(|error| PipelineError::InvalidConfig(error.to_string()))
    }
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_build_commands() -> Vec<CommandSpec> {
    vec![CommandSpec::new("cargo").args([
        "run",
        "-p",
        "xtask",
        "--",
        "package-functions",
        "--profile",
        "release",
    ])]
}

fn default_build_output() -> String {
    "dist/functions".to_string()
}

fn default_topology_config() -> String {
    DEFAULT_TOPOLOGY_CONFIG.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelinePlan {
    pub name: String,
    pub stages: Vec<PipelineStageSpec>,
}

impl PipelinePlan {
    pub fn stage(&self, kind: StageKind) -> Option<&PipelineStageSpec> {
        self.stages.iter().find(|stage| stage.kind == kind)
    }

    pub fn contains(&self, kind: StageKind) -> bool {
        self.stage(kind).is_some()
    }

    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|stage| stage.kind).collect()
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Builds the stage list for one pipeline definition.
///
/// Inclusion is decided here and nowhere else: a pipeline without a deploy
/// target has neither a deploy-service nor a QA gate stage.
pub fn plan_pipeline(config: &PipelineConfig) -> Result<PipelinePlan, PipelineError> {
    if config.name.trim().is_empty() {
        return Err(PipelineError::EmptyName);
    }
    if config.source.repository.trim().is_empty() {
        return Err(PipelineError::InvalidConfig(
            "source repository cannot be empty".to_string(),
        ));
    }

    let mut included = Vec::new();
    let mut stages = Vec::new();
    for kind in StageKind::ALL {
        let candidate = candidate_stage(config, kind);
        if candidate.predicate.holds(config, &included) {
            included.push(kind);
            stages.push(candidate);
        }
    }

    validate_stages(&stages)?;

    tracing::debug!(
        component = "pipeline_planner",
        event = "pipeline_planned",
        pipeline = %config.name,
        stages = ?included,
    );

    Ok(PipelinePlan {
        name: config.name.clone(),
        stages,
    })
}

fn candidate_stage(config: &PipelineConfig, kind: StageKind) -> PipelineStageSpec {
    let mut stage = PipelineStageSpec {
        name: kind.as_str().to_string(),
        ordinal: kind.ordinal(),
        kind,
        predicate: InclusionPredicate::Always,
        inputs: BTreeSet::new(),
        outputs: BTreeSet::new(),
        commands: Vec::new(),
    };

    match kind {
        StageKind::Source => {
            stage.outputs.insert(ArtifactRef::source());
            stage.commands.push(CommandSpec::new("git").args([
                "ls-remote".to_string(),
                "--exit-code".to_string(),
                config.source.repository.clone(),
                format!("refs/heads/{}", config.source.branch),
            ]));
        }
        StageKind::Build => {
            stage.inputs.insert(ArtifactRef::source());
            stage.outputs.insert(ArtifactRef::build());
            stage.commands = config.build.commands.clone();
        }
        StageKind::DeployService => {
            stage.predicate = InclusionPredicate::DeployTargetConfigured;
            stage.inputs.insert(ArtifactRef::build());
            stage.outputs.insert(ArtifactRef::gateway_url());
            if let Some(target) = &config.deploy {
                stage.commands.push(CommandSpec::new("deploy_topology").args([
                    "--config".to_string(),
                    target.topology_config.clone(),
                    "--stage".to_string(),
                    target.stage.to_string(),
                    "--artifact-bucket".to_string(),
                    target.artifact_bucket.clone(),
                    "--dist-dir".to_string(),
                    config.build.output_dir.clone(),
                ]));
            }
        }
        StageKind::QaGate => {
            stage.predicate = InclusionPredicate::DeployStageIncluded;
            stage.inputs.insert(ArtifactRef::gateway_url());
            if let Some(target) = &config.deploy {
                let parameter = config
                    .qa_gate
                    .url_parameter
                    .clone()
                    .unwrap_or_else(|| target.url_parameter());
                stage.commands.push(config.qa_gate.plan_command(&parameter));
            }
        }
        StageKind::Notify => {}
    }
    stage
}

/// Checks ordering and artifact wiring of an already filtered stage list.
pub fn validate_stages(stages: &[PipelineStageSpec]) -> Result<(), PipelineError> {
    let mut previous: Option<u32> = None;
    let mut producers: BTreeMap<&ArtifactRef, &str> = BTreeMap::new();

    for stage in stages {
        if let Some(previous) = previous {
            if stage.ordinal <= previous {
                return Err(PipelineError::NonIncreasingOrdinal {
                    stage: stage.name.clone(),
                    ordinal: stage.ordinal,
                    previous,
                });
            }
        }
        previous = Some(stage.ordinal);

        for input in &stage.inputs {
            if !producers.contains_key(input) {
                return Err(PipelineError::ForwardArtifactReference {
                    stage: stage.name.clone(),
                    artifact: input.to_string(),
                });
            }
        }

        for output in &stage.outputs {
            if let Some(first) = producers.insert(output, stage.name.as_str()) {
                return Err(PipelineError::DuplicateProducer {
                    artifact: output.to_string(),
                    first: first.to_string(),
                    second: stage.name.clone(),
                });
            }
        }
    }
    Ok(())
}
