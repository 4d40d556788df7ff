use thiserror::Error;

use crate::endpoints::HttpMethod;

/// Configuration errors raised while composing, resolving, assembling or
/// rendering a topology. All of them are detected before anything is handed
/// to the provisioning engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("stage '{0}' must be non-empty lowercase alphanumerics or '-'")]
    InvalidStage(String),
    #[error("service name '{0}' must be non-empty lowercase alphanumerics or '-'")]
    InvalidServiceName(String),
    #[error("environment variable name '{0}' is not a valid identifier")]
    InvalidEnvironmentName(String),
    #[error("environment variable '{name}' has an empty {field}")]
    EmptyEnvironmentReference { name: String, field: &'static str },
    #[error("invalid endpoint path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("duplicate route {method} {path}")]
    DuplicateRoute { path: String, method: HttpMethod },
    #[error("endpoint {method} {path} requires auth but no authorizer is configured")]
    MissingAuthorizer { path: String, method: HttpMethod },
    #[error("function '{0}' is declared more than once")]
    DuplicateFunction(String),
    #[error("endpoint {method} {path} references unknown function '{function}'")]
    UnknownFunction {
        path: String,
        method: HttpMethod,
        function: String,
    },
    #[error("authorizer references unknown function '{0}'")]
    UnknownAuthorizerFunction(String),
    #[error("function '{function}' has no deployable artifact: {reason}")]
    FunctionBuildFailed { function: String, reason: String },
    #[error("logical id '{0}' is produced by more than one resource")]
    DuplicateLogicalId(String),
    #[error("resource '{resource}' references undefined resource '{target}'")]
    DanglingReference { resource: String, target: String },
    #[error("resource graph contains a dependency cycle through '{0}'")]
    CyclicResourceGraph(String),
    #[error("invalid topology configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised while planning a delivery pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("pipeline name cannot be empty")]
    EmptyName,
    #[error("stage '{stage}' has ordinal {ordinal}, which does not follow {previous}")]
    NonIncreasingOrdinal {
        stage: String,
        ordinal: u32,
        previous: u32,
    },
    #[error("stage '{stage}' consumes artifact '{artifact}' before any earlier stage produces it")]
    ForwardArtifactReference { stage: String, artifact: String },
    #[error("artifact '{artifact}' is produced by both '{first}' and '{second}'")]
    DuplicateProducer {
        artifact: String,
        first: String,
        second: String,
    },
    #[error(
        "deploy target names service '{target}' but {topology_config} declares '{declared}'"
    )]
    ServiceNameMismatch {
        target: String,
        topology_config: String,
        declared: String,
    },
    #[error("published gateway URL parameter '{0}' is empty")]
    MissingGatewayUrl(String),
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}
