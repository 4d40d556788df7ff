use api_topology_core::{PipelineError, TopologyError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// Provisioning engine failure, reported verbatim.
    #[error("provisioning failed: {0}")]
    Provisioning(String),
    #[error("parameter store: {0}")]
    ParameterStore(String),
    #[error("artifact upload failed: {0}")]
    ArtifactUpload(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Failed(String),
}

impl DeployError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
