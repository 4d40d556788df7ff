use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TopologyError;

/// Deployment stage identifier (`dev`, `qa`, `prod-eu`, ...).
///
/// Every stage-scoped name in a topology is derived from it, so two stages of
/// the same service never share a parameter key, secret or function name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Stage(String);

impl Stage {
    pub fn new(value: impl Into<String>) -> Result<Self, TopologyError> {
        let value = value.into();
        if !is_kebab_identifier(&value) {
            return Err(TopologyError::InvalidStage(value));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Stage {
    type Error = TopologyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl FromStr for Stage {
    type Err = TopologyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl From<Stage> for String {
    fn from(stage: Stage) -> Self {
        stage.0
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn validate_service_name(name: &str) -> Result<(), TopologyError> {
    if is_kebab_identifier(name) {
        Ok(())
    } else {
        Err(TopologyError::InvalidServiceName(name.to_string()))
    }
}

fn is_kebab_identifier(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('-')
        && !value.ends_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

pub fn stage_parameter_path(stage: &Stage, relative_path: &str) -> String {
    format!("/{stage}/{}", relative_path.trim_matches('/'))
}

pub fn stage_secret_id(stage: &Stage, secret_name: &str) -> String {
    format!("{stage}/{}", secret_name.trim_matches('/'))
}

/// Key of the parameter holding the deployed base URL of a service.
pub fn api_url_parameter(stage: &Stage, service_name: &str) -> String {
    format!("/{stage}/{service_name}/api-url")
}

pub fn function_physical_name(service_name: &str, stage: &Stage, function_name: &str) -> String {
    format!("{service_name}-{stage}-{}", function_name.replace('_', "-"))
}

pub fn rest_api_name(service_name: &str, stage: &Stage) -> String {
    format!("{service_name}-{stage}")
}

pub fn stack_name(service_name: &str, stage: &Stage) -> String {
    format!("{service_name}-{stage}-stack")
}

pub fn function_artifact_key(prefix: &str, service_name: &str, function_name: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        format!("{service_name}/{function_name}.zip")
    } else {
        format!("{trimmed}/{service_name}/{function_name}.zip")
    }
}
