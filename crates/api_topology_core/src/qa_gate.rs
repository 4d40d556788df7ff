//! Contract-test gate run against a freshly deployed API.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::pipeline::CommandSpec;

pub const DEFAULT_COLLECTION: &str = "qa/contract-tests.postman_collection.json";
pub const DEFAULT_URL_VARIABLE: &str = "baseUrl";
pub const DEFAULT_RUNNER: &str = "newman";
pub const GATE_BINARY: &str = "qa_gate";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaGateConfig {
    /// Parameter holding the published URL. Derived from the deploy target
    /// when unset.
    #[serde(default)]
    pub url_parameter: Option<String>,
    #[serde(default = "default_collection")]
    pub collection_path: String,
    #[serde(default = "default_url_variable")]
    pub url_variable: String,
    #[serde(default = "default_runner")]
    pub runner: String,
}

impl Default for QaGateConfig {
    fn default() -> Self {
        Self {
            url_parameter: None,
            collection_path: default_collection(),
            url_variable: default_url_variable(),
            runner: default_runner(),
        }
    }
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_url_variable() -> String {
    DEFAULT_URL_VARIABLE.to_string()
}

fn default_runner() -> String {
    DEFAULT_RUNNER.to_string()
}

impl QaGateConfig {
    /// Runner invocation for a resolved URL. The URL is the only runtime
    /// variable passed to the collection.
    pub fn command(&self, url_parameter: &str, url: &str) -> Result<CommandSpec, PipelineError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(PipelineError::MissingGatewayUrl(url_parameter.to_string()));
        }
        Ok(CommandSpec::new(&self.runner).args([
            "run".to_string(),
            self.collection_path.clone(),
            "--env-var".to_string(),
            format!("{}={url}", self.url_variable),
        ]))
    }

    /// Stage command for the CI runner: the gate binary reads the URL from
    /// the parameter store and then starts the runner.
    pub fn plan_command(&self, url_parameter: &str) -> CommandSpec {
        CommandSpec::new(GATE_BINARY).args([
            "--url-parameter".to_string(),
            url_parameter.to_string(),
            "--collection".to_string(),
            self.collection_path.clone(),
            "--runner".to_string(),
            self.runner.clone(),
            "--url-variable".to_string(),
            self.url_variable.clone(),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GateVerdict {
    Passed,
    Failed { reason: String },
}

impl GateVerdict {
    /// `None` means the runner was terminated without an exit code.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => Self::Passed,
            Some(code) => Self::Failed {
                reason: format!("contract tests exited with status {code}"),
            },
            None => Self::Failed {
                reason: "contract test runner was terminated by a signal".to_string(),
            },
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_passes_url_as_single_runtime_variable() {
        let command = QaGateConfig::default()
            .command("/dev/users-api/api-url", "https://abc.execute-api.eu-west-1.amazonaws.com/dev/")
            .expect("command should build");

        assert_eq!(command.program, "newman");
        assert_eq!(
            command.args,
            vec![
                "run",
                DEFAULT_COLLECTION,
                "--env-var",
                "baseUrl=https://abc.execute-api.eu-west-1.amazonaws.com/dev/",
            ]
        );
    }

    #[test]
    fn empty_url_fails_before_runner_starts() {
        let error = QaGateConfig::default()
            .command("/dev/users-api/api-url", "  ")
            .expect_err("empty URL should fail");
        assert_eq!(
            error,
            PipelineError::MissingGatewayUrl("/dev/users-api/api-url".to_string())
        );
    }

    #[test]
    fn only_zero_exit_passes() {
        assert!(GateVerdict::from_exit_code(Some(0)).passed());
        assert!(!GateVerdict::from_exit_code(Some(1)).passed());
        assert!(!GateVerdict::from_exit_code(None).passed());
    }
}
