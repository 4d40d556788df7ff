use api_topology_core::qa_gate::{GateVerdict, QaGateConfig};

use crate::adapters::command::CommandRunner;
use crate::adapters::parameter_store::ParameterStore;

/// Reads the published URL and runs the contract-test collection against
/// it. Every problem on the way, including a missing URL, fails the gate.
pub fn run_qa_gate(
    config: &QaGateConfig,
    url_parameter: &str,
    store: &dyn ParameterStore,
    runner: &dyn CommandRunner,
) -> GateVerdict {
    let url = match store.get_parameter(url_parameter) {
        Ok(Some(url)) => url,
        Ok(None) => {
            return failed(format!("parameter {url_parameter} does not exist"));
        }
        Err(error) => return failed(error),
    };
    gate_url(config, url_parameter, &url, runner)
}

/// Runs the collection against an already resolved URL.
pub fn gate_url(
    config: &QaGateConfig,
    url_parameter: &str,
    url: &str,
    runner: &dyn CommandRunner,
) -> GateVerdict {
    let command = match config.command(url_parameter, url) {
        Ok(command) => command,
        Err(error) => return failed(error.to_string()),
    };

    let verdict = match runner.run(&command) {
        Ok(outcome) => GateVerdict::from_exit_code(outcome.exit_code),
        Err(error) => GateVerdict::Failed { reason: error },
    };

    match &verdict {
        GateVerdict::Passed => tracing::info!(
            component = "qa_gate",
            event = "contract_tests_passed",
            url = %url,
        ),
        GateVerdict::Failed { reason } => tracing::warn!(
            component = "qa_gate",
            event = "contract_tests_failed",
            url = %url,
            reason = %reason,
        ),
    }
    verdict
}

fn failed(reason: String) -> GateVerdict {
    tracing::warn!(component = "qa_gate", event = "gate_not_started", reason = %reason);
    GateVerdict::Failed { reason }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use api_topology_core::pipeline::CommandSpec;

    use super::*;
    use crate::adapters::command::CommandOutcome;

    struct StaticStore {
        values: BTreeMap<String, String>,
    }

    impl ParameterStore for StaticStore {
        fn get_parameter(&self, name: &str) -> Result<Option<String>, String> {
            Ok(self.values.get(name).cloned())
        }
    }

    struct CapturingRunner {
        exit_code: Option<i32>,
        commands: Mutex<Vec<CommandSpec>>,
    }

    impl CapturingRunner {
        fn exiting(exit_code: Option<i32>) -> Self {
            Self {
                exit_code,
                commands: Mutex::new(Vec::new()),
            }
        }

        fn commands(&self) -> Vec<CommandSpec> {
            self.commands.lock().expect("poisoned mutex").clone()
        }
    }

    impl CommandRunner for CapturingRunner {
        fn run(&self, command: &CommandSpec) -> Result<CommandOutcome, String> {
            self.commands
                .lock()
                .expect("poisoned mutex")
                .push(command.clone());
            Ok(CommandOutcome {
                exit_code: self.exit_code,
            })
        }
    }

    const PARAMETER: &str = "/dev/users-api/api-url";

    fn store(url: &str) -> StaticStore {
        StaticStore {
            values: BTreeMap::from([(PARAMETER.to_string(), url.to_string())]),
        }
    }

    #[test]
    fn passes_when_runner_exits_zero() {
        let runner = CapturingRunner::exiting(Some(0));
        let verdict = run_qa_gate(
            &QaGateConfig::default(),
            PARAMETER,
            &store("https://abc123.execute-api.eu-west-1.amazonaws.com/dev/"),
            &runner,
        );

        assert_eq!(verdict, GateVerdict::Passed);
        let commands = runner.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0]
            .args
            .contains(&"baseUrl=https://abc123.execute-api.eu-west-1.amazonaws.com/dev/".to_string()));
    }

    #[test]
    fn non_zero_exit_fails_gate() {
        let runner = CapturingRunner::exiting(Some(1));
        let verdict = run_qa_gate(&QaGateConfig::default(), PARAMETER, &store("https://x/"), &runner);
        assert!(!verdict.passed());
    }

    #[test]
    fn missing_parameter_fails_without_running_tests() {
        let runner = CapturingRunner::exiting(Some(0));
        let empty = StaticStore {
            values: BTreeMap::new(),
        };

        let verdict = run_qa_gate(&QaGateConfig::default(), PARAMETER, &empty, &runner);

        assert!(!verdict.passed());
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn empty_url_fails_without_running_tests() {
        let runner = CapturingRunner::exiting(Some(0));
        let verdict = run_qa_gate(&QaGateConfig::default(), PARAMETER, &store(""), &runner);

        assert!(matches!(verdict, GateVerdict::Failed { ref reason } if reason.contains(PARAMETER)));
        assert!(runner.commands().is_empty());
    }
}
