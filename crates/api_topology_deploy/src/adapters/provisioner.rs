use std::collections::BTreeMap;
use std::time::Duration;

use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudformation::types::Capability;

/// CloudFormation rejects inline template bodies above this size.
pub const MAX_TEMPLATE_BODY_BYTES: usize = 51_200;

const NO_UPDATES_MESSAGE: &str = "No updates are to be performed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Body(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDeployment {
    pub stack_name: String,
    pub template: TemplateSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackOutcome {
    pub stack_name: String,
    pub status: String,
    /// `false` when the stack already matched the template.
    pub changed: bool,
    pub outputs: BTreeMap<String, String>,
}

/// Creates or updates a stack and waits for it to settle. Errors carry the
/// engine's own message and are never retried.
pub trait StackProvisioner {
    fn deploy(&self, deployment: &StackDeployment) -> Result<StackOutcome, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    InProgress,
    Succeeded,
    Failed,
}

pub fn classify_status(status: &str) -> StackState {
    match status {
        "CREATE_COMPLETE" | "UPDATE_COMPLETE" => StackState::Succeeded,
        _ if status.ends_with("_IN_PROGRESS") => StackState::InProgress,
        _ => StackState::Failed,
    }
}

/// Status of a stack that rejected an update as a no-op. Any stable
/// `*_COMPLETE` state is serving the current template, including
/// `UPDATE_ROLLBACK_COMPLETE`; only a stack that never finished creating
/// (`ROLLBACK_COMPLETE`) counts as failed.
pub fn classify_unchanged_status(status: &str) -> StackState {
    match status {
        "ROLLBACK_COMPLETE" => StackState::Failed,
        _ if status.ends_with("_IN_PROGRESS") => StackState::InProgress,
        _ if status.ends_with("_COMPLETE") => StackState::Succeeded,
        _ => StackState::Failed,
    }
}

pub struct CloudFormationProvisioner {
    client: aws_sdk_cloudformation::Client,
    poll_interval: Duration,
    max_polls: u32,
}

impl CloudFormationProvisioner {
    pub fn new(client: aws_sdk_cloudformation::Client) -> Self {
        Self {
            client,
            poll_interval: Duration::from_secs(10),
            max_polls: 360,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[derive(Debug)]
struct StackSnapshot {
    status: String,
    reason: Option<String>,
    outputs: BTreeMap<String, String>,
}

impl StackProvisioner for CloudFormationProvisioner {
    fn deploy(&self, deployment: &StackDeployment) -> Result<StackOutcome, String> {
        let client = self.client.clone();
        let deployment = deployment.clone();
        let poll_interval = self.poll_interval;
        let max_polls = self.max_polls;

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let stack_name = deployment.stack_name.as_str();
                let exists = describe_stack(&client, stack_name).await?.is_some();

                let changed = if exists {
                    let mut request = client
                        .update_stack()
                        .stack_name(stack_name)
                        .capabilities(Capability::CapabilityIam);
                    request = match &deployment.template {
                        TemplateSource::Body(body) => request.template_body(body),
                        TemplateSource::Url(url) => request.template_url(url),
                    };
                    match request.send().await {
                        Ok(_) => true,
                        Err(error) if error_message(&error).contains(NO_UPDATES_MESSAGE) => false,
                        Err(error) => {
                            return Err(format!(
                                "update of {stack_name} rejected: {}",
                                error_message(&error)
                            ))
                        }
                    }
                } else {
                    let mut request = client
                        .create_stack()
                        .stack_name(stack_name)
                        .capabilities(Capability::CapabilityIam);
                    request = match &deployment.template {
                        TemplateSource::Body(body) => request.template_body(body),
                        TemplateSource::Url(url) => request.template_url(url),
                    };
                    request.send().await.map_err(|error| {
                        format!("creation of {stack_name} rejected: {}", error_message(&error))
                    })?;
                    true
                };

                tracing::info!(
                    component = "stack_provisioner",
                    event = if changed { "stack_change_submitted" } else { "stack_unchanged" },
                    stack = %stack_name,
                    created = !exists,
                );

                for _ in 0..max_polls {
                    let snapshot = describe_stack(&client, stack_name)
                        .await?
                        .ok_or_else(|| format!("stack {stack_name} disappeared while deploying"))?;
                    let state = if changed {
                        classify_status(&snapshot.status)
                    } else {
                        classify_unchanged_status(&snapshot.status)
                    };
                    match state {
                        StackState::InProgress => tokio::time::sleep(poll_interval).await,
                        StackState::Succeeded => {
                            return Ok(StackOutcome {
                                stack_name: stack_name.to_string(),
                                status: snapshot.status,
                                changed,
                                outputs: snapshot.outputs,
                            })
                        }
                        StackState::Failed => {
                            return Err(format!(
                                "stack {stack_name} ended in {}: {}",
                                snapshot.status,
                                snapshot.reason.unwrap_or_else(|| "no reason reported".to_string())
                            ))
                        }
                    }
                }
                Err(format!("stack {stack_name} did not settle after {max_polls} polls"))
            })
        })
    }
}

async fn describe_stack(
    client: &aws_sdk_cloudformation::Client,
    stack_name: &str,
) -> Result<Option<StackSnapshot>, String> {
    let output = match client.describe_stacks().stack_name(stack_name).send().await {
        Ok(output) => output,
        Err(error) if error_message(&error).contains("does not exist") => return Ok(None),
        Err(error) => {
            return Err(format!(
                "failed to describe {stack_name}: {}",
                error_message(&error)
            ))
        }
    };

    let Some(stack) = output.stacks().first() else {
        return Ok(None);
    };
    let status = stack
        .stack_status()
        .map(|status| status.as_str().to_string())
        .unwrap_or_default();
    if status == "DELETE_COMPLETE" {
        return Ok(None);
    }

    let outputs = stack
        .outputs()
        .iter()
        .filter_map(|output| {
            Some((
                output.output_key()?.to_string(),
                output.output_value()?.to_string(),
            ))
        })
        .collect();

    Ok(Some(StackSnapshot {
        status,
        reason: stack.stack_status_reason().map(str::to_string),
        outputs,
    }))
}

fn error_message<E, R>(error: &SdkError<E, R>) -> String
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    error
        .as_service_error()
        .and_then(ProvideErrorMetadata::message)
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(error).to_string())
}
