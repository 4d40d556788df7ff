use api_topology_core::pipeline::run::{Notifier, PipelineNotification, PipelineStatus};
use aws_sdk_sns::error::DisplayErrorContext;

/// SNS subjects are limited to 100 characters.
const MAX_SUBJECT_CHARS: usize = 100;

pub struct SnsNotifier {
    client: aws_sdk_sns::Client,
    topic_arn: String,
}

impl SnsNotifier {
    pub fn new(client: aws_sdk_sns::Client, topic_arn: impl Into<String>) -> Self {
        Self {
            client,
            topic_arn: topic_arn.into(),
        }
    }
}

impl Notifier for SnsNotifier {
    fn notify(&self, notification: &PipelineNotification) -> Result<(), String> {
        let client = self.client.clone();
        let topic_arn = self.topic_arn.clone();
        let subject = truncate_subject(&notification.subject);
        let message = serde_json::to_string(notification)
            .map_err(|error| format!("failed to serialize notification: {error}"))?;

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .publish()
                    .topic_arn(topic_arn)
                    .subject(subject)
                    .message(message)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|error| {
                        format!("failed to publish notification: {}", DisplayErrorContext(&error))
                    })
            })
        })
    }
}

/// Notifier used when no topic is configured; writes the notification to the
/// log instead.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &PipelineNotification) -> Result<(), String> {
        match notification.status {
            PipelineStatus::Succeeded => tracing::info!(
                component = "notifier",
                event = "pipeline_succeeded",
                pipeline = %notification.pipeline,
                message = %notification.message,
            ),
            PipelineStatus::Failed => tracing::error!(
                component = "notifier",
                event = "pipeline_failed",
                pipeline = %notification.pipeline,
                failed_stage = notification.failed_stage.as_deref().unwrap_or_default(),
                message = %notification.message,
            ),
        }
        Ok(())
    }
}

fn truncate_subject(subject: &str) -> String {
    subject.chars().take(MAX_SUBJECT_CHARS).collect()
}
