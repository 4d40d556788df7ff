use api_topology_core::parameter_keys::stack_name;
use api_topology_core::template::API_URL_OUTPUT;
use api_topology_core::topology::{CodeLocation, FunctionArtifacts, TopologyConfig};
use serde::{Deserialize, Serialize};

use crate::adapters::artifact_store::{ArtifactUploader, DistArtifacts};
use crate::adapters::provisioner::{
    StackDeployment, StackProvisioner, TemplateSource, MAX_TEMPLATE_BODY_BYTES,
};
use crate::error::DeployError;
use crate::handlers::synth::synthesize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReport {
    pub stack_name: String,
    pub status: String,
    pub changed: bool,
    pub fingerprint: String,
    pub api_url: Option<String>,
    pub uploaded_packages: usize,
}

/// Synthesizes, uploads function packages and provisions the stack.
///
/// Every configuration check runs before the first upload, so an invalid
/// topology never reaches the provisioning engine.
pub fn deploy_topology(
    config: &TopologyConfig,
    artifacts: &DistArtifacts,
    uploader: &dyn ArtifactUploader,
    provisioner: &dyn StackProvisioner,
) -> Result<DeployReport, DeployError> {
    let template = synthesize(config, artifacts)?;

    let mut uploaded_packages = 0;
    for function in &config.functions {
        let location = artifacts
            .artifact_for(&function.name)
            .map_err(DeployError::ArtifactUpload)?;
        let path = artifacts.package_path(&function.name);
        let body = std::fs::read(&path)
            .map_err(|error| DeployError::io(format!("failed to read {}", path.display()), error))?;
        uploader
            .upload(&location, body)
            .map_err(DeployError::ArtifactUpload)?;
        uploaded_packages += 1;
    }

    let body = template.to_pretty_json();
    let template_source = if body.len() > MAX_TEMPLATE_BODY_BYTES {
        let location = CodeLocation {
            bucket: artifacts.bucket().to_string(),
            key: format!(
                "{}/templates/{}.json",
                artifacts.prefix().trim_matches('/'),
                template.fingerprint
            ),
        };
        uploader
            .upload(&location, body.into_bytes())
            .map_err(DeployError::ArtifactUpload)?;
        TemplateSource::Url(format!(
            "https://{}.s3.amazonaws.com/{}",
            location.bucket, location.key
        ))
    } else {
        TemplateSource::Body(body)
    };

    let deployment = StackDeployment {
        stack_name: stack_name(&config.service_name, &config.stage),
        template: template_source,
    };
    let outcome = provisioner
        .deploy(&deployment)
        .map_err(DeployError::Provisioning)?;

    let api_url = outcome.outputs.get(API_URL_OUTPUT).cloned();
    tracing::info!(
        component = "deploy",
        event = "stack_deployed",
        stack = %outcome.stack_name,
        status = %outcome.status,
        changed = outcome.changed,
        api_url = api_url.as_deref().unwrap_or_default(),
    );

    Ok(DeployReport {
        stack_name: outcome.stack_name,
        status: outcome.status,
        changed: outcome.changed,
        fingerprint: template.fingerprint,
        api_url,
        uploaded_packages,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use api_topology_core::parameter_keys::Stage;
    use api_topology_core::profile::TopologyProfile;
    use api_topology_core::TopologyError;

    use super::*;
    use crate::adapters::provisioner::StackOutcome;

    struct CapturingUploader {
        uploads: Mutex<Vec<(CodeLocation, usize)>>,
    }

    impl CapturingUploader {
        fn new() -> Self {
            Self {
                uploads: Mutex::new(Vec::new()),
            }
        }

        fn keys(&self) -> Vec<String> {
            self.uploads
                .lock()
                .expect("poisoned mutex")
                .iter()
                .map(|(location, _)| location.key.clone())
                .collect()
        }
    }

    impl ArtifactUploader for CapturingUploader {
        fn upload(&self, location: &CodeLocation, body: Vec<u8>) -> Result<(), String> {
            self.uploads
                .lock()
                .expect("poisoned mutex")
                .push((location.clone(), body.len()));
            Ok(())
        }
    }

    struct CapturingProvisioner {
        result: Result<StackOutcome, String>,
        deployments: Mutex<Vec<StackDeployment>>,
    }

    impl CapturingProvisioner {
        fn succeeding() -> Self {
            Self {
                result: Ok(StackOutcome {
                    stack_name: "users-api-dev-stack".to_string(),
                    status: "CREATE_COMPLETE".to_string(),
                    changed: true,
                    outputs: BTreeMap::from([(
                        API_URL_OUTPUT.to_string(),
                        "https://abc123.execute-api.eu-west-1.amazonaws.com/dev/".to_string(),
                    )]),
                }),
                deployments: Mutex::new(Vec::new()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                result: Err(message.to_string()),
                deployments: Mutex::new(Vec::new()),
            }
        }

        fn deployments(&self) -> Vec<StackDeployment> {
            self.deployments.lock().expect("poisoned mutex").clone()
        }
    }

    impl StackProvisioner for CapturingProvisioner {
        fn deploy(&self, deployment: &StackDeployment) -> Result<StackOutcome, String> {
            self.deployments
                .lock()
                .expect("poisoned mutex")
                .push(deployment.clone());
            self.result.clone()
        }
    }

    fn config() -> TopologyConfig {
        TopologyProfile::Reduced.config("users-api", &Stage::new("dev").expect("valid stage"))
    }

    fn packaged_dist(config: &TopologyConfig) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        for function in &config.functions {
            std::fs::write(dir.path().join(format!("{}.zip", function.name)), b"PK\x03\x04")
                .expect("write package");
        }
        dir
    }

    #[test]
    fn uploads_packages_then_provisions_stack() {
        let config = config();
        let dist = packaged_dist(&config);
        let artifacts = DistArtifacts::new(dist.path(), "artifacts", "functions", "users-api");
        let uploader = CapturingUploader::new();
        let provisioner = CapturingProvisioner::succeeding();

        let report = deploy_topology(&config, &artifacts, &uploader, &provisioner)
            .expect("deploy should succeed");

        assert_eq!(report.uploaded_packages, config.functions.len());
        assert_eq!(
            report.api_url.as_deref(),
            Some("https://abc123.execute-api.eu-west-1.amazonaws.com/dev/")
        );
        assert!(uploader
            .keys()
            .contains(&"functions/users-api/authorizer.zip".to_string()));

        let deployments = provisioner.deployments();
        assert_eq!(deployments.len(), 1);
        assert_eq!(deployments[0].stack_name, "users-api-dev-stack");
        assert!(matches!(deployments[0].template, TemplateSource::Body(_)));
    }

    #[test]
    fn invalid_topology_never_reaches_provisioner() {
        let mut config = config();
        let duplicate = config.endpoints[0].clone();
        config.endpoints.push(duplicate);
        let dist = packaged_dist(&config);
        let artifacts = DistArtifacts::new(dist.path(), "artifacts", "functions", "users-api");
        let uploader = CapturingUploader::new();
        let provisioner = CapturingProvisioner::succeeding();

        let error = deploy_topology(&config, &artifacts, &uploader, &provisioner)
            .expect_err("duplicate route should fail");

        assert!(matches!(error, DeployError::Topology(TopologyError::DuplicateRoute { .. })));
        assert!(uploader.keys().is_empty());
        assert!(provisioner.deployments().is_empty());
    }

    #[test]
    fn missing_package_aborts_before_upload() {
        let config = config();
        let dist = tempfile::tempdir().expect("tempdir");
        let artifacts = DistArtifacts::new(dist.path(), "artifacts", "functions", "users-api");
        let uploader = CapturingUploader::new();
        let provisioner = CapturingProvisioner::succeeding();

        let error = deploy_topology(&config, &artifacts, &uploader, &provisioner)
            .expect_err("missing package should fail");

        assert!(matches!(
            error,
            DeployError::Topology(TopologyError::FunctionBuildFailed { .. })
        ));
        assert!(uploader.keys().is_empty());
    }

    #[test]
    fn provisioning_error_is_surfaced_verbatim() {
        let config = config();
        let dist = packaged_dist(&config);
        let artifacts = DistArtifacts::new(dist.path(), "artifacts", "functions", "users-api");
        let message = "stack users-api-dev-stack ended in ROLLBACK_COMPLETE: Secrets Manager can't find the specified secret.";
        let provisioner = CapturingProvisioner::failing(message);

        let error = deploy_topology(&config, &artifacts, &CapturingUploader::new(), &provisioner)
            .expect_err("provisioning should fail");

        assert!(matches!(error, DeployError::Provisioning(ref text) if text == message));
    }
}
