use std::path::Path;

use api_topology_core::parameter_keys::Stage;
use api_topology_core::profile::TopologyProfile;
use api_topology_core::template::{render_template, RenderedTemplate};
use api_topology_core::topology::{assemble_topology, FunctionArtifacts, TopologyConfig};
use api_topology_core::TopologyError;

use crate::error::DeployError;

/// Command-line overrides applied on top of the descriptor file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub stage: Option<Stage>,
    pub profile: Option<TopologyProfile>,
}

/// Reads a topology descriptor, applies overrides, then fills in the
/// profile's tables when the file declares none.
pub fn load_topology_config(
    path: &Path,
    overrides: &ConfigOverrides,
) -> Result<TopologyConfig, DeployError> {
    let text = std::fs::read_to_string(path)
        .map_err(|error| DeployError::io(format!("failed to read {}", path.display()), error))?;
    let mut config: TopologyConfig = serde_json::from_str(&text)
        .map_err(|error| TopologyError::InvalidConfig(format!("{}: {error}", path.display())))?;

    if let Some(stage) = &overrides.stage {
        config.stage = stage.clone();
    }
    if let Some(profile) = overrides.profile {
        config.profile = profile;
    }
    Ok(config.with_profile_defaults())
}

/// Assembles and renders a topology. Fails before anything leaves the
/// process when the configuration is invalid or a function has no package.
pub fn synthesize(
    config: &TopologyConfig,
    artifacts: &impl FunctionArtifacts,
) -> Result<RenderedTemplate, DeployError> {
    let topology = assemble_topology(config, artifacts)?;
    let template = render_template(&topology)?;

    tracing::info!(
        component = "synth",
        event = "template_synthesized",
        service = %config.service_name,
        stage = %config.stage,
        profile = %config.profile,
        resources = template.resources().map(|resources| resources.len()).unwrap_or_default(),
        fingerprint = %template.fingerprint,
    );
    Ok(template)
}

pub fn write_template(template: &RenderedTemplate, path: &Path) -> Result<(), DeployError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|error| {
            DeployError::io(format!("failed to create {}", parent.display()), error)
        })?;
    }
    std::fs::write(path, template.to_pretty_json())
        .map_err(|error| DeployError::io(format!("failed to write {}", path.display()), error))
}
