//! Shared fixtures for unit tests, integration tests and benches.

use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::parameter_keys::{function_artifact_key, Stage};
use crate::profile::TopologyProfile;
use crate::topology::{assemble_topology, CodeLocation, FunctionArtifacts, ServiceTopology};

pub const TEST_SERVICE: &str = "users-api";
pub const TEST_BUCKET: &str = "users-api-artifacts";

/// # Panics
///
/// Never; `dev` is a valid stage name.
pub fn dev_stage() -> Stage {
    Stage::new("dev").expect("dev should be a valid stage")
}

/// Artifact source that reports every function as built unless listed in
/// `failing`, and records each lookup.
#[derive(Debug, Default)]
pub struct StaticArtifacts {
    failing: BTreeSet<String>,
    requested: Mutex<Vec<String>>,
}

impl StaticArtifacts {
    pub fn all_built() -> Self {
        Self::default()
    }

    pub fn failing(functions: &[&str]) -> Self {
        Self {
            failing: functions.iter().map(|name| name.to_string()).collect(),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested
            .lock()
            .map(|requested| requested.clone())
            .unwrap_or_default()
    }
}

impl FunctionArtifacts for StaticArtifacts {
    fn artifact_for(&self, function_name: &str) -> Result<CodeLocation, String> {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(function_name.to_string());
        }
        if self.failing.contains(function_name) {
            return Err(format!("build of '{function_name}' failed"));
        }
        Ok(CodeLocation {
            bucket: TEST_BUCKET.to_string(),
            key: function_artifact_key("functions", TEST_SERVICE, function_name),
        })
    }
}

/// Assembles the built-in profile for [`TEST_SERVICE`] on the `dev` stage.
///
/// # Panics
///
/// Panics if the built-in profile no longer assembles.
pub fn assembled_topology(profile: TopologyProfile) -> ServiceTopology {
    let config = profile.config(TEST_SERVICE, &dev_stage());
    assemble_topology(&config, &StaticArtifacts::all_built())
        .expect("built-in profile should assemble")
}
