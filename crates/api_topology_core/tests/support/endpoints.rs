#![allow(dead_code)]

use api_topology_core::endpoints::{EndpointDescriptor, FunctionHandle, HttpMethod};
use api_topology_core::profile::AUTHORIZER_FUNCTION;
use api_topology_core::test_helpers::dev_stage;
use api_topology_core::topology::{
    AuthorizerConfig, EndpointConfig, FunctionConfig, TopologyConfig, DEFAULT_AUTHORIZER_TTL_SECS,
};

/// Builder for endpoint tables and the topology config that serves them.
///
/// Functions are declared in first-use order, so the handle of the n-th new
/// function name is `FunctionHandle(n)`.
#[derive(Debug, Default, Clone)]
pub struct EndpointTableBuilder {
    functions: Vec<String>,
    endpoints: Vec<EndpointConfig>,
}

impl EndpointTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, path: &str, method: HttpMethod, function: &str, requires_auth: bool) -> Self {
        if !self.functions.iter().any(|name| name == function) {
            self.functions.push(function.to_string());
        }
        self.endpoints
            .push(EndpointConfig::new(path, method, function, requires_auth));
        self
    }

    pub fn descriptors(&self) -> Vec<EndpointDescriptor> {
        self.endpoints
            .iter()
            .map(|endpoint| {
                let handle = self
                    .functions
                    .iter()
                    .position(|name| *name == endpoint.function)
                    .expect("function declared by route()");
                EndpointDescriptor::new(
                    endpoint.path.clone(),
                    endpoint.method,
                    FunctionHandle(handle),
                    endpoint.requires_auth,
                )
            })
            .collect()
    }

    /// Topology config with an `authorizer` function appended after the
    /// route functions.
    pub fn topology_config(&self, service_name: &str) -> TopologyConfig {
        let mut functions: Vec<FunctionConfig> =
            self.functions.iter().map(FunctionConfig::new).collect();
        functions.push(FunctionConfig::new(AUTHORIZER_FUNCTION));
        TopologyConfig {
            service_name: service_name.to_string(),
            stage: dev_stage(),
            profile: Default::default(),
            base_environment: Default::default(),
            functions,
            authorizer: Some(AuthorizerConfig {
                function: AUTHORIZER_FUNCTION.to_string(),
                result_ttl_secs: DEFAULT_AUTHORIZER_TTL_SECS,
            }),
            endpoints: self.endpoints.clone(),
        }
    }
}

/// `count` distinct resources, each with a nested `{id}` route.
pub fn wide_table(count: usize) -> EndpointTableBuilder {
    (0..count).fold(EndpointTableBuilder::new(), |builder, index| {
        builder
            .route(&format!("/r{index}"), HttpMethod::Get, &format!("list_{index}"), index % 2 == 0)
            .route(&format!("/r{index}/{{id}}"), HttpMethod::Get, &format!("get_{index}"), true)
    })
}
