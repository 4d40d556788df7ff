//! Service topology assembly.
//!
//! A [`TopologyConfig`] names functions and endpoints by string. Assembly
//! turns it into a [`ServiceTopology`] where functions and the authorizer live
//! in arenas and every binding refers to them by handle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::endpoints::{
    resolve_endpoints, AuthorizerId, EndpointDescriptor, FunctionHandle, HttpMethod,
    ResolvedBinding, ResolvedEndpoints, RouteTree, AUTHORIZATION_HEADER,
};
use crate::environment::{EnvironmentComposer, EnvironmentSet, ValueSource};
use crate::error::TopologyError;
use crate::parameter_keys::{api_url_parameter, validate_service_name, Stage};
use crate::profile::TopologyProfile;

pub const DEFAULT_RUNTIME: &str = "provided.al2023";
pub const DEFAULT_HANDLER: &str = "bootstrap";
pub const DEFAULT_MEMORY_MB: u32 = 256;
pub const DEFAULT_TIMEOUT_SECS: u32 = 10;
pub const DEFAULT_AUTHORIZER_TTL_SECS: u32 = 300;
pub const MAX_AUTHORIZER_TTL_SECS: u32 = 3_600;
pub const MAX_FUNCTION_TIMEOUT_SECS: u32 = 900;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub name: String,
    #[serde(default = "default_handler")]
    pub handler: String,
    #[serde(default = "default_runtime")]
    pub runtime: String,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,
    /// Entries overlaid on the shared base environment.
    #[serde(default)]
    pub environment: BTreeMap<String, ValueSource>,
}

impl FunctionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handler: default_handler(),
            runtime: default_runtime(),
            memory_mb: default_memory_mb(),
            timeout_secs: default_timeout_secs(),
            environment: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, name: impl Into<String>, source: ValueSource) -> Self {
        self.environment.insert(name.into(), source);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizerConfig {
    pub function: String,
    #[serde(default = "default_authorizer_ttl_secs")]
    pub result_ttl_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub path: String,
    pub method: HttpMethod,
    pub function: String,
    #[serde(default)]
    pub requires_auth: bool,
}

impl EndpointConfig {
    pub fn new(path: &str, method: HttpMethod, function: &str, requires_auth: bool) -> Self {
        Self {
            path: path.to_string(),
            method,
            function: function.to_string(),
            requires_auth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub service_name: String,
    pub stage: Stage,
    #[serde(default)]
    pub profile: TopologyProfile,
    #[serde(default)]
    pub base_environment: BTreeMap<String, ValueSource>,
    #[serde(default)]
    pub functions: Vec<FunctionConfig>,
    #[serde(default)]
    pub authorizer: Option<AuthorizerConfig>,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

impl TopologyConfig {
    /// Parses a descriptor file. A file that declares neither functions nor
    /// endpoints takes the function and endpoint tables of its profile.
    pub fn from_json_str(text: &str) -> Result<Self, TopologyError> {
        let config: TopologyConfig = serde_json::from_str(text)
            .map_err(|error| TopologyError::InvalidConfig(error.to_string()))?;
        Ok(config.with_profile_defaults())
    }

    pub fn with_profile_defaults(mut self) -> Self {
        if !self.functions.is_empty() || !self.endpoints.is_empty() {
            return self;
        }
        let defaults = self.profile.config(&self.service_name, &self.stage);
        for (name, source) in defaults.base_environment {
            self.base_environment.entry(name).or_insert(source);
        }
        self.functions = defaults.functions;
        self.endpoints = defaults.endpoints;
        if self.authorizer.is_none() {
            self.authorizer = defaults.authorizer;
        }
        self
    }
}

fn default_handler() -> String {
    DEFAULT_HANDLER.to_string()
}

fn default_runtime() -> String {
    DEFAULT_RUNTIME.to_string()
}

fn default_memory_mb() -> u32 {
    DEFAULT_MEMORY_MB
}

fn default_timeout_secs() -> u32 {
    DEFAULT_TIMEOUT_SECS
}

fn default_authorizer_ttl_secs() -> u32 {
    DEFAULT_AUTHORIZER_TTL_SECS
}

/// Location of a packaged function, as handed to the provisioning engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLocation {
    pub bucket: String,
    pub key: String,
}

/// Source of built function packages. An `Err` means the function did not
/// build and the topology must not be assembled.
pub trait FunctionArtifacts {
    fn artifact_for(&self, function_name: &str) -> Result<CodeLocation, String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionResource {
    pub name: String,
    pub handler: String,
    pub runtime: String,
    pub memory_mb: u32,
    /// Declared execution limit; enforced by the platform, not by this crate.
    pub timeout_secs: u32,
    pub environment: EnvironmentSet,
    pub code: CodeLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorizer {
    pub name: String,
    pub function: FunctionHandle,
    pub identity_source: String,
    pub result_ttl_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsPolicy {
    pub allow_origins: Vec<String>,
    pub allow_credentials: bool,
    pub allow_headers: Vec<String>,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".to_string()],
            allow_credentials: false,
            allow_headers: [
                "Content-Type",
                "X-Amz-Date",
                AUTHORIZATION_HEADER,
                "X-Api-Key",
                "X-Amz-Security-Token",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessLogLevel {
    Off,
    Error,
    Info,
}

impl AccessLogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Error => "ERROR",
            Self::Info => "INFO",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayPolicy {
    pub cors: CorsPolicy,
    pub validate_request_parameters: bool,
    pub logging_level: AccessLogLevel,
}

impl Default for GatewayPolicy {
    fn default() -> Self {
        Self {
            cors: CorsPolicy::default(),
            validate_request_parameters: true,
            logging_level: AccessLogLevel::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedParameter {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTopology {
    pub service_name: String,
    pub stage: Stage,
    pub profile: TopologyProfile,
    pub functions: Vec<FunctionResource>,
    pub authorizers: Vec<Authorizer>,
    pub endpoints: ResolvedEndpoints,
    pub gateway: GatewayPolicy,
    pub published_url: PublishedParameter,
}

impl ServiceTopology {
    pub fn function(&self, handle: FunctionHandle) -> &FunctionResource {
        &self.functions[handle.0]
    }

    pub fn authorizer(&self, id: AuthorizerId) -> &Authorizer {
        &self.authorizers[id.0]
    }

    pub fn bindings(&self) -> &[ResolvedBinding] {
        &self.endpoints.bindings
    }

    pub fn routes(&self) -> &RouteTree {
        &self.endpoints.routes
    }
}

/// Builds a complete topology or nothing.
///
/// Configuration problems are reported before `artifacts` is consulted; an
/// artifact failure for any declared function aborts assembly.
pub fn assemble_topology(
    config: &TopologyConfig,
    artifacts: &impl FunctionArtifacts,
) -> Result<ServiceTopology, TopologyError> {
    validate_service_name(&config.service_name)?;
    let stage = &config.stage;

    let base_environment = EnvironmentComposer::new(stage)
        .sources(&config.base_environment)
        .compose()?;

    let mut handles: BTreeMap<&str, FunctionHandle> = BTreeMap::new();
    let mut environments = Vec::with_capacity(config.functions.len());
    for function in &config.functions {
        validate_function(function)?;
        if handles
            .insert(function.name.as_str(), FunctionHandle(environments.len()))
            .is_some()
        {
            return Err(TopologyError::DuplicateFunction(function.name.clone()));
        }
        let overrides = EnvironmentComposer::new(stage)
            .sources(&function.environment)
            .compose()?;
        environments.push(base_environment.overlay(&overrides));
    }

    let mut authorizers = Vec::new();
    if let Some(authorizer) = &config.authorizer {
        let function = *handles
            .get(authorizer.function.as_str())
            .ok_or_else(|| TopologyError::UnknownAuthorizerFunction(authorizer.function.clone()))?;
        // Zero turns the gateway's authorizer cache off.
        if !(1..=MAX_AUTHORIZER_TTL_SECS).contains(&authorizer.result_ttl_secs) {
            return Err(TopologyError::InvalidConfig(format!(
                "authorizer result_ttl_secs must be within 1..={MAX_AUTHORIZER_TTL_SECS}"
            )));
        }
        authorizers.push(Authorizer {
            name: format!("{}-{stage}-authorizer", config.service_name),
            function,
            identity_source: format!("method.request.header.{AUTHORIZATION_HEADER}"),
            result_ttl_secs: authorizer.result_ttl_secs,
        });
    }
    let shared_authorizer = (!authorizers.is_empty()).then_some(AuthorizerId(0));

    let mut descriptors = Vec::with_capacity(config.endpoints.len());
    for endpoint in &config.endpoints {
        let function = *handles.get(endpoint.function.as_str()).ok_or_else(|| {
            TopologyError::UnknownFunction {
                path: endpoint.path.clone(),
                method: endpoint.method,
                function: endpoint.function.clone(),
            }
        })?;
        descriptors.push(EndpointDescriptor::new(
            endpoint.path.clone(),
            endpoint.method,
            function,
            endpoint.requires_auth,
        ));
    }

    let endpoints = resolve_endpoints(&descriptors, shared_authorizer)?;

    let mut functions = Vec::with_capacity(config.functions.len());
    for (function, environment) in config.functions.iter().zip(environments) {
        let code = artifacts.artifact_for(&function.name).map_err(|reason| {
            TopologyError::FunctionBuildFailed {
                function: function.name.clone(),
                reason,
            }
        })?;
        functions.push(FunctionResource {
            name: function.name.clone(),
            handler: function.handler.clone(),
            runtime: function.runtime.clone(),
            memory_mb: function.memory_mb,
            timeout_secs: function.timeout_secs,
            environment,
            code,
        });
    }

    let published_url = PublishedParameter {
        name: api_url_parameter(stage, &config.service_name),
        description: format!(
            "Base URL of the {} API for stage {stage}",
            config.service_name
        ),
    };

    tracing::info!(
        component = "topology_assembler",
        event = "topology_assembled",
        service = %config.service_name,
        stage = %stage,
        profile = ?config.profile,
        functions = functions.len(),
        bindings = endpoints.bindings.len(),
        published_parameter = %published_url.name,
    );

    Ok(ServiceTopology {
        service_name: config.service_name.clone(),
        stage: stage.clone(),
        profile: config.profile,
        functions,
        authorizers,
        endpoints,
        gateway: GatewayPolicy::default(),
        published_url,
    })
}

fn validate_function(function: &FunctionConfig) -> Result<(), TopologyError> {
    if function.name.is_empty()
        || !function
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(TopologyError::InvalidConfig(format!(
            "function name '{}' must be non-empty snake_case",
            function.name
        )));
    }
    if function.timeout_secs == 0 || function.timeout_secs > MAX_FUNCTION_TIMEOUT_SECS {
        return Err(TopologyError::InvalidConfig(format!(
            "function '{}' timeout_secs must be within 1..={MAX_FUNCTION_TIMEOUT_SECS}",
            function.name
        )));
    }
    if function.memory_mb < 128 {
        return Err(TopologyError::InvalidConfig(format!(
            "function '{}' memory_mb must be at least 128",
            function.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::ValueRef;
    use crate::test_helpers::StaticArtifacts;

    fn config() -> TopologyConfig {
        TopologyProfile::Full.config("users-api", &Stage::new("dev").expect("valid stage"))
    }

    #[test]
    fn assembles_full_profile_with_one_shared_authorizer() {
        let topology =
            assemble_topology(&config(), &StaticArtifacts::all_built()).expect("should assemble");

        assert_eq!(topology.authorizers.len(), 1);
        let authorized: Vec<_> = topology
            .bindings()
            .iter()
            .filter(|binding| binding.descriptor.requires_auth)
            .collect();
        assert!(authorized.len() >= 2);
        assert!(authorized
            .iter()
            .all(|binding| binding.authorizer == Some(AuthorizerId(0))));
        assert_eq!(topology.published_url.name, "/dev/users-api/api-url");
        assert!(topology.gateway.validate_request_parameters);
        assert!(!topology.gateway.cors.allow_credentials);
        assert_eq!(topology.gateway.logging_level, AccessLogLevel::Error);
    }

    #[test]
    fn function_environment_overlays_base() {
        let topology =
            assemble_topology(&config(), &StaticArtifacts::all_built()).expect("should assemble");
        let authorizer = topology.function(topology.authorizers[0].function);

        assert_eq!(
            authorizer.environment.get("LOG_LEVEL"),
            Some(&ValueRef::Literal {
                value: "warn".to_string()
            })
        );
        assert!(authorizer.environment.get("JWT_SECRET").is_some());
        assert!(authorizer.environment.get("USERS_TABLE").is_some());

        let health = topology
            .functions
            .iter()
            .find(|function| function.name == "health")
            .expect("health function declared");
        assert_eq!(
            health.environment.get("LOG_LEVEL"),
            Some(&ValueRef::Literal {
                value: "info".to_string()
            })
        );
        assert!(health.environment.get("JWT_SECRET").is_none());
    }

    #[test]
    fn build_failure_aborts_assembly() {
        let error = assemble_topology(&config(), &StaticArtifacts::failing(&["create_user"]))
            .expect_err("assembly should abort");
        assert_eq!(
            error,
            TopologyError::FunctionBuildFailed {
                function: "create_user".to_string(),
                reason: "build of 'create_user' failed".to_string(),
            }
        );
    }

    #[test]
    fn configuration_errors_precede_artifact_lookup() {
        let mut config = config();
        let duplicate = config.endpoints[0].clone();
        config.endpoints.push(duplicate);
        let artifacts = StaticArtifacts::all_built();

        let error = assemble_topology(&config, &artifacts).expect_err("duplicate should fail");
        assert!(matches!(error, TopologyError::DuplicateRoute { .. }));
        assert!(artifacts.requested().is_empty());
    }

    #[test]
    fn rejects_unknown_endpoint_function() {
        let mut config = config();
        config.endpoints[0].function = "missing".to_string();
        let error = assemble_topology(&config, &StaticArtifacts::all_built())
            .expect_err("unknown function should fail");
        assert!(matches!(error, TopologyError::UnknownFunction { function, .. } if function == "missing"));
    }

    #[test]
    fn rejects_duplicate_function_names() {
        let mut config = config();
        let duplicate = config.functions[0].clone();
        config.functions.push(duplicate);
        let error = assemble_topology(&config, &StaticArtifacts::all_built())
            .expect_err("duplicate function should fail");
        assert!(matches!(error, TopologyError::DuplicateFunction(_)));
    }

    #[test]
    fn rejects_unknown_authorizer_function() {
        let mut config = config();
        config.authorizer = Some(AuthorizerConfig {
            function: "nope".to_string(),
            result_ttl_secs: 300,
        });
        let error = assemble_topology(&config, &StaticArtifacts::all_built())
            .expect_err("unknown authorizer should fail");
        assert_eq!(error, TopologyError::UnknownAuthorizerFunction("nope".to_string()));
    }

    #[test]
    fn authorizer_ttl_must_keep_cache_enabled_and_bounded() {
        for ttl in [0, MAX_AUTHORIZER_TTL_SECS + 1] {
            let mut config = config();
            if let Some(authorizer) = config.authorizer.as_mut() {
                authorizer.result_ttl_secs = ttl;
            }
            let error = assemble_topology(&config, &StaticArtifacts::all_built())
                .expect_err("out-of-range ttl should fail");
            assert!(matches!(error, TopologyError::InvalidConfig(message) if message.contains("result_ttl_secs")));
        }

        for ttl in [1, MAX_AUTHORIZER_TTL_SECS] {
            let mut config = config();
            if let Some(authorizer) = config.authorizer.as_mut() {
                authorizer.result_ttl_secs = ttl;
            }
            let topology = assemble_topology(&config, &StaticArtifacts::all_built())
                .expect("boundary ttl should assemble");
            assert_eq!(topology.authorizers[0].result_ttl_secs, ttl);
        }
    }

    #[test]
    fn config_without_tables_takes_profile_defaults() {
        let config = TopologyConfig::from_json_str(
            r#"{
                "service_name": "users-api",
                "stage": "qa",
                "profile": "reduced",
                "base_environment": {"LOG_LEVEL": {"literal": "debug"}}
            }"#,
        )
        .expect("config should parse");

        assert_eq!(config.profile, TopologyProfile::Reduced);
        assert_eq!(config.endpoints.len(), 2);
        assert!(config.authorizer.is_some());
        assert_eq!(
            config.base_environment.get("LOG_LEVEL"),
            Some(&ValueSource::Literal("debug".to_string()))
        );
        assert!(config.base_environment.contains_key("USERS_TABLE"));
    }

    #[test]
    fn malformed_config_is_a_configuration_error() {
        let error = TopologyConfig::from_json_str(r#"{"service_name": "x", "stage": "Bad"}"#)
            .expect_err("invalid stage should fail");
        assert!(matches!(error, TopologyError::InvalidConfig(_)));
    }
}
