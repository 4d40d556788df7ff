use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::endpoints::HttpMethod;
use crate::environment::ValueSource;
use crate::parameter_keys::Stage;
use crate::topology::{
    AuthorizerConfig, EndpointConfig, FunctionConfig, TopologyConfig, DEFAULT_AUTHORIZER_TTL_SECS,
};

pub const AUTHORIZER_FUNCTION: &str = "authorizer";

/// Named variant of the built-in endpoint table.
///
/// `Full` serves the complete users API. `Reduced` keeps the health check and
/// the single-user lookup, with the same authorizer and base environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyProfile {
    #[default]
    Full,
    Reduced,
}

impl TopologyProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Reduced => "reduced",
        }
    }

    pub fn endpoints(self) -> Vec<EndpointConfig> {
        match self {
            Self::Full => vec![
                EndpointConfig::new("/health", HttpMethod::Get, "health", false),
                EndpointConfig::new("/users", HttpMethod::Get, "list_users", true),
                EndpointConfig::new("/users", HttpMethod::Post, "create_user", true),
                EndpointConfig::new("/users/{userId}", HttpMethod::Get, "get_user", true),
            ],
            Self::Reduced => vec![
                EndpointConfig::new("/health", HttpMethod::Get, "health", false),
                EndpointConfig::new("/users/{userId}", HttpMethod::Get, "get_user", true),
            ],
        }
    }

    pub fn functions(self) -> Vec<FunctionConfig> {
        let mut functions: Vec<FunctionConfig> = self
            .endpoints()
            .into_iter()
            .map(|endpoint| FunctionConfig::new(endpoint.function))
            .collect();
        functions.push(
            FunctionConfig::new(AUTHORIZER_FUNCTION)
                .with_env(
                    "JWT_SECRET",
                    ValueSource::SecretField {
                        secret: "auth".to_string(),
                        field: "jwt-secret".to_string(),
                    },
                )
                .with_env("LOG_LEVEL", ValueSource::Literal("warn".to_string())),
        );
        functions
    }

    pub fn base_environment(self, service_name: &str, stage: &Stage) -> BTreeMap<String, ValueSource> {
        BTreeMap::from([
            ("STAGE".to_string(), ValueSource::Literal(stage.to_string())),
            (
                "SERVICE_NAME".to_string(),
                ValueSource::Literal(service_name.to_string()),
            ),
            ("LOG_LEVEL".to_string(), ValueSource::Literal("info".to_string())),
            (
                "USERS_TABLE".to_string(),
                ValueSource::StageParameter("users/table-name".to_string()),
            ),
            (
                "DB_USERNAME".to_string(),
                ValueSource::SecretField {
                    secret: "database-credentials".to_string(),
                    field: "username".to_string(),
                },
            ),
            (
                "DB_PASSWORD".to_string(),
                ValueSource::SecretField {
                    secret: "database-credentials".to_string(),
                    field: "password".to_string(),
                },
            ),
        ])
    }

    pub fn config(self, service_name: &str, stage: &Stage) -> TopologyConfig {
        TopologyConfig {
            service_name: service_name.to_string(),
            stage: stage.clone(),
            profile: self,
            base_environment: self.base_environment(service_name, stage),
            functions: self.functions(),
            authorizer: Some(AuthorizerConfig {
                function: AUTHORIZER_FUNCTION.to_string(),
                result_ttl_secs: DEFAULT_AUTHORIZER_TTL_SECS,
            }),
            endpoints: self.endpoints(),
        }
    }
}

impl fmt::Display for TopologyProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopologyProfile {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "reduced" => Ok(Self::Reduced),
            other => Err(format!("unknown topology profile '{other}' (expected full|reduced)")),
        }
    }
}
