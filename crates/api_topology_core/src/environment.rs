//! Function environment composition.
//!
//! The composer only records *where* a value comes from. Parameter-store and
//! secret-store references are rendered as dynamic references that the
//! provisioning engine resolves at deploy time; nothing here reads a store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TopologyError;
use crate::parameter_keys::{stage_parameter_path, stage_secret_id, Stage};

/// Declarative source of an environment value, relative to a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    Literal(String),
    /// Parameter-store path relative to `/{stage}/`.
    StageParameter(String),
    /// Field of a JSON secret named relative to `{stage}/`.
    SecretField { secret: String, field: String },
}

/// Stage-resolved reference attached to a function environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueRef {
    Literal { value: String },
    StageParameter { path: String },
    SecretField { secret_id: String, field: String },
}

impl ValueRef {
    /// Value as the provisioning engine should see it.
    pub fn render(&self) -> String {
        match self {
            Self::Literal { value } => value.clone(),
            Self::StageParameter { path } => format!("{{{{resolve:ssm:{path}}}}}"),
            Self::SecretField { secret_id, field } => {
                format!("{{{{resolve:secretsmanager:{secret_id}:SecretString:{field}}}}}")
            }
        }
    }

    pub fn is_deferred(&self) -> bool {
        !matches!(self, Self::Literal { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentSet {
    entries: BTreeMap<String, ValueRef>,
}

impl EnvironmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ValueRef) -> Option<ValueRef> {
        self.entries.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&ValueRef> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ValueRef)> {
        self.entries.iter()
    }

    /// Returns `self` with every entry of `overrides` applied on top; keys
    /// present in both take the value from `overrides`.
    pub fn overlay(&self, overrides: &EnvironmentSet) -> EnvironmentSet {
        let mut merged = self.entries.clone();
        for (name, value) in &overrides.entries {
            merged.insert(name.clone(), value.clone());
        }
        EnvironmentSet { entries: merged }
    }

    pub fn rendered(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(name, value)| (name.clone(), value.render()))
            .collect()
    }
}

/// Builder collecting named value sources for one stage.
///
/// ```
/// use api_topology_core::environment::EnvironmentComposer;
/// use api_topology_core::parameter_keys::Stage;
///
/// let stage = Stage::new("dev").unwrap();
/// let env = EnvironmentComposer::new(&stage)
///     .literal("LOG_LEVEL", "info")
///     .stage_parameter("USERS_TABLE", "users/table-name")
///     .secret_field("DB_PASSWORD", "database-credentials", "password")
///     .compose()
///     .unwrap();
/// assert_eq!(env.len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct EnvironmentComposer {
    stage: Stage,
    sources: Vec<(String, ValueSource)>,
}

impl EnvironmentComposer {
    pub fn new(stage: &Stage) -> Self {
        Self {
            stage: stage.clone(),
            sources: Vec::new(),
        }
    }

    pub fn literal(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.source(name, ValueSource::Literal(value.into()))
    }

    pub fn stage_parameter(self, name: impl Into<String>, relative_path: impl Into<String>) -> Self {
        self.source(name, ValueSource::StageParameter(relative_path.into()))
    }

    pub fn secret_field(
        self,
        name: impl Into<String>,
        secret: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        self.source(
            name,
            ValueSource::SecretField {
                secret: secret.into(),
                field: field.into(),
            },
        )
    }

    pub fn source(mut self, name: impl Into<String>, source: ValueSource) -> Self {
        self.sources.push((name.into(), source));
        self
    }

    pub fn sources<'a>(
        mut self,
        sources: impl IntoIterator<Item = (&'a String, &'a ValueSource)>,
    ) -> Self {
        for (name, source) in sources {
            self.sources.push((name.clone(), source.clone()));
        }
        self
    }

    /// Validates names and references and resolves them against the stage.
    /// Later sources with the same name replace earlier ones.
    pub fn compose(self) -> Result<EnvironmentSet, TopologyError> {
        let mut set = EnvironmentSet::new();
        for (name, source) in self.sources {
            validate_variable_name(&name)?;
            let value = resolve_source(&self.stage, &name, source)?;
            set.insert(name, value);
        }
        Ok(set)
    }
}

fn resolve_source(stage: &Stage, name: &str, source: ValueSource) -> Result<ValueRef, TopologyError> {
    match source {
        ValueSource::Literal(value) => Ok(ValueRef::Literal { value }),
        ValueSource::StageParameter(relative_path) => {
            require_non_empty(name, "parameter path", &relative_path)?;
            Ok(ValueRef::StageParameter {
                path: stage_parameter_path(stage, &relative_path),
            })
        }
        ValueSource::SecretField { secret, field } => {
            require_non_empty(name, "secret name", &secret)?;
            require_non_empty(name, "secret field", &field)?;
            Ok(ValueRef::SecretField {
                secret_id: stage_secret_id(stage, &secret),
                field,
            })
        }
    }
}

fn require_non_empty(name: &str, field: &'static str, value: &str) -> Result<(), TopologyError> {
    if value.trim_matches('/').trim().is_empty() {
        return Err(TopologyError::EmptyEnvironmentReference {
            name: name.to_string(),
            field,
        });
    }
    Ok(())
}

fn validate_variable_name(name: &str) -> Result<(), TopologyError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(TopologyError::InvalidEnvironmentName(name.to_string()))
    }
}
