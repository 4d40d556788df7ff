//! Endpoint table resolution.
//!
//! The endpoint table is processed in two passes. The validation pass parses
//! every path and indexes descriptors by `(path, method)`; any problem aborts
//! before a single route node exists. The construction pass then walks the
//! descriptors in input order, reusing route nodes for shared prefixes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TopologyError;

pub const AUTHORIZATION_HEADER: &str = "Authorization";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index of a function in the topology's function arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FunctionHandle(pub usize);

/// Index of an authorizer in the topology's authorizer arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AuthorizerId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteNodeId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub path: String,
    pub method: HttpMethod,
    pub function: FunctionHandle,
    pub requires_auth: bool,
}

impl EndpointDescriptor {
    pub fn new(
        path: impl Into<String>,
        method: HttpMethod,
        function: FunctionHandle,
        requires_auth: bool,
    ) -> Self {
        Self {
            path: path.into(),
            method,
            function,
            requires_auth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Literal(String),
    Parameter(String),
}

impl PathSegment {
    fn as_path_part(&self) -> String {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Parameter(name) => format!("{{{name}}}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteNode {
    /// Full path of the node, `/` for the root.
    pub path: String,
    /// Last path segment; empty for the root.
    pub path_part: String,
    pub parent: Option<RouteNodeId>,
}

impl RouteNode {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Arena of route nodes keyed by full path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTree {
    nodes: Vec<RouteNode>,
    by_path: BTreeMap<String, RouteNodeId>,
}

impl Default for RouteTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTree {
    pub const ROOT: RouteNodeId = RouteNodeId(0);

    pub fn new() -> Self {
        Self {
            nodes: vec![RouteNode {
                path: "/".to_string(),
                path_part: String::new(),
                parent: None,
            }],
            by_path: BTreeMap::from([("/".to_string(), Self::ROOT)]),
        }
    }

    pub fn node(&self, id: RouteNodeId) -> &RouteNode {
        &self.nodes[id.0]
    }

    pub fn find(&self, path: &str) -> Option<RouteNodeId> {
        self.by_path.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in creation order; parents always precede their children.
    pub fn iter(&self) -> impl Iterator<Item = (RouteNodeId, &RouteNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (RouteNodeId(index), node))
    }

    fn resolve_or_create(&mut self, segments: &[PathSegment]) -> RouteNodeId {
        let mut current = Self::ROOT;
        let mut path = String::new();
        for segment in segments {
            let part = segment.as_path_part();
            path.push('/');
            path.push_str(&part);
            current = match self.by_path.get(&path) {
                Some(existing) => *existing,
                None => {
                    let id = RouteNodeId(self.nodes.len());
                    self.nodes.push(RouteNode {
                        path: path.clone(),
                        path_part: part,
                        parent: Some(current),
                    });
                    self.by_path.insert(path.clone(), id);
                    id
                }
            };
        }
        current
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "location", content = "name", rename_all = "snake_case")]
pub enum RequestParameter {
    Header(String),
    Path(String),
}

impl RequestParameter {
    pub fn method_request_key(&self) -> String {
        match self {
            Self::Header(name) => format!("method.request.header.{name}"),
            Self::Path(name) => format!("method.request.path.{name}"),
        }
    }
}

/// Forwards a method path parameter to the integration parameter of the same
/// name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathPassthrough {
    pub parameter: String,
}

impl PathPassthrough {
    pub fn method_parameter(&self) -> String {
        format!("method.request.path.{}", self.parameter)
    }

    pub fn integration_parameter(&self) -> String {
        format!("integration.request.path.{}", self.parameter)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedBinding {
    pub descriptor: EndpointDescriptor,
    pub route: RouteNodeId,
    pub authorizer: Option<AuthorizerId>,
    pub required_parameters: Vec<RequestParameter>,
    pub passthrough: Vec<PathPassthrough>,
}

impl ResolvedBinding {
    pub fn required_path_parameters(&self) -> impl Iterator<Item = &str> {
        self.required_parameters.iter().filter_map(|parameter| match parameter {
            RequestParameter::Path(name) => Some(name.as_str()),
            RequestParameter::Header(_) => None,
        })
    }

    pub fn has_required_parameters(&self) -> bool {
        !self.required_parameters.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEndpoints {
    pub routes: RouteTree,
    pub bindings: Vec<ResolvedBinding>,
}

impl ResolvedEndpoints {
    /// Methods bound on a route node, in binding order.
    pub fn methods_at(&self, route: RouteNodeId) -> Vec<HttpMethod> {
        self.bindings
            .iter()
            .filter(|binding| binding.route == route)
            .map(|binding| binding.descriptor.method)
            .collect()
    }
}

/// Resolves descriptors into bindings, one per descriptor, in input order.
///
/// Fails without building anything when two descriptors share `(path,
/// method)`, when a path is malformed, or when an auth-requiring descriptor
/// has no authorizer to attach.
pub fn resolve_endpoints(
    descriptors: &[EndpointDescriptor],
    authorizer: Option<AuthorizerId>,
) -> Result<ResolvedEndpoints, TopologyError> {
    let parsed = validate_table(descriptors, authorizer)?;

    let mut routes = RouteTree::new();
    let mut bindings = Vec::with_capacity(descriptors.len());
    for (descriptor, segments) in descriptors.iter().zip(parsed) {
        let route = routes.resolve_or_create(&segments);

        let mut required_parameters = Vec::new();
        let bound_authorizer = if descriptor.requires_auth {
            required_parameters.push(RequestParameter::Header(AUTHORIZATION_HEADER.to_string()));
            authorizer
        } else {
            None
        };

        let mut passthrough = Vec::new();
        for segment in &segments {
            if let PathSegment::Parameter(name) = segment {
                required_parameters.push(RequestParameter::Path(name.clone()));
                passthrough.push(PathPassthrough {
                    parameter: name.clone(),
                });
            }
        }

        bindings.push(ResolvedBinding {
            descriptor: descriptor.clone(),
            route,
            authorizer: bound_authorizer,
            required_parameters,
            passthrough,
        });
    }

    tracing::debug!(
        component = "endpoint_resolver",
        event = "endpoints_resolved",
        bindings = bindings.len(),
        route_nodes = routes.len(),
    );

    Ok(ResolvedEndpoints { routes, bindings })
}

fn validate_table(
    descriptors: &[EndpointDescriptor],
    authorizer: Option<AuthorizerId>,
) -> Result<Vec<Vec<PathSegment>>, TopologyError> {
    let mut seen: BTreeMap<(String, HttpMethod), usize> = BTreeMap::new();
    let mut parameter_slots: BTreeMap<String, String> = BTreeMap::new();
    let mut parsed = Vec::with_capacity(descriptors.len());

    for (index, descriptor) in descriptors.iter().enumerate() {
        let segments = parse_path(&descriptor.path)?;
        let canonical = canonical_path(&segments);

        if seen
            .insert((canonical.clone(), descriptor.method), index)
            .is_some()
        {
            return Err(TopologyError::DuplicateRoute {
                path: canonical,
                method: descriptor.method,
            });
        }

        if descriptor.requires_auth && authorizer.is_none() {
            return Err(TopologyError::MissingAuthorizer {
                path: canonical,
                method: descriptor.method,
            });
        }

        let mut parent = String::new();
        for segment in &segments {
            if let PathSegment::Parameter(name) = segment {
                let slot = if parent.is_empty() { "/" } else { parent.as_str() };
                match parameter_slots.get(slot) {
                    Some(existing) if existing != name => {
                        return Err(TopologyError::InvalidPath {
                            path: descriptor.path.clone(),
                            reason: format!(
                                "parameter '{{{name}}}' conflicts with sibling '{{{existing}}}' under '{slot}'"
                            ),
                        });
                    }
                    Some(_) => {}
                    None => {
                        parameter_slots.insert(slot.to_string(), name.clone());
                    }
                }
            }
            parent.push('/');
            parent.push_str(&segment.as_path_part());
        }

        parsed.push(segments);
    }

    Ok(parsed)
}

fn canonical_path(segments: &[PathSegment]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    segments
        .iter()
        .map(|segment| format!("/{}", segment.as_path_part()))
        .collect()
}

fn parse_path(path: &str) -> Result<Vec<PathSegment>, TopologyError> {
    let invalid = |reason: &str| TopologyError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let Some(rest) = path.strip_prefix('/') else {
        return Err(invalid("path must start with '/'"));
    };
    if rest.is_empty() {
        return Ok(Vec::new());
    }

    let mut segments = Vec::new();
    let mut parameter_names: Vec<&str> = Vec::new();
    for raw in rest.split('/') {
        if raw.is_empty() {
            return Err(invalid("path contains an empty segment"));
        }
        if let Some(inner) = raw.strip_prefix('{') {
            let Some(name) = inner.strip_suffix('}') else {
                return Err(invalid("unterminated path parameter"));
            };
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(invalid("path parameter names must be non-empty identifiers"));
            }
            if parameter_names.contains(&name) {
                return Err(invalid("path parameter names must be unique"));
            }
            parameter_names.push(name);
            segments.push(PathSegment::Parameter(name.to_string()));
        } else {
            if !raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'))
            {
                return Err(invalid("literal segments may only contain [A-Za-z0-9-_.~]"));
            }
            segments.push(PathSegment::Literal(raw.to_string()));
        }
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(path: &str, method: HttpMethod, function: usize, auth: bool) -> EndpointDescriptor {
        EndpointDescriptor::new(path, method, FunctionHandle(function), auth)
    }

    #[test]
    fn resolves_bindings_in_input_order() {
        let descriptors = vec![
            descriptor("/users", HttpMethod::Post, 1, true),
            descriptor("/health", HttpMethod::Get, 0, false),
            descriptor("/users", HttpMethod::Get, 2, true),
        ];

        let resolved =
            resolve_endpoints(&descriptors, Some(AuthorizerId(0))).expect("table should resolve");

        let order: Vec<_> = resolved
            .bindings
            .iter()
            .map(|binding| (binding.descriptor.path.as_str(), binding.descriptor.method))
            .collect();
        assert_eq!(
            order,
            vec![
                ("/users", HttpMethod::Post),
                ("/health", HttpMethod::Get),
                ("/users", HttpMethod::Get),
            ]
        );
    }

    #[test]
    fn reuses_route_nodes_for_shared_prefixes() {
        let descriptors = vec![
            descriptor("/users", HttpMethod::Get, 0, false),
            descriptor("/users/{userId}", HttpMethod::Get, 1, false),
            descriptor("/users/{userId}/roles", HttpMethod::Get, 2, false),
            descriptor("/users", HttpMethod::Post, 3, false),
        ];

        let resolved = resolve_endpoints(&descriptors, None).expect("table should resolve");

        // root, /users, /users/{userId}, /users/{userId}/roles
        assert_eq!(resolved.routes.len(), 4);
        assert_eq!(resolved.bindings[0].route, resolved.bindings[3].route);
        let roles = resolved.routes.node(resolved.bindings[2].route);
        assert_eq!(roles.path, "/users/{userId}/roles");
        assert_eq!(roles.parent, Some(resolved.bindings[1].route));
        assert_eq!(
            resolved.methods_at(resolved.bindings[0].route),
            vec![HttpMethod::Get, HttpMethod::Post]
        );
    }

    #[test]
    fn root_path_binds_to_root_node() {
        let resolved = resolve_endpoints(&[descriptor("/", HttpMethod::Get, 0, false)], None)
            .expect("root should resolve");
        assert_eq!(resolved.bindings[0].route, RouteTree::ROOT);
        assert!(resolved.routes.node(RouteTree::ROOT).is_root());
    }

    #[test]
    fn duplicate_route_fails_without_bindings() {
        let descriptors = vec![
            descriptor("/users", HttpMethod::Get, 0, false),
            descriptor("/health", HttpMethod::Get, 1, false),
            descriptor("/users", HttpMethod::Get, 2, false),
        ];

        let error = resolve_endpoints(&descriptors, None).expect_err("duplicate should fail");
        assert_eq!(
            error,
            TopologyError::DuplicateRoute {
                path: "/users".to_string(),
                method: HttpMethod::Get,
            }
        );
    }

    #[test]
    fn same_path_with_different_methods_is_allowed() {
        let descriptors = vec![
            descriptor("/users", HttpMethod::Get, 0, false),
            descriptor("/users", HttpMethod::Delete, 1, false),
        ];
        let resolved = resolve_endpoints(&descriptors, None).expect("table should resolve");
        assert_eq!(resolved.bindings.len(), 2);
    }

    #[test]
    fn auth_binding_requires_authorization_header() {
        let resolved = resolve_endpoints(
            &[descriptor("/users", HttpMethod::Get, 0, true)],
            Some(AuthorizerId(0)),
        )
        .expect("table should resolve");

        let binding = &resolved.bindings[0];
        assert_eq!(binding.authorizer, Some(AuthorizerId(0)));
        assert_eq!(
            binding.required_parameters,
            vec![RequestParameter::Header("Authorization".to_string())]
        );
        assert_eq!(
            binding.required_parameters[0].method_request_key(),
            "method.request.header.Authorization"
        );
    }

    #[test]
    fn auth_binding_without_authorizer_is_rejected() {
        let error = resolve_endpoints(&[descriptor("/users", HttpMethod::Get, 0, true)], None)
            .expect_err("missing authorizer should fail");
        assert!(matches!(error, TopologyError::MissingAuthorizer { .. }));
    }

    #[test]
    fn template_parameter_is_required_and_passed_through() {
        let resolved = resolve_endpoints(
            &[descriptor("/users/{userId}", HttpMethod::Get, 0, false)],
            None,
        )
        .expect("table should resolve");

        let binding = &resolved.bindings[0];
        assert_eq!(binding.required_path_parameters().collect::<Vec<_>>(), vec!["userId"]);
        assert_eq!(binding.passthrough.len(), 1);
        assert_eq!(binding.passthrough[0].method_parameter(), "method.request.path.userId");
        assert_eq!(
            binding.passthrough[0].integration_parameter(),
            "integration.request.path.userId"
        );
    }

    #[test]
    fn rejects_malformed_paths() {
        for path in ["users", "/users//x", "/users/", "/users/{}", "/users/{id", "/a b", "/{id}/{id}"] {
            let error = resolve_endpoints(&[descriptor(path, HttpMethod::Get, 0, false)], None)
                .expect_err("path should be rejected");
            assert!(
                matches!(error, TopologyError::InvalidPath { .. }),
                "'{path}' produced {error:?}"
            );
        }
    }

    #[test]
    fn rejects_conflicting_sibling_parameters() {
        let descriptors = vec![
            descriptor("/users/{userId}", HttpMethod::Get, 0, false),
            descriptor("/users/{id}", HttpMethod::Delete, 1, false),
        ];
        let error = resolve_endpoints(&descriptors, None).expect_err("conflict should fail");
        assert!(matches!(error, TopologyError::InvalidPath { .. }));
    }

    #[test]
    fn method_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&HttpMethod::Patch).expect("method should serialize"),
            "\"PATCH\""
        );
    }
}
