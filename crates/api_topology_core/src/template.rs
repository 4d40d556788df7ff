//! Rendering of an assembled topology into a CloudFormation document.
//!
//! Logical ids are derived from names, so identical topologies always render
//! to identical documents. The document is checked before it is returned:
//! ids are unique, every reference resolves and the dependency graph is
//! acyclic.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::endpoints::{HttpMethod, ResolvedBinding, RouteNodeId, RouteTree};
use crate::error::TopologyError;
use crate::parameter_keys::{function_physical_name, rest_api_name};
use crate::topology::{Authorizer, FunctionResource, GatewayPolicy, ServiceTopology};

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";
pub const API_URL_OUTPUT: &str = "ApiUrl";
pub const API_URL_PARAMETER_OUTPUT: &str = "ApiUrlParameterName";

const EXECUTION_ROLE: &str = "FunctionExecutionRole";
const REST_API: &str = "RestApi";
const REQUEST_VALIDATOR: &str = "RequestValidator";
const API_STAGE: &str = "ApiStage";
const API_URL_PARAMETER: &str = "ApiUrlParameter";

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedTemplate {
    pub document: Value,
    pub fingerprint: String,
}

impl RenderedTemplate {
    pub fn resources(&self) -> Option<&Map<String, Value>> {
        self.document.get("Resources").and_then(Value::as_object)
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Value> {
        self.resources().and_then(|resources| resources.get(logical_id))
    }

    pub fn resource_ids_of_type<'a>(&'a self, resource_type: &'a str) -> Vec<&'a str> {
        self.resources()
            .map(|resources| {
                resources
                    .iter()
                    .filter(|(_, resource)| resource["Type"] == resource_type)
                    .map(|(id, _)| id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn to_pretty_json(&self) -> String {
        format!("{:#}", self.document)
    }
}

/// SHA-256 of the compact JSON form. Object keys are sorted, so equal
/// documents always hash equally.
pub fn template_fingerprint(document: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document.to_string());
    format!("{:x}", hasher.finalize())
}

/// `list_users` -> `ListUsers`, `/users/{userId}` -> `UsersUserId`.
pub fn pascal_case(value: &str) -> String {
    value
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    let mut word = first.to_ascii_uppercase().to_string();
                    word.push_str(chars.as_str());
                    word
                }
                None => String::new(),
            }
        })
        .collect()
}

/// PascalCase stems for a list of distinct names. A stem that more than one
/// name collapses to (`users-list` and `usersList`) gets the first eight hex
/// digits of each name's SHA-256 appended.
pub fn logical_stems<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let readable: Vec<(&str, String)> = names
        .into_iter()
        .map(|name| (name, pascal_case(name)))
        .collect();
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, stem) in &readable {
        *counts.entry(stem.as_str()).or_default() += 1;
    }
    readable
        .iter()
        .map(|(name, stem)| {
            if counts.get(stem.as_str()).copied().unwrap_or_default() > 1 {
                format!("{stem}{}", &short_hash(name)[..8])
            } else {
                stem.clone()
            }
        })
        .collect()
}

fn short_hash(value: &str) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

/// Stems indexed by route node. The root reads as `Root`, so a `/root`
/// route makes both of them hashed.
pub fn route_stems(routes: &RouteTree) -> Vec<String> {
    logical_stems(routes.iter().map(|(_, node)| {
        if node.is_root() {
            "root"
        } else {
            node.path.as_str()
        }
    }))
}

pub fn function_logical_id(stem: &str) -> String {
    format!("{stem}Function")
}

pub fn route_logical_id(stem: &str) -> String {
    format!("Route{stem}")
}

pub fn method_logical_id(stem: &str, method: HttpMethod) -> String {
    format!(
        "Method{stem}{}",
        pascal_case(&method.as_str().to_ascii_lowercase())
    )
}

fn authorizer_logical_id(index: usize) -> String {
    if index == 0 {
        "Authorizer".to_string()
    } else {
        format!("Authorizer{index}")
    }
}

#[derive(Debug, Default)]
struct ResourceGraph {
    resources: Map<String, Value>,
}

impl ResourceGraph {
    fn add(&mut self, logical_id: impl Into<String>, resource: Value) -> Result<(), TopologyError> {
        let logical_id = logical_id.into();
        if self.resources.contains_key(&logical_id) {
            return Err(TopologyError::DuplicateLogicalId(logical_id));
        }
        self.resources.insert(logical_id, resource);
        Ok(())
    }

    /// Fingerprint of every API Gateway definition resource. A change in
    /// routes, methods or authorizers changes the deployment id, which makes
    /// the provisioning engine publish a fresh deployment.
    fn api_surface_hash(&self) -> String {
        let surface: Map<String, Value> = self
            .resources
            .iter()
            .filter(|(_, resource)| {
                resource["Type"]
                    .as_str()
                    .is_some_and(|kind| kind.starts_with("AWS::ApiGateway::"))
            })
            .map(|(id, resource)| (id.clone(), resource.clone()))
            .collect();
        template_fingerprint(&Value::Object(surface))
    }
}

pub fn render_template(topology: &ServiceTopology) -> Result<RenderedTemplate, TopologyError> {
    let mut graph = ResourceGraph::default();

    graph.add(EXECUTION_ROLE, execution_role())?;

    let function_stems =
        logical_stems(topology.functions.iter().map(|function| function.name.as_str()));
    let function_ids: Vec<String> = function_stems
        .iter()
        .map(|stem| function_logical_id(stem))
        .collect();
    for ((function, logical_id), stem) in topology
        .functions
        .iter()
        .zip(&function_ids)
        .zip(&function_stems)
    {
        graph.add(logical_id.clone(), function_resource(topology, function))?;
        graph.add(
            format!("{stem}InvokePermission"),
            invoke_permission(logical_id),
        )?;
    }

    graph.add(
        REST_API,
        json!({
            "Type": "AWS::ApiGateway::RestApi",
            "Properties": {
                "Name": rest_api_name(&topology.service_name, &topology.stage),
                "EndpointConfiguration": { "Types": ["REGIONAL"] },
            }
        }),
    )?;

    let authorizer_ids: Vec<String> = (0..topology.authorizers.len())
        .map(authorizer_logical_id)
        .collect();
    for (authorizer, logical_id) in topology.authorizers.iter().zip(&authorizer_ids) {
        let function_id = &function_ids[authorizer.function.0];
        graph.add(logical_id.clone(), authorizer_resource(authorizer, function_id))?;
    }

    if topology.gateway.validate_request_parameters {
        graph.add(
            REQUEST_VALIDATOR,
            json!({
                "Type": "AWS::ApiGateway::RequestValidator",
                "Properties": {
                    "RestApiId": { "Ref": REST_API },
                    "Name": "validate-request-parameters",
                    "ValidateRequestParameters": true,
                    "ValidateRequestBody": false,
                }
            }),
        )?;
    }

    let routes = topology.routes();
    let stems = route_stems(routes);
    let resource_reference = |route: RouteNodeId| -> Value {
        if routes.node(route).is_root() {
            json!({ "Fn::GetAtt": [REST_API, "RootResourceId"] })
        } else {
            json!({ "Ref": route_logical_id(&stems[route.0]) })
        }
    };
    for (route_id, node) in routes.iter() {
        let Some(parent) = node.parent else {
            continue;
        };
        graph.add(
            route_logical_id(&stems[route_id.0]),
            json!({
                "Type": "AWS::ApiGateway::Resource",
                "Properties": {
                    "RestApiId": { "Ref": REST_API },
                    "ParentId": resource_reference(parent),
                    "PathPart": node.path_part,
                }
            }),
        )?;
    }

    let mut method_ids = Vec::with_capacity(topology.bindings().len());
    for binding in topology.bindings() {
        let logical_id =
            method_logical_id(&stems[binding.route.0], binding.descriptor.method);
        let function_id = &function_ids[binding.descriptor.function.0];
        let authorizer_id = binding
            .authorizer
            .map(|authorizer| authorizer_ids[authorizer.0].as_str());
        graph.add(
            logical_id.clone(),
            method_resource(
                topology,
                binding,
                resource_reference(binding.route),
                function_id,
                authorizer_id,
            ),
        )?;
        method_ids.push(logical_id);
    }

    for (route_id, _) in routes.iter() {
        if let Some(preflight) = cors_preflight(topology, route_id, resource_reference(route_id)) {
            let logical_id = format!("Cors{}Preflight", stems[route_id.0]);
            graph.add(logical_id.clone(), preflight)?;
            method_ids.push(logical_id);
        }
    }

    for (logical_id, response_type) in [
        ("GatewayResponseDefault4xx", "DEFAULT_4XX"),
        ("GatewayResponseDefault5xx", "DEFAULT_5XX"),
    ] {
        graph.add(logical_id, gateway_response(&topology.gateway, response_type))?;
    }

    method_ids.sort();
    let deployment_id = format!("Deployment{}", &graph.api_surface_hash()[..12]);
    graph.add(
        deployment_id.clone(),
        json!({
            "Type": "AWS::ApiGateway::Deployment",
            "DependsOn": method_ids,
            "Properties": {
                "RestApiId": { "Ref": REST_API },
                "Description": format!("{} {}", topology.service_name, topology.profile),
            }
        }),
    )?;

    graph.add(
        API_STAGE,
        json!({
            "Type": "AWS::ApiGateway::Stage",
            "Properties": {
                "RestApiId": { "Ref": REST_API },
                "DeploymentId": { "Ref": deployment_id },
                "StageName": topology.stage.as_str(),
                "MethodSettings": [{
                    "ResourcePath": "/*",
                    "HttpMethod": "*",
                    "LoggingLevel": topology.gateway.logging_level.as_str(),
                    "DataTraceEnabled": false,
                    "MetricsEnabled": false,
                }],
            }
        }),
    )?;

    graph.add(
        API_URL_PARAMETER,
        json!({
            "Type": "AWS::SSM::Parameter",
            "Properties": {
                "Name": topology.published_url.name,
                "Type": "String",
                "Description": topology.published_url.description,
                "Value": api_url_expression(),
            }
        }),
    )?;

    let document = json!({
        "AWSTemplateFormatVersion": TEMPLATE_FORMAT_VERSION,
        "Description": format!(
            "{} API ({} profile, stage {})",
            topology.service_name, topology.profile, topology.stage
        ),
        "Resources": Value::Object(graph.resources),
        "Outputs": {
            API_URL_OUTPUT: {
                "Description": "Base URL of the deployed API",
                "Value": api_url_expression(),
            },
            API_URL_PARAMETER_OUTPUT: {
                "Description": "Parameter holding the base URL",
                "Value": { "Ref": API_URL_PARAMETER },
            },
        },
    });

    validate_resource_graph(&document)?;
    let fingerprint = template_fingerprint(&document);

    tracing::debug!(
        component = "template_renderer",
        event = "template_rendered",
        service = %topology.service_name,
        stage = %topology.stage,
        fingerprint = %fingerprint,
    );

    Ok(RenderedTemplate {
        document,
        fingerprint,
    })
}

fn api_url_expression() -> Value {
    json!({
        "Fn::Sub": format!(
            "https://${{{REST_API}}}.execute-api.${{AWS::Region}}.${{AWS::URLSuffix}}/${{{API_STAGE}}}/"
        )
    })
}

fn lambda_invocation_uri(function_id: &str) -> Value {
    json!({
        "Fn::Sub": format!(
            "arn:${{AWS::Partition}}:apigateway:${{AWS::Region}}:lambda:path/2015-03-31/functions/${{{function_id}.Arn}}/invocations"
        )
    })
}

fn execution_role() -> Value {
    json!({
        "Type": "AWS::IAM::Role",
        "Properties": {
            "AssumeRolePolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": { "Service": "lambda.amazonaws.com" },
                    "Action": "sts:AssumeRole",
                }],
            },
            "ManagedPolicyArns": [{
                "Fn::Sub": "arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole"
            }],
        }
    })
}

fn function_resource(topology: &ServiceTopology, function: &FunctionResource) -> Value {
    json!({
        "Type": "AWS::Lambda::Function",
        "Properties": {
            "FunctionName": function_physical_name(&topology.service_name, &topology.stage, &function.name),
            "Handler": function.handler,
            "Runtime": function.runtime,
            "MemorySize": function.memory_mb,
            "Timeout": function.timeout_secs,
            "Role": { "Fn::GetAtt": [EXECUTION_ROLE, "Arn"] },
            "Code": {
                "S3Bucket": function.code.bucket,
                "S3Key": function.code.key,
            },
            "Environment": { "Variables": function.environment.rendered() },
        }
    })
}

fn invoke_permission(function_id: &str) -> Value {
    json!({
        "Type": "AWS::Lambda::Permission",
        "Properties": {
            "Action": "lambda:InvokeFunction",
            "FunctionName": { "Fn::GetAtt": [function_id, "Arn"] },
            "Principal": "apigateway.amazonaws.com",
            "SourceArn": {
                "Fn::Sub": format!(
                    "arn:${{AWS::Partition}}:execute-api:${{AWS::Region}}:${{AWS::AccountId}}:${{{REST_API}}}/*"
                )
            },
        }
    })
}

fn authorizer_resource(authorizer: &Authorizer, function_id: &str) -> Value {
    json!({
        "Type": "AWS::ApiGateway::Authorizer",
        "Properties": {
            "Name": authorizer.name,
            "Type": "TOKEN",
            "RestApiId": { "Ref": REST_API },
            "IdentitySource": authorizer.identity_source,
            "AuthorizerResultTtlInSeconds": authorizer.result_ttl_secs,
            "AuthorizerUri": lambda_invocation_uri(function_id),
        }
    })
}

fn method_resource(
    topology: &ServiceTopology,
    binding: &ResolvedBinding,
    resource: Value,
    function_id: &str,
    authorizer_id: Option<&str>,
) -> Value {
    let mut integration = json!({
        "Type": "AWS_PROXY",
        "IntegrationHttpMethod": "POST",
        "Uri": lambda_invocation_uri(function_id),
    });
    if !binding.passthrough.is_empty() {
        let mapping: BTreeMap<String, String> = binding
            .passthrough
            .iter()
            .map(|passthrough| {
                (
                    passthrough.integration_parameter(),
                    passthrough.method_parameter(),
                )
            })
            .collect();
        integration["RequestParameters"] = json!(mapping);
    }

    let mut properties = json!({
        "RestApiId": { "Ref": REST_API },
        "ResourceId": resource,
        "HttpMethod": binding.descriptor.method.as_str(),
        "Integration": integration,
    });

    match authorizer_id {
        Some(authorizer_id) => {
            properties["AuthorizationType"] = json!("CUSTOM");
            properties["AuthorizerId"] = json!({ "Ref": authorizer_id });
        }
        None => properties["AuthorizationType"] = json!("NONE"),
    }

    if binding.has_required_parameters() {
        let required: BTreeMap<String, bool> = binding
            .required_parameters
            .iter()
            .map(|parameter| (parameter.method_request_key(), true))
            .collect();
        properties["RequestParameters"] = json!(required);
        if topology.gateway.validate_request_parameters {
            properties["RequestValidatorId"] = json!({ "Ref": REQUEST_VALIDATOR });
        }
    }

    json!({
        "Type": "AWS::ApiGateway::Method",
        "Properties": properties,
    })
}

fn cors_preflight(topology: &ServiceTopology, route_id: RouteNodeId, resource: Value) -> Option<Value> {
    let methods = topology.endpoints.methods_at(route_id);
    if methods.is_empty() || methods.contains(&HttpMethod::Options) {
        return None;
    }

    let mut allowed: Vec<&str> = methods.iter().map(|method| method.as_str()).collect();
    allowed.push(HttpMethod::Options.as_str());
    let response_parameters = cors_headers(&topology.gateway, "method.response.header", Some(allowed.as_slice()));
    let declared: BTreeMap<&String, bool> = response_parameters.keys().map(|key| (key, true)).collect();

    Some(json!({
        "Type": "AWS::ApiGateway::Method",
        "Properties": {
            "RestApiId": { "Ref": REST_API },
            "ResourceId": resource,
            "HttpMethod": HttpMethod::Options.as_str(),
            "AuthorizationType": "NONE",
            "Integration": {
                "Type": "MOCK",
                "RequestTemplates": { "application/json": "{\"statusCode\": 204}" },
                "IntegrationResponses": [{
                    "StatusCode": "204",
                    "ResponseParameters": response_parameters,
                }],
            },
            "MethodResponses": [{
                "StatusCode": "204",
                "ResponseParameters": declared,
            }],
        }
    }))
}

fn gateway_response(policy: &GatewayPolicy, response_type: &str) -> Value {
    json!({
        "Type": "AWS::ApiGateway::GatewayResponse",
        "Properties": {
            "RestApiId": { "Ref": REST_API },
            "ResponseType": response_type,
            "ResponseParameters": cors_headers(policy, "gatewayresponse.header", None),
        }
    })
}

fn cors_headers(
    policy: &GatewayPolicy,
    prefix: &str,
    methods: Option<&[&str]>,
) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::from([
        (
            format!("{prefix}.Access-Control-Allow-Origin"),
            format!("'{}'", policy.cors.allow_origins.join(",")),
        ),
        (
            format!("{prefix}.Access-Control-Allow-Headers"),
            format!("'{}'", policy.cors.allow_headers.join(",")),
        ),
    ]);
    if let Some(methods) = methods {
        headers.insert(
            format!("{prefix}.Access-Control-Allow-Methods"),
            format!("'{}'", methods.join(",")),
        );
    }
    if policy.cors.allow_credentials {
        headers.insert(
            format!("{prefix}.Access-Control-Allow-Credentials"),
            "'true'".to_string(),
        );
    }
    headers
}

/// Checks that every `Ref`, `Fn::GetAtt`, `Fn::Sub` variable and `DependsOn`
/// entry names a declared resource, and that resources do not depend on each
/// other in a cycle.
pub fn validate_resource_graph(document: &Value) -> Result<(), TopologyError> {
    let resources = document
        .get("Resources")
        .and_then(Value::as_object)
        .ok_or_else(|| TopologyError::InvalidConfig("template has no Resources section".to_string()))?;

    let mut edges: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for (logical_id, resource) in resources {
        let mut targets = BTreeSet::new();
        if let Some(properties) = resource.get("Properties") {
            collect_references(properties, &mut targets);
        }
        match resource.get("DependsOn") {
            Some(Value::String(target)) => {
                targets.insert(target.clone());
            }
            Some(Value::Array(items)) => {
                targets.extend(items.iter().filter_map(Value::as_str).map(str::to_string));
            }
            _ => {}
        }
        ensure_declared(resources, logical_id, &targets)?;
        edges.insert(logical_id.as_str(), targets);
    }

    if let Some(outputs) = document.get("Outputs") {
        let mut targets = BTreeSet::new();
        collect_references(outputs, &mut targets);
        ensure_declared(resources, "Outputs", &targets)?;
    }

    let mut marks = BTreeMap::new();
    for logical_id in edges.keys() {
        visit(logical_id, &edges, &mut marks)?;
    }
    Ok(())
}

fn ensure_declared(
    resources: &Map<String, Value>,
    owner: &str,
    targets: &BTreeSet<String>,
) -> Result<(), TopologyError> {
    match targets.iter().find(|target| !resources.contains_key(target.as_str())) {
        Some(target) => Err(TopologyError::DanglingReference {
            resource: owner.to_string(),
            target: target.clone(),
        }),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitMark {
    InProgress,
    Done,
}

fn visit<'a>(
    logical_id: &'a str,
    edges: &'a BTreeMap<&'a str, BTreeSet<String>>,
    marks: &mut BTreeMap<&'a str, VisitMark>,
) -> Result<(), TopologyError> {
    match marks.get(logical_id) {
        Some(VisitMark::Done) => return Ok(()),
        Some(VisitMark::InProgress) => {
            return Err(TopologyError::CyclicResourceGraph(logical_id.to_string()))
        }
        None => {}
    }
    marks.insert(logical_id, VisitMark::InProgress);
    if let Some(targets) = edges.get(logical_id) {
        for target in targets {
            visit(target.as_str(), edges, marks)?;
        }
    }
    marks.insert(logical_id, VisitMark::Done);
    Ok(())
}

fn collect_references(value: &Value, targets: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) if map.len() == 1 && map.contains_key("Ref") => {
            if let Some(target) = map["Ref"].as_str() {
                if !target.starts_with("AWS::") {
                    targets.insert(target.to_string());
                }
            }
        }
        Value::Object(map) if map.len() == 1 && map.contains_key("Fn::GetAtt") => {
            match &map["Fn::GetAtt"] {
                Value::Array(parts) => {
                    if let Some(target) = parts.first().and_then(Value::as_str) {
                        targets.insert(target.to_string());
                    }
                }
                Value::String(path) => {
                    if let Some(target) = path.split('.').next() {
                        targets.insert(target.to_string());
                    }
                }
                _ => {}
            }
        }
        Value::Object(map) if map.len() == 1 && map.contains_key("Fn::Sub") => match &map["Fn::Sub"] {
            Value::String(template) => collect_sub_variables(template, &BTreeSet::new(), targets),
            Value::Array(parts) => {
                let locals: BTreeSet<String> = parts
                    .get(1)
                    .and_then(Value::as_object)
                    .map(|variables| variables.keys().cloned().collect())
                    .unwrap_or_default();
                if let Some(template) = parts.first().and_then(Value::as_str) {
                    collect_sub_variables(template, &locals, targets);
                }
                if let Some(variables) = parts.get(1) {
                    collect_references(variables, targets);
                }
            }
            _ => {}
        },
        Value::Object(map) => {
            for nested in map.values() {
                collect_references(nested, targets);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, targets);
            }
        }
        _ => {}
    }
}

fn collect_sub_variables(template: &str, locals: &BTreeSet<String>, targets: &mut BTreeSet<String>) {
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let variable = &after[..end];
        rest = &after[end + 1..];
        if variable.starts_with('!') || variable.starts_with("AWS::") {
            continue;
        }
        let name = variable.split('.').next().unwrap_or(variable);
        if !locals.contains(name) {
            targets.insert(name.to_string());
        }
    }
}
