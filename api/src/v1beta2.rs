use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// IntegrationTestScenarioSpec describes a test pipeline run against Snapshots of an Application.
#[derive(
    CustomResource, Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, JsonSchema,
)]
#[kube(
    group = "appstudio.redhat.com",
    version = "v1beta2",
    kind = "IntegrationTestScenario",
    namespaced,
    derive = "PartialEq",
    shortname = "its"
)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationTestScenarioSpec {
    /// Application is the name of the Application the scenario tests.
    pub application: String,
    /// ResolverRef locates the test pipeline definition.
    #[serde(default)]
    pub resolver_ref: ResolverRef,
    /// Params are passed to the test pipeline.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<PipelineParameter>,
    /// Contexts restrict which Snapshots the scenario applies to.
    ///
    /// An empty list applies to every Snapshot.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<TestContext>,
}

/// ResolverRef names a Tekton resolver and its parameters.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolverRef {
    /// Resolver is the resolver kind, e.g. "git" or "bundles".
    #[serde(default)]
    pub resolver: String,
    /// Params configure the resolver.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ResolverParameter>,
}

/// ResolverParameter is a single resolver parameter.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
pub struct ResolverParameter {
    /// Name of the parameter.
    pub name: String,
    /// Value of the parameter.
    pub value: String,
}

/// PipelineParameter is a parameter handed to the test pipeline.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
pub struct PipelineParameter {
    /// Name of the parameter.
    pub name: String,
    /// Value for string parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Values for array parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// TestContext selects a class of Snapshots.
///
/// Known names are "application", "component", "component_<name>", "group", "pull_request",
/// and "push".
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
pub struct TestContext {
    /// Name of the context.
    pub name: String,
    /// Description is free-form text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
