//! Tekton's PipelineRun, as far as the controller looks at it.
//!
//! The execution engine owns these objects. The controller only reads the status and touches
//! labels, annotations, and finalizers.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// PipelineRunSpec is the requested pipeline execution.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
#[kube(
    group = "tekton.dev",
    version = "v1",
    kind = "PipelineRun",
    namespaced,
    status = "PipelineRunStatus",
    derive = "PartialEq",
    shortname = "pr"
)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSpec {
    /// PipelineRef locates the pipeline definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_ref: Option<PipelineRef>,
    /// Params are the pipeline parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

/// PipelineRef locates a pipeline by name or through a resolver.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRef {
    /// Name of an in-cluster Pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Resolver used to fetch the pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolver: Option<String>,
    /// Params for the resolver.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

/// Param is a named value. Tekton values are strings, arrays, or objects.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
pub struct Param {
    /// Name of the parameter.
    pub name: String,
    /// Value of the parameter.
    pub value: serde_json::Value,
}

/// PipelineRunStatus is the execution record.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunStatus {
    /// Conditions holds the "Succeeded" condition.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Results are the pipeline outputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<PipelineRunResult>,
    /// StartTime is when execution started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Time>,
    /// CompletionTime is when execution finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<Time>,
}

/// Condition is a knative-style condition.
///
/// Unlike the core Kubernetes condition, most fields are optional.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of the condition, e.g. "Succeeded".
    #[serde(rename = "type")]
    pub type_: String,
    /// Status is one of "True", "False", or "Unknown".
    pub status: String,
    /// Reason is a machine-readable explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Message is a human-readable explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// LastTransitionTime is when the status last changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

/// PipelineRunResult is one pipeline output.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
pub struct PipelineRunResult {
    /// Name of the result.
    pub name: String,
    /// Value of the result.
    pub value: serde_json::Value,
}

impl PipelineRunResult {
    /// As_str returns the value if it's a string result.
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

impl PipelineRunStatus {
    /// Condition returns the condition with the provided type, if present.
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Result returns the named result, if present.
    pub fn result(&self, name: &str) -> Option<&PipelineRunResult> {
        self.results.iter().find(|r| r.name == name)
    }
}
