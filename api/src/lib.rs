#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]
//! Api contains the Kubernetes resources the integration controller reads and writes.
//!
//! Only [`v1alpha1::Snapshot`] is created by the controller. Everything else is owned by other
//! systems (the build engine, Pipelines-as-Code, the application service) and is modeled here as
//! far as the controller needs to look at it.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

pub mod pac;
pub mod tekton;
pub mod v1alpha1;
pub mod v1beta2;

/// GROUP is the kubernetes API group for application and test resources.
pub static GROUP: &str = "appstudio.redhat.com";

/// ComponentSource describes where a Component's code lives.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSource {
    /// Git is the git repository holding the source.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub git: Option<GitSource>,
}

/// GitSource names a git repository and, optionally, a revision within it.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    /// Url is the clone URL.
    #[validate(length(min = 1))]
    pub url: String,
    /// Revision is a branch, tag, or commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Context is the directory inside the repository to build from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// DockerfileUrl points at the Containerfile used for the build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile_url: Option<String>,
}
