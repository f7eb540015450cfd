//! Pipelines-as-Code's Repository, used to find git provider credentials.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// DEFAULT_TOKEN_KEY is the Secret key Pipelines-as-Code uses when none is configured.
pub static DEFAULT_TOKEN_KEY: &str = "provider.token";

/// RepositorySpec connects a git repository to a namespace.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
#[kube(
    group = "pipelinesascode.tekton.dev",
    version = "v1alpha1",
    kind = "Repository",
    namespaced,
    derive = "PartialEq",
    shortname = "repo"
)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    /// Url is the repository's web URL.
    pub url: String,
    /// GitProvider configures API access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_provider: Option<GitProvider>,
}

/// GitProvider configures API access for a Repository.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitProvider {
    /// Url overrides the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Type is the provider kind.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Secret holds the access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretRef>,
}

/// SecretRef names a Secret key in the Repository's namespace.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
pub struct SecretRef {
    /// Name of the Secret.
    pub name: String,
    /// Key inside the Secret, defaulting to [`DEFAULT_TOKEN_KEY`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl SecretRef {
    /// Key_or_default returns the configured key or the Pipelines-as-Code default.
    pub fn key_or_default(&self) -> &str {
        self.key.as_deref().unwrap_or(DEFAULT_TOKEN_KEY)
    }
}
