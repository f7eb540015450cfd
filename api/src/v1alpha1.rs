use k8s_openapi::apimachinery::pkg::apis::meta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::*;

/// ApplicationSpec describes a set of Components released together.
#[derive(
    CustomResource, Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, JsonSchema,
)]
#[kube(
    group = "appstudio.redhat.com",
    version = "v1alpha1",
    kind = "Application",
    namespaced,
    status = "ApplicationStatus",
    derive = "PartialEq",
    shortname = "app"
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// DisplayName is a human-readable name.
    #[serde(default)]
    pub display_name: String,
    /// Description is free-form text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// ApplicationStatus is the observed state of an Application.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    /// Conditions reports k8s-style conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<meta::v1::Condition>,
}

/// ComponentSpec describes one buildable unit of an Application.
#[derive(
    CustomResource, Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, JsonSchema,
)]
#[kube(
    group = "appstudio.redhat.com",
    version = "v1alpha1",
    kind = "Component",
    namespaced,
    status = "ComponentStatus",
    derive = "PartialEq",
    shortname = "comp"
)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// ComponentName is the name of the component within the Application.
    pub component_name: String,
    /// Application is the name of the owning Application.
    pub application: String,
    /// ContainerImage is the image the Component currently deploys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,
    /// Source is where the Component's code lives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ComponentSource>,
}

/// ComponentStatus is the observed state of a Component.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// LastPromotedImage is the last image that passed integration and was promoted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_promoted_image: Option<String>,
    /// Conditions reports k8s-style conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<meta::v1::Condition>,
}

impl Component {
    /// Deployed_image reports the image this Component currently stands for, preferring the
    /// last promoted one.
    pub fn deployed_image(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.last_promoted_image.as_deref())
            .or(self.spec.container_image.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// SnapshotSpec is the resolved set of images for an Application at a point in time.
///
/// Snapshots are never modified after creation, except for their metadata.
#[derive(
    CustomResource, Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, JsonSchema,
)]
#[kube(
    group = "appstudio.redhat.com",
    version = "v1alpha1",
    kind = "Snapshot",
    namespaced,
    status = "SnapshotStatus",
    derive = "PartialEq",
    shortname = "snap"
)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSpec {
    /// Application is the name of the Application the Snapshot belongs to.
    #[validate(length(min = 1))]
    pub application: String,
    /// DisplayName is a human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// DisplayDescription is free-form text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_description: Option<String>,
    /// Components holds one entry per included Component.
    #[serde(default)]
    #[validate(length(min = 1), nested)]
    pub components: Vec<SnapshotComponent>,
}

/// SnapshotComponent is one Component's image in a Snapshot.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotComponent {
    /// Name is the Component name.
    #[validate(length(min = 1))]
    pub name: String,
    /// ContainerImage is a digest-qualified image reference.
    #[validate(length(min = 1))]
    pub container_image: String,
    /// Source is the source revision the image was built from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub source: Option<ComponentSource>,
}

/// SnapshotStatus is the observed state of a Snapshot.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStatus {
    /// Conditions reports k8s-style conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<meta::v1::Condition>,
}
