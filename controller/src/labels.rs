//! Labels holds the well-known label, annotation, and finalizer keys.
//!
//! All state the controller keeps lives in these keys on the objects themselves, so a restarted
//! controller picks up exactly where the previous one left off.

use kube::ResourceExt;

/// PIPELINE_TYPE_LABEL marks the kind of pipeline; watched PipelineRuns carry "build".
pub static PIPELINE_TYPE_LABEL: &str = "pipelines.appstudio.openshift.io/type";
/// PIPELINE_TYPE_BUILD is the [`PIPELINE_TYPE_LABEL`] value for build pipelines.
pub static PIPELINE_TYPE_BUILD: &str = "build";

pub static COMPONENT_LABEL: &str = "appstudio.openshift.io/component";
pub static APPLICATION_LABEL: &str = "appstudio.openshift.io/application";
/// BUILD_PIPELINERUN_LABEL is the back-reference from a Snapshot to its build PipelineRun.
pub static BUILD_PIPELINERUN_LABEL: &str = "appstudio.openshift.io/build-pipelinerun";
/// SNAPSHOT_ANNOTATION is the forward reference from a build PipelineRun to its Snapshot.
pub static SNAPSHOT_ANNOTATION: &str = "appstudio.openshift.io/snapshot";

pub static SNAPSHOT_TYPE_LABEL: &str = "test.appstudio.openshift.io/type";
pub static SNAPSHOT_TYPE_COMPONENT: &str = "component";
pub static SNAPSHOT_TYPE_GROUP: &str = "group";

pub static BUILD_START_TIME_ANNOTATION: &str = "test.appstudio.openshift.io/pipelinerunstarttime";

/// PIPELINERUN_FINALIZER holds deletion of a build PipelineRun until its Snapshot exists.
pub static PIPELINERUN_FINALIZER: &str = "test.appstudio.openshift.io/pipelinerun";

/// CREATE_SNAPSHOT_ANNOTATION holds the JSON failure record written when no Snapshot can be
/// created for a build.
pub static CREATE_SNAPSHOT_ANNOTATION: &str = "test.appstudio.openshift.io/create-snapshot-status";

pub static PR_GROUP_ANNOTATION: &str = "test.appstudio.openshift.io/pr-group";
pub static PR_GROUP_HASH_LABEL: &str = "test.appstudio.openshift.io/pr-group-sha";
pub static PR_GROUP_CREATION_ANNOTATION: &str =
    "test.appstudio.openshift.io/create-groupsnapshot-status";

/// SNAPSHOT_CREATION_REPORT_ANNOTATION records the last status reported to the git provider
/// straight from a build PipelineRun.
pub static SNAPSHOT_CREATION_REPORT_ANNOTATION: &str =
    "test.appstudio.openshift.io/snapshot-creation-report";
/// SNAPSHOT_CREATED_REPORT is the report annotation value once a Snapshot exists.
pub static SNAPSHOT_CREATED_REPORT: &str = "SnapshotCreated";

pub static CHAINS_SIGNED_ANNOTATION: &str = "chains.tekton.dev/signed";

/// PAC_PREFIX is the prefix Pipelines-as-Code writes on PipelineRuns.
pub static PAC_PREFIX: &str = "pipelinesascode.tekton.dev/";
/// PAC_TEST_PREFIX is where [`PAC_PREFIX`] keys land on Snapshots.
pub static PAC_TEST_PREFIX: &str = "pac.test.appstudio.openshift.io/";
pub static BUILD_PREFIX: &str = "build.appstudio";
pub static CUSTOM_PREFIX: &str = "custom.appstudio.openshift.io/";

/// Pipelines-as-Code keys, without a prefix.
pub mod pac {
    pub static EVENT_TYPE: &str = "event-type";
    pub static PULL_REQUEST: &str = "pull-request";
    pub static GIT_PROVIDER: &str = "git-provider";
    pub static SOURCE_BRANCH: &str = "source-branch";
    pub static REPO_URL: &str = "repo-url";
    pub static SHA: &str = "sha";
    pub static URL_ORG: &str = "url-org";
    pub static URL_REPOSITORY: &str = "url-repository";
    pub static SOURCE_PROJECT_ID: &str = "source-project-id";
    pub static TARGET_PROJECT_ID: &str = "target-project-id";
}

/// Pac_label returns the Pipelines-as-Code key as found on a PipelineRun.
pub fn pac_label<S: AsRef<str>>(s: S) -> String {
    keyify(PAC_PREFIX, s)
}

/// Pac_test_label returns the Pipelines-as-Code key as found on a Snapshot.
pub fn pac_test_label<S: AsRef<str>>(s: S) -> String {
    keyify(PAC_TEST_PREFIX, s)
}

fn keyify<S: ToString, K: AsRef<str>>(space: S, key: K) -> String {
    let mut out = space.to_string();
    out.push_str(key.as_ref());
    out
}

/// Label_or_annotation looks up `key` in the labels first, then the annotations.
pub fn label_or_annotation<'a, K: ResourceExt>(obj: &'a K, key: &str) -> Option<&'a str> {
    obj.labels()
        .get(key)
        .or_else(|| obj.annotations().get(key))
        .map(String::as_str)
}

/// Has_value reports whether either the label or annotation `key` is exactly `value`.
pub fn has_value<K: ResourceExt>(obj: &K, key: &str, value: &str) -> bool {
    obj.labels().get(key).is_some_and(|v| v == value)
        || obj.annotations().get(key).is_some_and(|v| v == value)
}

/// Is_pull_request_event reports whether a Pipelines-as-Code event type names a pull or merge
/// request, in any of the spellings the providers use.
pub fn is_pull_request_event(event: &str) -> bool {
    let folded: String = event
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .map(|c| c.to_ascii_lowercase())
        .collect();
    matches!(folded.as_str(), "pullrequest" | "mergerequest")
}
