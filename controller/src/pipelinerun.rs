//! Pipelinerun holds predicates over build PipelineRuns.

use serde::{Deserialize, Serialize};

use crate::{labels, prelude::*};

/// SUCCEEDED is the condition Tekton reports execution state in.
static SUCCEEDED: &str = "Succeeded";

/// IMAGE_DIGEST and friends are the build pipeline results the controller consumes.
pub static IMAGE_DIGEST: &str = "IMAGE_DIGEST";
pub static IMAGE_URL: &str = "IMAGE_URL";
pub static GIT_URL: &str = "CHAINS-GIT_URL";
pub static GIT_COMMIT: &str = "CHAINS-GIT_COMMIT";

fn succeeded_status(plr: &PipelineRun) -> Option<&str> {
    plr.status
        .as_ref()
        .and_then(|s| s.condition(SUCCEEDED))
        .map(|c| c.status.as_str())
}

/// Has_succeeded reports whether the run finished successfully.
pub fn has_succeeded(plr: &PipelineRun) -> bool {
    succeeded_status(plr) == Some("True")
}

/// Has_finished reports whether the run finished, successfully or not.
pub fn has_finished(plr: &PipelineRun) -> bool {
    matches!(succeeded_status(plr), Some("True" | "False"))
}

/// Has_failed reports whether the run finished unsuccessfully.
pub fn has_failed(plr: &PipelineRun) -> bool {
    succeeded_status(plr) == Some("False")
}

pub fn is_being_deleted(plr: &PipelineRun) -> bool {
    plr.meta().deletion_timestamp.is_some()
}

pub fn has_finalizer(plr: &PipelineRun) -> bool {
    plr.finalizers()
        .iter()
        .any(|f| f == labels::PIPELINERUN_FINALIZER)
}

/// Result returns a string result of the run.
pub fn result<'a>(plr: &'a PipelineRun, name: &str) -> Option<&'a str> {
    plr.status
        .as_ref()
        .and_then(|s| s.result(name))
        .and_then(|r| r.as_str())
        .filter(|v| !v.is_empty())
}

pub fn component_name(plr: &PipelineRun) -> Option<&str> {
    plr.labels()
        .get(labels::COMPONENT_LABEL)
        .map(String::as_str)
}

/// Is_pull_request reports whether Pipelines-as-Code started the run for a pull or merge request.
pub fn is_pull_request(plr: &PipelineRun) -> bool {
    if plr
        .labels()
        .contains_key(&labels::pac_label(labels::pac::PULL_REQUEST))
    {
        return true;
    }
    labels::label_or_annotation(plr, &labels::pac_label(labels::pac::EVENT_TYPE))
        .is_some_and(labels::is_pull_request_event)
}

pub fn is_chains_signed(plr: &PipelineRun) -> bool {
    plr.annotations()
        .get(labels::CHAINS_SIGNED_ANNOTATION)
        .is_some_and(|v| v == "true")
}

pub fn source_branch(plr: &PipelineRun) -> Option<&str> {
    labels::label_or_annotation(plr, &labels::pac_label(labels::pac::SOURCE_BRANCH))
        .filter(|b| !b.is_empty())
}

/// Start_time returns the build start as unix seconds, falling back to the creation time.
pub fn start_time(plr: &PipelineRun) -> Option<i64> {
    plr.status
        .as_ref()
        .and_then(|s| s.start_time.as_ref())
        .or(plr.meta().creation_timestamp.as_ref())
        .map(|t| t.0.as_second())
}

/// CreateSnapshotStatus is the JSON record kept in [`labels::CREATE_SNAPSHOT_ANNOTATION`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CreateSnapshotStatus {
    pub status: String,
    pub message: String,
}

impl CreateSnapshotStatus {
    pub fn failed<S: ToString>(message: S) -> Self {
        Self {
            status: "failed".into(),
            message: message.to_string(),
        }
    }
}

/// Create_snapshot_status returns the failure record, if one was written and is readable.
pub fn create_snapshot_status(plr: &PipelineRun) -> Option<CreateSnapshotStatus> {
    plr.annotations()
        .get(labels::CREATE_SNAPSHOT_ANNOTATION)
        .and_then(|v| serde_json::from_str(v).ok())
}
