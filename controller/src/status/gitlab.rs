use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use strum::{AsRefStr, Display};

use super::{
    IntegrationTestStatus, Reporter, Shared, TestReport, comment_body, existing_comment, fetch,
    origin, pull_request, required, send, should_skip, target_url, token, uninitialized,
};
use crate::{labels, prelude::*};
use api::v1alpha1::Snapshot;

static NAME: &str = "GitlabReporter";
static PROVIDER: &str = "gitlab";

/// GitlabState is a GitLab commit status state.
#[derive(AsRefStr, Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum GitlabState {
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
}

/// Gitlab_state maps a test status to the commit status state GitLab shows for it.
pub fn gitlab_state(status: IntegrationTestStatus) -> GitlabState {
    use IntegrationTestStatus::*;
    match status {
        EnvironmentProvisionError | DeploymentError | TestFail | TestInvalid => {
            GitlabState::Failed
        }
        TestPassed => GitlabState::Success,
        InProgress => GitlabState::Running,
        Pending | BuildPLRInProgress => GitlabState::Pending,
        Deleted | BuildPLRFailed | SnapshotCreationFailed | GroupSnapshotCreationFailed => {
            GitlabState::Canceled
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommitStatus {
    id: u64,
    name: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct Note {
    id: u64,
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct MergeRequest {
    state: String,
}

#[derive(Clone, Debug)]
struct Target {
    api: String,
    sha: String,
    source_project: String,
    target_project: String,
    merge_request: Option<String>,
    namespace: String,
    token: String,
}

impl Target {
    fn is_fork(&self) -> bool {
        self.source_project != self.target_project
    }
}

/// GitlabReporter writes commit statuses and merge request notes through the GitLab REST API.
///
/// Commit statuses live in the source project. Notes and merge request state live in the
/// target project, which owns the merge request.
pub struct GitlabReporter {
    shared: Shared,
    target: Option<Target>,
}

/// A commit status that is already in the requested state is reported as a 400 with this text.
static CANNOT_TRANSITION: &str = "Cannot transition status";

impl GitlabReporter {
    pub fn new(shared: Shared) -> Self {
        Self {
            shared,
            target: None,
        }
    }

    fn target(&self) -> Result<&Target> {
        self.target.as_ref().ok_or_else(|| uninitialized(NAME))
    }

    fn get(&self, t: &Target, url: String) -> reqwest::RequestBuilder {
        self.shared.http.get(url).bearer_auth(&t.token)
    }

    fn post(&self, t: &Target, url: String) -> reqwest::RequestBuilder {
        self.shared.http.post(url).bearer_auth(&t.token)
    }

    #[instrument(skip_all, fields(name = %report.full_name))]
    async fn upsert_commit_status(&self, t: &Target, report: &TestReport) -> Result<()> {
        if t.is_fork() {
            info!(
                source_project = %t.source_project,
                target_project = %t.target_project,
                "Won't create/update commitStatus due to the access limitation for forked repo"
            );
            return Ok(());
        }

        let want = gitlab_state(report.status);
        let statuses: Vec<CommitStatus> = fetch(self.get(
            t,
            format!(
                "{}/projects/{}/repository/commits/{}/statuses",
                t.api, t.source_project, t.sha
            ),
        ))
        .await?;
        let existing = statuses
            .iter()
            .filter(|s| s.name == report.full_name)
            .max_by_key(|s| s.id);
        if should_skip(
            existing.map(|s| s.status.as_str()),
            want.as_ref(),
            report.status,
        ) {
            debug!(state = %want, "commit status already up to date");
            return Ok(());
        }

        let mut body = json!({
            "state": want.as_ref(),
            "name": report.full_name,
            "description": report.summary,
        });
        if let Some(url) = target_url(&self.shared, report, &t.namespace) {
            body["target_url"] = json!(url);
        }
        let req = self
            .post(
                t,
                format!("{}/projects/{}/statuses/{}", t.api, t.source_project, t.sha),
            )
            .json(&body);
        match send(req).await {
            Ok(_) => {
                info!(state = %want, "created commit status");
                Ok(())
            }
            Err(Error::Provider { status: 400, body, .. }) if body.contains(CANNOT_TRANSITION) => {
                debug!(state = %want, "commit status already in the requested state");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    #[instrument(skip_all, fields(merge_request = iid))]
    async fn upsert_note(&self, t: &Target, iid: &str, report: &TestReport) -> Result<()> {
        let url = format!(
            "{}/projects/{}/merge_requests/{iid}/notes",
            t.api, t.target_project
        );
        let notes: Vec<Note> = fetch(self.get(t, url.clone())).await?;
        let found = existing_comment(
            notes.iter().map(|n| (n.id, n.body.as_str())),
            &report.scenario_name,
            &report.snapshot_name,
        );
        if let Some(id) = found {
            debug!(id, "note already exists");
            return Ok(());
        }
        send(self.post(t, url).json(&json!({ "body": comment_body(report) }))).await?;
        info!("created merge request note");
        Ok(())
    }
}

#[async_trait]
impl Reporter for GitlabReporter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(&self, snapshot: &Snapshot) -> bool {
        labels::has_value(
            snapshot,
            &labels::pac_test_label(labels::pac::GIT_PROVIDER),
            PROVIDER,
        )
    }

    async fn initialize(&mut self, snapshot: &Snapshot) -> Result<()> {
        let repo_url = required(snapshot, &labels::pac_test_label(labels::pac::REPO_URL))?;
        let sha = required(snapshot, &labels::pac_test_label(labels::pac::SHA))?;
        let source = required(
            snapshot,
            &labels::pac_test_label(labels::pac::SOURCE_PROJECT_ID),
        )?;
        let target = required(
            snapshot,
            &labels::pac_test_label(labels::pac::TARGET_PROJECT_ID),
        )?;
        let (origin, _) = origin(repo_url)?;

        self.target = Some(Target {
            api: format!("{origin}/api/v4"),
            sha: sha.into(),
            source_project: source.into(),
            target_project: target.into(),
            merge_request: pull_request(snapshot),
            namespace: snapshot.namespace().unwrap_or_default(),
            token: token(&self.shared, snapshot, repo_url).await?,
        });
        Ok(())
    }

    async fn report_status(&self, report: &TestReport) -> Result<()> {
        let t = self.target()?;
        self.upsert_commit_status(t, report).await?;
        if let Some(iid) = &t.merge_request
            && report.status.is_final()
        {
            self.upsert_note(t, iid, report).await?;
        }
        Ok(())
    }

    async fn is_pr_open(&self) -> Result<bool> {
        let t = self.target()?;
        let Some(iid) = &t.merge_request else {
            return Ok(false);
        };
        let mr: MergeRequest = fetch(self.get(
            t,
            format!(
                "{}/projects/{}/merge_requests/{iid}",
                t.api, t.target_project
            ),
        ))
        .await?;
        Ok(mr.state == "opened")
    }
}
