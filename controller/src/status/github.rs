use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use strum::{AsRefStr, Display};

use super::{
    IntegrationTestStatus, Reporter, Shared, TestReport, comment_body, existing_comment, fetch,
    origin, owner_repo, pull_request, required, send, should_skip, target_url, token, truncate,
    uninitialized,
};
use crate::{labels, prelude::*};
use api::v1alpha1::Snapshot;

static NAME: &str = "GithubReporter";
static PROVIDER: &str = "github";

/// GitHub rejects longer commit status descriptions.
const DESCRIPTION_LEN: usize = 140;
/// Largest page the statuses listing returns.
const PAGE_SIZE: usize = 100;

/// GithubState is a GitHub commit status state.
#[derive(AsRefStr, Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum GithubState {
    Error,
    Failure,
    Pending,
    Success,
}

/// Github_state maps a test status to the commit status state GitHub shows for it.
pub fn github_state(status: IntegrationTestStatus) -> GithubState {
    use IntegrationTestStatus::*;
    match status {
        EnvironmentProvisionError | DeploymentError | TestFail | TestInvalid => {
            GithubState::Failure
        }
        TestPassed => GithubState::Success,
        Pending | InProgress | BuildPLRInProgress => GithubState::Pending,
        Deleted | BuildPLRFailed | SnapshotCreationFailed | GroupSnapshotCreationFailed => {
            GithubState::Error
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommitStatus {
    id: u64,
    context: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct Comment {
    id: u64,
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    state: String,
}

#[derive(Clone, Debug)]
struct Target {
    api: String,
    owner: String,
    repo: String,
    sha: String,
    pull_request: Option<String>,
    namespace: String,
    token: String,
}

impl Target {
    fn repo_path(&self) -> String {
        format!("{}/repos/{}/{}", self.api, self.owner, self.repo)
    }
}

/// GithubReporter writes commit statuses and pull request comments through the GitHub REST API.
pub struct GithubReporter {
    shared: Shared,
    target: Option<Target>,
}

impl GithubReporter {
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
        self.shared
            .http
            .get(url)
            .bearer_auth(&t.token)
            .header("Accept", "application/vnd.github+json")
    }

    fn post(&self, t: &Target, url: String) -> reqwest::RequestBuilder {
        self.shared
            .http
            .post(url)
            .bearer_auth(&t.token)
            .header("Accept", "application/vnd.github+json")
    }

    #[instrument(skip_all, fields(context = %report.full_name))]
    async fn upsert_commit_status(&self, t: &Target, report: &TestReport) -> Result<()> {
        let want = github_state(report.status);
        let statuses: Vec<CommitStatus> = fetch(self.get(
            t,
            format!(
                "{}/commits/{}/statuses?per_page={PAGE_SIZE}",
                t.repo_path(),
                t.sha
            ),
        ))
        .await?;
        let existing = statuses
            .iter()
            .filter(|s| s.context == report.full_name)
            .max_by_key(|s| s.id);
        if should_skip(
            existing.map(|s| s.state.as_str()),
            want.as_ref(),
            report.status,
        ) {
            debug!(state = %want, "commit status already up to date");
            return Ok(());
        }

        let mut body = json!({
            "state": want.as_ref(),
            "context": report.full_name,
            "description": truncate(&report.summary, DESCRIPTION_LEN),
        });
        if let Some(url) = target_url(&self.shared, report, &t.namespace) {
            body["target_url"] = json!(url);
        }
        send(
            self.post(t, format!("{}/statuses/{}", t.repo_path(), t.sha))
                .json(&body),
        )
        .await?;
        info!(state = %want, "created commit status");
        Ok(())
    }

    #[instrument(skip_all, fields(pull_request = number))]
    async fn upsert_comment(&self, t: &Target, number: &str, report: &TestReport) -> Result<()> {
        let url = format!("{}/issues/{number}/comments", t.repo_path());
        let comments: Vec<Comment> = fetch(self.get(t, url.clone())).await?;
        let found = existing_comment(
            comments.iter().map(|c| (c.id, c.body.as_str())),
            &report.scenario_name,
            &report.snapshot_name,
        );
        if let Some(id) = found {
            debug!(id, "comment already exists");
            return Ok(());
        }
        send(self.post(t, url).json(&json!({ "body": comment_body(report) }))).await?;
        info!("created pull request comment");
        Ok(())
    }
}

#[async_trait]
impl Reporter for GithubReporter {
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
        let (origin, url) = origin(repo_url)?;
        let from_labels = labels::label_or_annotation(
            snapshot,
            &labels::pac_test_label(labels::pac::URL_ORG),
        )
        .zip(labels::label_or_annotation(
            snapshot,
            &labels::pac_test_label(labels::pac::URL_REPOSITORY),
        ))
        .map(|(o, r)| (o.to_string(), r.to_string()));
        let (owner, repo) = from_labels
            .or_else(|| owner_repo(&url))
            .ok_or_else(|| Error::MissingMetadata(format!("no owner/repo in {repo_url}")))?;
        let api = if url.host_str() == Some("github.com") {
            "https://api.github.com".to_string()
        } else {
            format!("{origin}/api/v3")
        };

        self.target = Some(Target {
            api,
            owner,
            repo,
            sha: sha.into(),
            pull_request: pull_request(snapshot),
            namespace: snapshot.namespace().unwrap_or_default(),
            token: token(&self.shared, snapshot, repo_url).await?,
        });
        Ok(())
    }

    async fn report_status(&self, report: &TestReport) -> Result<()> {
        let t = self.target()?;
        self.upsert_commit_status(t, report).await?;
        if let Some(n) = &t.pull_request
            && report.status.is_final()
        {
            self.upsert_comment(t, n, report).await?;
        }
        Ok(())
    }

    async fn is_pr_open(&self) -> Result<bool> {
        let t = self.target()?;
        let Some(n) = &t.pull_request else {
            return Ok(false);
        };
        let pr: PullRequest = fetch(self.get(t, format!("{}/pulls/{n}", t.repo_path()))).await?;
        Ok(pr.state == "open")
    }
}
