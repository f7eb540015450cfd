use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use strum::{AsRefStr, Display};

use super::{
    IntegrationTestStatus, Reporter, Shared, TestReport, comment_body, existing_comment, fetch,
    origin, owner_repo, pull_request, required, send, should_skip, target_url, token,
    uninitialized,
};
use crate::{labels, prelude::*};
use api::v1alpha1::Snapshot;

static NAME: &str = "BitbucketReporter";
static PROVIDER: &str = "bitbucket";

/// Bitbucket limits build status keys to 40 characters.
const KEY_LEN: usize = 40;
/// Largest page the statuses listing returns.
const PAGE_SIZE: usize = 100;

/// BitbucketState is a Bitbucket build status state.
#[derive(AsRefStr, Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "UPPERCASE")]
pub enum BitbucketState {
    Successful,
    Failed,
    InProgress,
    Stopped,
}

/// Bitbucket_state maps a test status to the build status state Bitbucket shows for it.
pub fn bitbucket_state(status: IntegrationTestStatus) -> BitbucketState {
    use IntegrationTestStatus::*;
    match status {
        EnvironmentProvisionError | DeploymentError | TestFail | TestInvalid => {
            BitbucketState::Failed
        }
        TestPassed => BitbucketState::Successful,
        Pending | InProgress | BuildPLRInProgress => BitbucketState::InProgress,
        Deleted | BuildPLRFailed | SnapshotCreationFailed | GroupSnapshotCreationFailed => {
            BitbucketState::Stopped
        }
    }
}

/// Status_key derives the build status key, which must stay stable for a full name.
fn status_key(full_name: &str) -> String {
    let mut k = hex::encode(Sha256::digest(full_name.as_bytes()));
    k.truncate(KEY_LEN);
    k
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct BuildStatus {
    key: String,
    state: String,
    #[serde(default)]
    updated_on: String,
}

#[derive(Debug, Deserialize)]
struct CommentContent {
    #[serde(default)]
    raw: String,
}

#[derive(Debug, Deserialize)]
struct Comment {
    id: u64,
    content: CommentContent,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    state: String,
}

#[derive(Clone, Debug)]
struct Target {
    api: String,
    workspace: String,
    repo: String,
    sha: String,
    pull_request: Option<String>,
    namespace: String,
    token: String,
}

impl Target {
    fn repo_path(&self) -> String {
        format!("{}/repositories/{}/{}", self.api, self.workspace, self.repo)
    }
}

/// BitbucketReporter writes build statuses and pull request comments through the Bitbucket
/// 2.0 API.
pub struct BitbucketReporter {
    shared: Shared,
    target: Option<Target>,
}

impl BitbucketReporter {
    pub fn new(shared: Shared) -> Self {
        Self {
            shared,
            target: None,
        }
    }

    fn target(&self) -> Result<&Target> {
        self.target.as_ref().ok_or_else(|| uninitialized(NAME))
    }

    #[instrument(skip_all, fields(name = %report.full_name))]
    async fn upsert_build_status(&self, t: &Target, report: &TestReport) -> Result<()> {
        let want = bitbucket_state(report.status);
        let key = status_key(&report.full_name);
        let page: Page<BuildStatus> = fetch(
            self.shared
                .http
                .get(format!(
                    "{}/commit/{}/statuses?pagelen={PAGE_SIZE}",
                    t.repo_path(),
                    t.sha
                ))
                .bearer_auth(&t.token),
        )
        .await?;
        let existing = page
            .values
            .iter()
            .filter(|s| s.key == key)
            .max_by(|a, b| a.updated_on.cmp(&b.updated_on));
        if should_skip(
            existing.map(|s| s.state.as_str()),
            want.as_ref(),
            report.status,
        ) {
            debug!(state = %want, "build status already up to date");
            return Ok(());
        }

        let mut body = json!({
            "key": key,
            "state": want.as_ref(),
            "name": report.full_name,
            "description": report.summary,
        });
        // Bitbucket requires a url on every build status.
        body["url"] = json!(
            target_url(&self.shared, report, &t.namespace).unwrap_or_else(|| t.repo_path())
        );
        send(
            self.shared
                .http
                .post(format!(
                    "{}/commit/{}/statuses/build",
                    t.repo_path(),
                    t.sha
                ))
                .bearer_auth(&t.token)
                .json(&body),
        )
        .await?;
        info!(state = %want, "created build status");
        Ok(())
    }

    #[instrument(skip_all, fields(pull_request = id))]
    async fn upsert_comment(&self, t: &Target, id: &str, report: &TestReport) -> Result<()> {
        let url = format!("{}/pullrequests/{id}/comments", t.repo_path());
        let page: Page<Comment> = fetch(self.shared.http.get(&url).bearer_auth(&t.token)).await?;
        let found = existing_comment(
            page.values.iter().map(|c| (c.id, c.content.raw.as_str())),
            &report.scenario_name,
            &report.snapshot_name,
        );
        if let Some(id) = found {
            debug!(id, "comment already exists");
            return Ok(());
        }
        send(
            self.shared
                .http
                .post(url)
                .bearer_auth(&t.token)
                .json(&json!({ "content": { "raw": comment_body(report) } })),
        )
        .await?;
        info!("created pull request comment");
        Ok(())
    }
}

#[async_trait]
impl Reporter for BitbucketReporter {
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
        let (workspace, repo) = labels::label_or_annotation(
            snapshot,
            &labels::pac_test_label(labels::pac::URL_ORG),
        )
        .zip(labels::label_or_annotation(
            snapshot,
            &labels::pac_test_label(labels::pac::URL_REPOSITORY),
        ))
        .map(|(w, r)| (w.to_string(), r.to_string()))
        .or_else(|| owner_repo(&url))
        .ok_or_else(|| Error::MissingMetadata(format!("no workspace/repo in {repo_url}")))?;
        let api = if url.host_str() == Some("bitbucket.org") {
            "https://api.bitbucket.org/2.0".to_string()
        } else {
            format!("{origin}/2.0")
        };

        self.target = Some(Target {
            api,
            workspace,
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
        self.upsert_build_status(t, report).await?;
        if let Some(id) = &t.pull_request
            && report.status.is_final()
        {
            self.upsert_comment(t, id, report).await?;
        }
        Ok(())
    }

    async fn is_pr_open(&self) -> Result<bool> {
        let t = self.target()?;
        let Some(id) = &t.pull_request else {
            return Ok(false);
        };
        let pr: PullRequest = fetch(
            self.shared
                .http
                .get(format!("{}/pullrequests/{id}", t.repo_path()))
                .bearer_auth(&t.token),
        )
        .await?;
        Ok(pr.state == "OPEN")
    }
}
