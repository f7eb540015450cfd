//! Status reports integration progress to git providers.
//!
//! A [`Reporter`] speaks one provider's API. [`Status`] picks the right one for a Snapshot by
//! asking each candidate in turn whether it [detects](Reporter::detect) the Snapshot's
//! provenance.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::{labels, prelude::*, store::Store};
use api::v1alpha1::Snapshot;

mod bitbucket;
mod github;
mod gitlab;
mod kind;

pub use bitbucket::{BitbucketReporter, BitbucketState, bitbucket_state};
pub use github::{GithubReporter, GithubState, github_state};
pub use gitlab::{GitlabReporter, GitlabState, gitlab_state};
pub use kind::IntegrationTestStatus;

/// TestReport is everything a Reporter needs to publish one scenario's status.
#[derive(Clone, Debug, PartialEq)]
pub struct TestReport {
    pub scenario_name: String,
    /// Full_name is the commit status name; it must be unique per scenario and Snapshot kind.
    pub full_name: String,
    pub snapshot_name: String,
    pub component_name: Option<String>,
    pub status: IntegrationTestStatus,
    pub summary: String,
    pub text: String,
    /// Test_pipeline_run_name is linked from the commit status, when there is one.
    pub test_pipeline_run_name: Option<String>,
}

/// Reporter publishes [`TestReport`]s to one git provider.
#[async_trait]
pub trait Reporter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Detect reports whether the Snapshot came from this reporter's provider.
    fn detect(&self, snapshot: &Snapshot) -> bool;

    /// Initialize reads the repository, commit, and PR details from the Snapshot.
    ///
    /// Missing details are a configuration error and are not retried.
    async fn initialize(&mut self, snapshot: &Snapshot) -> Result<()>;

    /// Report_status upserts the commit status and, for pull requests, a comment.
    async fn report_status(&self, report: &TestReport) -> Result<()>;

    /// Is_pr_open reports whether the pull request the reporter was initialized with is still
    /// open. Pushes have no pull request and report `false`.
    async fn is_pr_open(&self) -> Result<bool>;
}

/// GitStatus is what the reconcilers need from the git provider side.
#[async_trait]
pub trait GitStatus: Send + Sync {
    /// Reporter returns an initialized Reporter for the Snapshot, or `None` if no provider
    /// claims it.
    async fn reporter(&self, snapshot: &Snapshot) -> Result<Option<Box<dyn Reporter>>>;

    async fn is_pr_open(&self, snapshot: &Snapshot) -> Result<bool> {
        match self.reporter(snapshot).await? {
            Some(r) => r.is_pr_open().await,
            None => Ok(false),
        }
    }

    /// Find_snapshot_with_open_pr returns the first Snapshot whose PR is still open.
    async fn find_snapshot_with_open_pr(&self, snapshots: &[Snapshot]) -> Result<Option<Snapshot>> {
        for s in snapshots {
            if self.is_pr_open(s).await? {
                return Ok(Some(s.clone()));
            }
        }
        Ok(None)
    }
}

/// Shared is handed to every Reporter.
#[derive(Clone)]
pub struct Shared {
    pub store: Arc<dyn Store>,
    pub http: reqwest::Client,
    /// Console_url is the pipeline run viewer template; see [`format_pipeline_url`].
    pub console_url: String,
}

/// Status is the production [`GitStatus`].
pub struct Status {
    shared: Shared,
}

impl Status {
    pub fn new(store: Arc<dyn Store>, console_url: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(OPERATOR_NAME.as_str())
            .build()?;
        Ok(Self {
            shared: Shared {
                store,
                http,
                console_url,
            },
        })
    }

    fn candidates(&self) -> Vec<Box<dyn Reporter>> {
        vec![
            Box::new(GithubReporter::new(self.shared.clone())),
            Box::new(GitlabReporter::new(self.shared.clone())),
            Box::new(BitbucketReporter::new(self.shared.clone())),
        ]
    }
}

#[async_trait]
impl GitStatus for Status {
    #[instrument(skip_all, fields(snapshot = %snapshot.name_any()))]
    async fn reporter(&self, snapshot: &Snapshot) -> Result<Option<Box<dyn Reporter>>> {
        let Some(mut r) = self.candidates().into_iter().find(|r| r.detect(snapshot)) else {
            debug!("no reporter detected");
            return Ok(None);
        };
        debug!(reporter = r.name(), "detected reporter");
        r.initialize(snapshot).await?;
        Ok(Some(r))
    }
}

/// DEFAULT_CONSOLE_URL is used when no console URL is configured.
pub static DEFAULT_CONSOLE_URL: &str =
    "https://localhost/application-pipeline/ns/{namespace}/pipelinerun/{pipelinerun}";

/// Format_pipeline_url fills the `{namespace}` and `{pipelinerun}` placeholders of `template`.
pub fn format_pipeline_url(template: &str, pipeline_run: &str, namespace: &str) -> String {
    template
        .replace("{namespace}", namespace)
        .replace("{pipelinerun}", pipeline_run)
}

/// Format_comment renders the visible part of a PR comment.
pub fn format_comment(summary: &str, text: &str) -> String {
    format!("### {summary}\n\n{text}")
}

fn comment_signature(scenario: &str, snapshot: &str) -> String {
    format!("<!-- integration-test scenario={scenario} snapshot={snapshot} -->")
}

/// Comment_body is the full comment posted for a report.
pub fn comment_body(report: &TestReport) -> String {
    format!(
        "{}\n\n{}",
        format_comment(&report.summary, &report.text),
        comment_signature(&report.scenario_name, &report.snapshot_name)
    )
}

/// Existing_comment returns the id of the comment already posted for this scenario and
/// Snapshot, if any.
pub fn existing_comment<'a, I, T>(comments: I, scenario: &str, snapshot: &str) -> Option<T>
where
    I: IntoIterator<Item = (T, &'a str)>,
{
    let sig = comment_signature(scenario, snapshot);
    comments
        .into_iter()
        .find(|(_, body)| body.contains(&sig))
        .map(|(id, _)| id)
}

/// Should_skip reports whether an existing commit status already says what the report would.
///
/// Only in-progress states are skipped; final states are always written.
pub(crate) fn should_skip<S: PartialEq + ?Sized>(
    existing: Option<&S>,
    want: &S,
    status: IntegrationTestStatus,
) -> bool {
    !status.is_final() && existing.is_some_and(|s| s == want)
}

pub(crate) fn uninitialized(reporter: &str) -> Error {
    Error::Other(anyhow::anyhow!("{reporter} used before initialization"))
}

/// Target_url links a report to its test PipelineRun in the console.
pub(crate) fn target_url(shared: &Shared, report: &TestReport, namespace: &str) -> Option<String> {
    report
        .test_pipeline_run_name
        .as_deref()
        .map(|plr| format_pipeline_url(&shared.console_url, plr, namespace))
}

/// Truncate cuts `s` to at most `n` characters.
pub(crate) fn truncate(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Origin returns "scheme://host[:port]" of a repository URL.
pub(crate) fn origin(repo_url: &str) -> Result<(String, reqwest::Url)> {
    let url = reqwest::Url::parse(repo_url)
        .map_err(|err| anyhow::anyhow!("invalid repository url {repo_url:?}: {err}"))?;
    Ok((url.origin().ascii_serialization(), url))
}

/// Owner_repo returns the first two path segments of a repository URL.
pub(crate) fn owner_repo(url: &reqwest::Url) -> Option<(String, String)> {
    let mut segs = url.path_segments()?.filter(|s| !s.is_empty());
    let owner = segs.next()?.to_string();
    let repo = segs.next()?.trim_end_matches(".git").to_string();
    Some((owner, repo))
}

/// Required looks up a label or annotation the reporter can't work without.
pub(crate) fn required<'a>(snapshot: &'a Snapshot, key: &str) -> Result<&'a str> {
    labels::label_or_annotation(snapshot, key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::MissingMetadata(format!("{key} not found on snapshot")))
}

/// Pull_request returns the PR/MR number if the Snapshot came from one.
pub(crate) fn pull_request(snapshot: &Snapshot) -> Option<String> {
    let event = labels::label_or_annotation(
        snapshot,
        &labels::pac_test_label(labels::pac::EVENT_TYPE),
    )?;
    if !labels::is_pull_request_event(event) {
        return None;
    }
    labels::label_or_annotation(snapshot, &labels::pac_test_label(labels::pac::PULL_REQUEST))
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Token returns the access token for the Snapshot's repository.
pub(crate) async fn token(shared: &Shared, snapshot: &Snapshot, repo_url: &str) -> Result<String> {
    let namespace = snapshot
        .namespace()
        .ok_or(Error::MissingName("snapshot namespace"))?;
    shared
        .store
        .git_token(&namespace, repo_url)
        .await?
        .ok_or_else(|| Error::MissingMetadata(format!("no git credentials for {repo_url}")))
}

/// Send issues the request and turns unsuccessful responses into [`Error::Provider`].
pub(crate) async fn send(req: RequestBuilder) -> Result<Response> {
    let res = req.send().await?;
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let url = res.url().to_string();
    let body = res.text().await.unwrap_or_default();
    Err(Error::Provider {
        status: status.as_u16(),
        url,
        body,
    })
}

/// Fetch sends the request and decodes a JSON response.
pub(crate) async fn fetch<T: DeserializeOwned>(req: RequestBuilder) -> Result<T> {
    Ok(send(req).await?.json().await?)
}
