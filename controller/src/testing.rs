//! Extras that only show up during tests.
#![allow(missing_docs)]
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
};

use assert_json_diff::assert_json_eq;
use async_trait::async_trait;
use http::{Request, Response, StatusCode};
use kube::client::{Body, Client};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};

use super::*;
use crate::{
    prelude::*,
    status::{GitStatus, Reporter, Shared, TestReport},
    store::{MetadataPatch, Selector, Store, normalize_repo_url},
};
use api::{
    v1alpha1::{Application, Component, Snapshot},
    v1beta2::IntegrationTestScenario,
};

pub use test_log::test;

pub mod fixtures {
    use k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, jiff::Timestamp};
    use kube::{Resource, ResourceExt};
    use serde_json::json;

    use crate::{
        labels, pipelinerun, prgroup,
        status::{IntegrationTestStatus, TestReport},
    };
    use api::{
        ComponentSource, GitSource,
        tekton::{Condition, PipelineRun, PipelineRunResult, PipelineRunSpec, PipelineRunStatus},
        v1alpha1::{
            Application, ApplicationSpec, Component, ComponentSpec, Snapshot, SnapshotComponent,
            SnapshotSpec,
        },
        v1beta2::{IntegrationTestScenario, IntegrationTestScenarioSpec, TestContext},
    };

    pub static NAMESPACE: &str = "default";
    pub static COMPONENT: &str = "component-sample";
    pub static APPLICATION: &str = "application-sample";
    pub static PIPELINE_RUN: &str = "pipelinerun-build-sample";
    pub static SHA: &str = "12a4a35ccd08194595179815e4646c3a6c08bb77";
    pub static DIGEST: &str =
        "sha256:841328df1b9f8c4087adbdcfec6cc99ac8308805dea83f6d415d6fb8d40227c1";

    pub fn at(secs: i64) -> Time {
        Time(Timestamp::from_second(secs).expect("valid timestamp"))
    }

    /// A running build of [`COMPONENT`] started by a pull request.
    pub fn build_pipeline_run() -> PipelineRun {
        let mut plr = PipelineRun::new(PIPELINE_RUN, PipelineRunSpec::default());
        let meta = plr.meta_mut();
        meta.namespace = Some(NAMESPACE.into());
        meta.uid = Some("plr-uid".into());
        meta.resource_version = Some("1".into());
        meta.creation_timestamp = Some(at(1_700_000_000));
        meta.labels = Some(
            [
                (labels::PIPELINE_TYPE_LABEL.to_string(), "build".to_string()),
                (labels::COMPONENT_LABEL.into(), COMPONENT.into()),
                (labels::APPLICATION_LABEL.into(), APPLICATION.into()),
                (labels::pac_label(labels::pac::EVENT_TYPE), "pull_request".into()),
                (labels::pac_label(labels::pac::PULL_REQUEST), "1".into()),
                (labels::pac_label(labels::pac::URL_ORG), "devfile-sample".into()),
                (
                    labels::pac_label(labels::pac::URL_REPOSITORY),
                    "devfile-sample-go-basic".into(),
                ),
                (labels::pac_label(labels::pac::SHA), SHA.into()),
            ]
            .into(),
        );
        meta.annotations = Some(
            [
                (
                    labels::pac_label(labels::pac::SOURCE_BRANCH),
                    "sourceBranch".to_string(),
                ),
                (labels::pac_label(labels::pac::GIT_PROVIDER), "github".into()),
                (
                    labels::pac_label(labels::pac::REPO_URL),
                    "https://github.com/devfile-sample/devfile-sample-go-basic".into(),
                ),
                (labels::CHAINS_SIGNED_ANNOTATION.into(), "true".into()),
            ]
            .into(),
        );
        plr.status = Some(PipelineRunStatus {
            conditions: vec![Condition {
                type_: "Succeeded".into(),
                status: "Unknown".into(),
                reason: Some("Running".into()),
                ..Default::default()
            }],
            start_time: Some(at(1_700_000_010)),
            ..Default::default()
        });
        plr
    }

    fn conclude(mut plr: PipelineRun, status: &str, reason: &str) -> PipelineRun {
        let s = plr.status.get_or_insert_with(Default::default);
        s.conditions = vec![Condition {
            type_: "Succeeded".into(),
            status: status.into(),
            reason: Some(reason.into()),
            ..Default::default()
        }];
        s.completion_time = Some(at(1_700_000_600));
        plr
    }

    pub fn succeeded(plr: PipelineRun) -> PipelineRun {
        conclude(plr, "True", "Succeeded")
    }

    pub fn failed(plr: PipelineRun) -> PipelineRun {
        conclude(plr, "False", "Failed")
    }

    pub fn finalized(mut plr: PipelineRun) -> PipelineRun {
        plr.finalizers_mut()
            .push(labels::PIPELINERUN_FINALIZER.into());
        plr
    }

    pub fn with_results(mut plr: PipelineRun, digest: &str) -> PipelineRun {
        let result = |name: &str, value: &str| PipelineRunResult {
            name: name.into(),
            value: json!(value),
        };
        plr.status.get_or_insert_with(Default::default).results = vec![
            result(pipelinerun::IMAGE_DIGEST, digest),
            result(pipelinerun::IMAGE_URL, "quay.io/x/y"),
            result(pipelinerun::GIT_URL, "https://github.com/a/b"),
            result(pipelinerun::GIT_COMMIT, "abc123"),
        ];
        plr
    }

    /// Grouped puts `obj` in the PR group of the "sourceBranch" branch.
    pub fn grouped<K: ResourceExt>(mut obj: K) -> K {
        obj.labels_mut().insert(
            labels::PR_GROUP_HASH_LABEL.into(),
            prgroup::group_hash("sourceBranch"),
        );
        obj.annotations_mut()
            .insert(labels::PR_GROUP_ANNOTATION.into(), "sourceBranch".into());
        obj
    }

    /// Sibling is a build of another component in the same Application.
    pub fn sibling(name: &str, component: &str) -> PipelineRun {
        let mut plr = build_pipeline_run();
        plr.meta_mut().name = Some(name.into());
        plr.meta_mut().uid = Some(format!("{name}-uid"));
        plr.labels_mut()
            .insert(labels::COMPONENT_LABEL.into(), component.into());
        plr
    }

    pub fn component() -> Component {
        let mut c = other_component(
            COMPONENT,
            Some("quay.io/x/y@sha256:0000000000000000000000000000000000000000000000000000000000000000"),
        );
        c.spec.source = Some(ComponentSource {
            git: Some(GitSource {
                url: "https://github.com/a/b".into(),
                ..Default::default()
            }),
        });
        c
    }

    pub fn other_component(name: &str, image: Option<&str>) -> Component {
        let mut c = Component::new(
            name,
            ComponentSpec {
                component_name: name.into(),
                application: APPLICATION.into(),
                container_image: image.map(String::from),
                source: None,
            },
        );
        c.meta_mut().namespace = Some(NAMESPACE.into());
        c
    }

    pub fn application() -> Application {
        let mut a = Application::new(
            APPLICATION,
            ApplicationSpec {
                display_name: APPLICATION.into(),
                description: None,
            },
        );
        a.meta_mut().namespace = Some(NAMESPACE.into());
        a.meta_mut().uid = Some("application-uid".into());
        a
    }

    /// Snapshot_at is a component Snapshot of [`COMPONENT`] created at `secs`.
    pub fn snapshot_at(name: &str, secs: i64) -> Snapshot {
        let mut s = Snapshot::new(
            name,
            SnapshotSpec {
                application: APPLICATION.into(),
                components: vec![SnapshotComponent {
                    name: COMPONENT.into(),
                    container_image: format!("quay.io/x/y@{DIGEST}"),
                    source: None,
                }],
                ..Default::default()
            },
        );
        let meta = s.meta_mut();
        meta.namespace = Some(NAMESPACE.into());
        meta.creation_timestamp = Some(at(secs));
        meta.labels = Some(
            [
                (
                    labels::SNAPSHOT_TYPE_LABEL.to_string(),
                    labels::SNAPSHOT_TYPE_COMPONENT.to_string(),
                ),
                (labels::COMPONENT_LABEL.into(), COMPONENT.into()),
                (labels::APPLICATION_LABEL.into(), APPLICATION.into()),
            ]
            .into(),
        );
        s
    }

    /// Git_snapshot is a pull request Snapshot as a reporter for `provider` sees it.
    pub fn git_snapshot(provider: &str, repo_url: &str) -> Snapshot {
        let mut s = snapshot_at("snapshot-sample", 1_700_000_000);
        let key = labels::pac_test_label;
        s.labels_mut().extend([
            (key(labels::pac::URL_ORG), "devfile-sample".to_string()),
            (key(labels::pac::URL_REPOSITORY), "devfile-sample-go-basic".into()),
            (key(labels::pac::SHA), SHA.into()),
            (key(labels::pac::EVENT_TYPE), "pull_request".into()),
        ]);
        s.annotations_mut().extend([
            (key(labels::pac::GIT_PROVIDER), provider.to_string()),
            (key(labels::pac::REPO_URL), repo_url.into()),
            (key(labels::pac::SOURCE_PROJECT_ID), "123".into()),
            (key(labels::pac::TARGET_PROJECT_ID), "123".into()),
            (key(labels::pac::PULL_REQUEST), "45".into()),
        ]);
        s
    }

    pub fn scenario(name: &str, contexts: &[&str]) -> IntegrationTestScenario {
        let mut s = IntegrationTestScenario::new(
            name,
            IntegrationTestScenarioSpec {
                application: APPLICATION.into(),
                contexts: contexts
                    .iter()
                    .map(|c| TestContext {
                        name: c.to_string(),
                        description: None,
                    })
                    .collect(),
                ..Default::default()
            },
        );
        s.meta_mut().namespace = Some(NAMESPACE.into());
        s
    }

    pub fn report(status: IntegrationTestStatus) -> TestReport {
        TestReport {
            scenario_name: "scenario1".into(),
            full_name: format!("{COMPONENT}/scenario1"),
            snapshot_name: "snapshot-sample".into(),
            component_name: Some(COMPONENT.into()),
            status,
            summary: format!(
                "Integration test for snapshot snapshot-sample and scenario scenario1 is {status}"
            ),
            text: "detailed text here".into(),
            test_pipeline_run_name: Some("test-pipelinerun".into()),
        }
    }
}

/// Fault is an error MemoryStore can be told to return.
#[derive(Clone, Copy, Debug)]
pub enum Fault {
    Conflict,
    NotFound,
    Unavailable,
}

#[derive(Default)]
struct State {
    pipeline_runs: BTreeMap<(String, String), PipelineRun>,
    snapshots: BTreeMap<(String, String), Snapshot>,
    components: BTreeMap<(String, String), Component>,
    applications: BTreeMap<(String, String), Application>,
    scenarios: BTreeMap<(String, String), IntegrationTestScenario>,
    tokens: BTreeMap<String, String>,
    faults: BTreeMap<String, Fault>,
    writes: Vec<String>,
    serial: u64,
}

/// MemoryStore is a [`Store`] over in-process maps.
///
/// Patches are applied as real JSON merge patches, resource versions are checked and bumped,
/// and an object being deleted goes away once its last finalizer is removed.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

fn key<K: ResourceExt>(obj: &K) -> (String, String) {
    (
        obj.namespace().unwrap_or_else(|| fixtures::NAMESPACE.into()),
        obj.name_any(),
    )
}

fn matches<K: ResourceExt>(obj: &K, sel: &Selector) -> bool {
    sel.iter()
        .all(|(k, v)| obj.labels().get(k).is_some_and(|got| got == v))
}

fn apply<K>(obj: &K, p: &MetadataPatch) -> Result<K>
where
    K: ResourceExt + Serialize + DeserializeOwned,
{
    if let Some(rv) = &p.resource_version
        && obj.resource_version().as_ref() != Some(rv)
    {
        return Err(Error::Conflict(format!(
            "{}: resourceVersion {rv} is stale",
            obj.name_any()
        )));
    }
    let mut doc = serde_json::to_value(obj)?;
    let mut patch = p.to_merge_patch();
    if let Some(meta) = patch["metadata"].as_object_mut() {
        meta.remove("resourceVersion");
    }
    json_patch::merge(&mut doc, &patch);
    let mut out: K = serde_json::from_value(doc)?;
    let next = obj
        .resource_version()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        .wrapping_add(1);
    out.meta_mut().resource_version = Some(next.to_string());
    Ok(out)
}

impl MemoryStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("store lock poisoned")
    }

    /// Fail makes the next call to `op` return `fault`.
    pub fn fail(&self, op: &str, fault: Fault) {
        self.lock().faults.insert(op.into(), fault);
    }

    fn check(&self, op: &str, kind: &str, name: &str) -> Result<()> {
        match self.lock().faults.remove(op) {
            None => Ok(()),
            Some(Fault::Conflict) => Err(Error::Conflict(format!("injected conflict on {name}"))),
            Some(Fault::NotFound) => Err(Error::NotFound {
                kind: kind.into(),
                name: name.into(),
            }),
            Some(Fault::Unavailable) => Err(Error::Other(anyhow::anyhow!("injected failure"))),
        }
    }

    /// Writes lists every successful create or patch, in order.
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    pub fn insert_pipeline_run(&self, plr: PipelineRun) {
        self.lock().pipeline_runs.insert(key(&plr), plr);
    }

    pub fn insert_snapshot(&self, s: Snapshot) {
        self.lock().snapshots.insert(key(&s), s);
    }

    pub fn insert_component(&self, c: Component) {
        self.lock().components.insert(key(&c), c);
    }

    pub fn insert_application(&self, a: Application) {
        self.lock().applications.insert(key(&a), a);
    }

    pub fn insert_scenario(&self, s: IntegrationTestScenario) {
        self.lock().scenarios.insert(key(&s), s);
    }

    pub fn set_git_token(&self, repo_url: &str, token: &str) {
        self.lock()
            .tokens
            .insert(normalize_repo_url(repo_url), token.into());
    }

    pub fn pipeline_run(&self, name: &str) -> Option<PipelineRun> {
        self.lock()
            .pipeline_runs
            .get(&(fixtures::NAMESPACE.into(), name.into()))
            .cloned()
    }

    pub fn snapshot(&self, name: &str) -> Option<Snapshot> {
        self.lock()
            .snapshots
            .get(&(fixtures::NAMESPACE.into(), name.into()))
            .cloned()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.lock().snapshots.values().cloned().collect()
    }
}

fn not_found(kind: &str, name: &str) -> Error {
    Error::NotFound {
        kind: kind.into(),
        name: name.into(),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_pipeline_run(&self, namespace: &str, name: &str) -> Result<PipelineRun> {
        self.check("get_pipeline_run", "PipelineRun", name)?;
        self.lock()
            .pipeline_runs
            .get(&(namespace.into(), name.into()))
            .cloned()
            .ok_or_else(|| not_found("PipelineRun", name))
    }

    async fn list_pipeline_runs(
        &self,
        namespace: &str,
        sel: &Selector,
    ) -> Result<Vec<PipelineRun>> {
        self.check("list_pipeline_runs", "PipelineRun", "")?;
        Ok(self
            .lock()
            .pipeline_runs
            .iter()
            .filter(|((ns, _), p)| ns == namespace && matches(*p, sel))
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn patch_pipeline_run(
        &self,
        namespace: &str,
        name: &str,
        p: &MetadataPatch,
    ) -> Result<PipelineRun> {
        self.check("patch_pipeline_run", "PipelineRun", name)?;
        let mut state = self.lock();
        let k = (namespace.to_string(), name.to_string());
        let cur = state
            .pipeline_runs
            .get(&k)
            .ok_or_else(|| not_found("PipelineRun", name))?;
        let next = apply(cur, p)?;
        state.writes.push(format!("patch pipelinerun/{name}"));
        if next.meta().deletion_timestamp.is_some() && next.finalizers().is_empty() {
            state.pipeline_runs.remove(&k);
        } else {
            state.pipeline_runs.insert(k, next.clone());
        }
        Ok(next)
    }

    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<Snapshot> {
        self.check("get_snapshot", "Snapshot", name)?;
        self.lock()
            .snapshots
            .get(&(namespace.into(), name.into()))
            .cloned()
            .ok_or_else(|| not_found("Snapshot", name))
    }

    async fn list_snapshots(&self, namespace: &str, sel: &Selector) -> Result<Vec<Snapshot>> {
        self.check("list_snapshots", "Snapshot", "")?;
        Ok(self
            .lock()
            .snapshots
            .iter()
            .filter(|((ns, _), s)| ns == namespace && matches(*s, sel))
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn create_snapshot(&self, snapshot: &Snapshot) -> Result<Snapshot> {
        self.check("create_snapshot", "Snapshot", "")?;
        let mut state = self.lock();
        state.serial = state.serial.wrapping_add(1);
        let mut s = snapshot.clone();
        let meta = s.meta_mut();
        if meta.name.is_none() {
            let prefix = meta.generate_name.clone().unwrap_or_default();
            meta.name = Some(format!("{prefix}{:05}", state.serial));
        }
        meta.uid = Some(format!("snapshot-uid-{}", state.serial));
        meta.resource_version = Some("1".into());
        meta.creation_timestamp = Some(fixtures::at(
            1_700_001_000_i64.wrapping_add_unsigned(state.serial),
        ));
        let k = key(&s);
        if state.snapshots.contains_key(&k) {
            return Err(Error::Conflict(format!("snapshot {} already exists", k.1)));
        }
        state.writes.push(format!("create snapshot/{}", k.1));
        state.snapshots.insert(k, s.clone());
        Ok(s)
    }

    async fn patch_snapshot(
        &self,
        namespace: &str,
        name: &str,
        p: &MetadataPatch,
    ) -> Result<Snapshot> {
        self.check("patch_snapshot", "Snapshot", name)?;
        let mut state = self.lock();
        let k = (namespace.to_string(), name.to_string());
        let cur = state
            .snapshots
            .get(&k)
            .ok_or_else(|| not_found("Snapshot", name))?;
        let next = apply(cur, p)?;
        state.writes.push(format!("patch snapshot/{name}"));
        state.snapshots.insert(k, next.clone());
        Ok(next)
    }

    async fn get_component(&self, namespace: &str, name: &str) -> Result<Component> {
        self.check("get_component", "Component", name)?;
        self.lock()
            .components
            .get(&(namespace.into(), name.into()))
            .cloned()
            .ok_or_else(|| not_found("Component", name))
    }

    async fn list_components(&self, namespace: &str) -> Result<Vec<Component>> {
        self.check("list_components", "Component", "")?;
        Ok(self
            .lock()
            .components
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn get_application(&self, namespace: &str, name: &str) -> Result<Application> {
        self.check("get_application", "Application", name)?;
        self.lock()
            .applications
            .get(&(namespace.into(), name.into()))
            .cloned()
            .ok_or_else(|| not_found("Application", name))
    }

    async fn list_scenarios(&self, namespace: &str) -> Result<Vec<IntegrationTestScenario>> {
        self.check("list_scenarios", "IntegrationTestScenario", "")?;
        Ok(self
            .lock()
            .scenarios
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn git_token(&self, _namespace: &str, repo_url: &str) -> Result<Option<String>> {
        Ok(self
            .lock()
            .tokens
            .get(&normalize_repo_url(repo_url))
            .cloned())
    }
}

#[derive(Default)]
struct FakeState {
    reports: Vec<(String, TestReport)>,
    open: BTreeSet<String>,
}

/// FakeStatus is a [`GitStatus`] that records reports instead of sending them.
#[derive(Clone, Default)]
pub struct FakeStatus {
    state: Arc<Mutex<FakeState>>,
}

impl FakeStatus {
    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("status lock poisoned")
    }

    /// Open_pr marks the pull request behind the named Snapshot as open.
    pub fn open_pr(&self, snapshot: &str) {
        self.lock().open.insert(snapshot.into());
    }

    /// Reports returns (snapshot name, report) pairs in the order they were made.
    pub fn reports(&self) -> Vec<(String, TestReport)> {
        self.lock().reports.clone()
    }
}

struct FakeReporter {
    snapshot: String,
    status: FakeStatus,
}

#[async_trait]
impl Reporter for FakeReporter {
    fn name(&self) -> &'static str {
        "FakeReporter"
    }

    fn detect(&self, _: &Snapshot) -> bool {
        true
    }

    async fn initialize(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.snapshot = snapshot.name_any();
        Ok(())
    }

    async fn report_status(&self, report: &TestReport) -> Result<()> {
        self.status
            .lock()
            .reports
            .push((self.snapshot.clone(), report.clone()));
        Ok(())
    }

    async fn is_pr_open(&self) -> Result<bool> {
        Ok(self.status.lock().open.contains(&self.snapshot))
    }
}

#[async_trait]
impl GitStatus for FakeStatus {
    async fn reporter(&self, snapshot: &Snapshot) -> Result<Option<Box<dyn Reporter>>> {
        let mut r = FakeReporter {
            snapshot: String::new(),
            status: self.clone(),
        };
        r.initialize(snapshot).await?;
        Ok(Some(Box::new(r)))
    }
}

/// LogCapture collects formatted log output so tests can look for specific lines.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .expect("log lock poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    /// Subscriber writes INFO and above into this capture.
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        let w = self.clone();
        tracing_subscriber::fmt()
            .with_writer(move || w.clone())
            .finish()
    }

    pub fn contains(&self, needle: &str) -> bool {
        String::from_utf8_lossy(&self.0.lock().expect("log lock poisoned")).contains(needle)
    }
}

/// Context builds a [`Context`] over the fakes. Its kube client is never answered.
pub fn context(store: &MemoryStore, status: &FakeStatus) -> Context {
    Context {
        client: mock_client().0,
        store: Arc::new(store.clone()),
        status: Arc::new(status.clone()),
        config: config::Config::default(),
        metrics: metrics::Metrics::default(),
    }
}

/// Shared builds reporter dependencies over `store`.
pub fn shared(store: MemoryStore) -> Shared {
    Shared {
        store: Arc::new(store),
        http: reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("http client"),
        console_url: status::DEFAULT_CONSOLE_URL.into(),
    }
}

pub async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("scenario succeeded")
}

// We wrap tower_test::mock::Handle
type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

pub fn mock_client() -> (Client, ApiServerVerifier) {
    let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
    (
        Client::new(mock_service, fixtures::NAMESPACE),
        ApiServerVerifier { handle },
    )
}

/// Expect is one API server round trip.
pub enum Expect {
    /// Answer any request with a failure Status.
    Status { code: u16, reason: String },
    /// Expect a merge patch with exactly `body` at `path`, and answer with `response`.
    MergePatch {
        path: String,
        body: Value,
        response: Value,
    },
}

impl Expect {
    pub fn status(code: u16, reason: &str) -> Self {
        Self::Status {
            code,
            reason: reason.into(),
        }
    }

    pub fn merge_patch(path: &str, body: Value, response: Value) -> Self {
        Self::MergePatch {
            path: path.into(),
            body,
            response,
        }
    }
}

pub struct ApiServerVerifier {
    handle: ApiServerHandle,
}

impl ApiServerVerifier {
    /// Run answers requests in order, one per [`Expect`].
    ///
    /// Await the returned handle (with [`timeout_after_1s`]) to make sure every expected call
    /// was made.
    pub fn run(mut self, expects: Vec<Expect>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            for expect in expects {
                let (request, send) = self.handle.next_request().await.expect("service not called");
                eprintln!("{}\t{}", request.method(), request.uri());
                match expect {
                    Expect::Status { code, reason } => {
                        let body = json!({
                            "apiVersion": "v1",
                            "kind": "Status",
                            "metadata": {},
                            "status": "Failure",
                            "reason": reason,
                            "message": format!("injected {reason}"),
                            "code": code,
                        });
                        send.send_response(
                            Response::builder()
                                .status(StatusCode::from_u16(code).unwrap())
                                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                                .unwrap(),
                        );
                    }
                    Expect::MergePatch {
                        path,
                        body,
                        response,
                    } => {
                        assert_eq!(request.method(), http::Method::PATCH, "unexpected method");
                        assert_eq!(request.uri().path(), path, "unexpected path");
                        assert_eq!(
                            request
                                .headers()
                                .get(http::header::CONTENT_TYPE)
                                .and_then(|v| v.to_str().ok()),
                            Some("application/merge-patch+json"),
                        );
                        let req_body = request.into_body().collect_bytes().await.unwrap();
                        let got: Value = serde_json::from_slice(&req_body).expect("patch is json");
                        assert_json_eq!(got, body);
                        send.send_response(
                            Response::builder()
                                .body(Body::from(serde_json::to_vec(&response).unwrap()))
                                .unwrap(),
                        );
                    }
                }
            }
        })
    }
}

/// Recorded is a request a [`MockProvider`] received.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub body: Value,
}

#[derive(Default)]
struct ProviderState {
    requests: Vec<Recorded>,
    responses: BTreeMap<(String, String), (u16, Value)>,
}

type SharedProvider = Arc<Mutex<ProviderState>>;

/// MockProvider is a git provider API on a local port.
///
/// Unconfigured GETs answer `[]` and unconfigured POSTs answer `201 {}`.
pub struct MockProvider {
    pub url: String,
    state: SharedProvider,
}

async fn provider_handler(
    axum::extract::State(state): axum::extract::State<SharedProvider>,
    method: axum::http::Method,
    uri: axum::http::Uri,
    body: String,
) -> (axum::http::StatusCode, axum::Json<Value>) {
    let mut s = state.lock().expect("provider lock poisoned");
    let path = uri.path().to_string();
    s.requests.push(Recorded {
        method: method.to_string(),
        path: path.clone(),
        query: uri.query().map(String::from),
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
    });
    let (code, response) = s
        .responses
        .get(&(method.to_string(), path))
        .cloned()
        .unwrap_or_else(|| {
            if method == axum::http::Method::GET {
                (200, json!([]))
            } else {
                (201, json!({}))
            }
        });
    (
        axum::http::StatusCode::from_u16(code).unwrap(),
        axum::Json(response),
    )
}

impl MockProvider {
    pub async fn start() -> Self {
        let state = SharedProvider::default();
        let app = axum::Router::new()
            .fallback(provider_handler)
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock provider");
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock provider");
        });
        Self { url, state }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        self.state.lock().expect("provider lock poisoned")
    }

    /// Respond sets the answer for `method` requests to `path`.
    pub fn respond(&self, method: &str, path: &str, status: u16, body: Value) {
        self.lock()
            .responses
            .insert((method.into(), path.into()), (status, body));
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.lock().requests.clone()
    }

    pub fn posts(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "POST")
            .collect()
    }

    /// Posted returns the bodies POSTed to `path`.
    pub fn posted(&self, path: &str) -> Vec<Value> {
        self.posts()
            .into_iter()
            .filter(|r| r.path == path)
            .map(|r| r.body)
            .collect()
    }
}
