//! Store is the controller's view of the cluster's object store.
//!
//! Everything the reconcilers read or write goes through the [`Store`] trait, so the adapter
//! logic can run against canned objects in tests. [`KubeStore`] is the real thing.

use std::{collections::BTreeMap, fmt::Debug, sync::LazyLock};

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{ListParams, Patch};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{Instrument, debug_span};

use crate::prelude::*;
use api::{
    pac::Repository,
    v1alpha1::{Application, Component, Snapshot},
    v1beta2::IntegrationTestScenario,
};

/// Selector is a set of label equality requirements.
pub type Selector = BTreeMap<String, String>;

/// Selector_string renders a [`Selector`] in the Kubernetes label selector syntax.
pub fn selector_string(sel: &Selector) -> String {
    sel.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// MetadataPatch is a change to an object's labels, annotations, or finalizers.
///
/// It's sent as a JSON merge patch. A `None` value removes the key. Setting `resource_version`
/// makes the write fail with a conflict if the object changed since it was read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetadataPatch {
    pub resource_version: Option<String>,
    pub labels: BTreeMap<String, Option<String>>,
    pub annotations: BTreeMap<String, Option<String>>,
    pub finalizers: Option<Vec<String>>,
}

impl MetadataPatch {
    pub fn annotate<K: ToString, V: ToString>(mut self, k: K, v: V) -> Self {
        self.annotations.insert(k.to_string(), Some(v.to_string()));
        self
    }

    pub fn label<K: ToString, V: ToString>(mut self, k: K, v: V) -> Self {
        self.labels.insert(k.to_string(), Some(v.to_string()));
        self
    }

    /// Finalizers replaces the finalizer list, guarded by the resource version it was computed
    /// from.
    pub fn finalizers(list: Vec<String>, resource_version: Option<String>) -> Self {
        Self {
            resource_version,
            finalizers: Some(list),
            ..Default::default()
        }
    }

    pub fn to_merge_patch(&self) -> Value {
        let mut meta = Map::new();
        if let Some(rv) = &self.resource_version {
            meta.insert("resourceVersion".into(), json!(rv));
        }
        if !self.labels.is_empty() {
            meta.insert("labels".into(), json!(self.labels));
        }
        if !self.annotations.is_empty() {
            meta.insert("annotations".into(), json!(self.annotations));
        }
        if let Some(f) = &self.finalizers {
            meta.insert("finalizers".into(), json!(f));
        }
        json!({ "metadata": meta })
    }
}

/// Normalize_repo_url folds the spellings of a repository URL that refer to the same thing.
pub fn normalize_repo_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    url.strip_suffix(".git").unwrap_or(url).to_ascii_lowercase()
}

/// Store is the object store capability the controller needs.
///
/// Implementations report missing objects as [`Error::NotFound`] and optimistic concurrency
/// failures as [`Error::Conflict`].
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_pipeline_run(&self, namespace: &str, name: &str) -> Result<PipelineRun>;
    async fn list_pipeline_runs(&self, namespace: &str, sel: &Selector)
    -> Result<Vec<PipelineRun>>;
    async fn patch_pipeline_run(
        &self,
        namespace: &str,
        name: &str,
        patch: &MetadataPatch,
    ) -> Result<PipelineRun>;

    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<Snapshot>;
    async fn list_snapshots(&self, namespace: &str, sel: &Selector) -> Result<Vec<Snapshot>>;
    async fn create_snapshot(&self, snapshot: &Snapshot) -> Result<Snapshot>;
    async fn patch_snapshot(
        &self,
        namespace: &str,
        name: &str,
        patch: &MetadataPatch,
    ) -> Result<Snapshot>;

    async fn get_component(&self, namespace: &str, name: &str) -> Result<Component>;
    async fn list_components(&self, namespace: &str) -> Result<Vec<Component>>;
    async fn get_application(&self, namespace: &str, name: &str) -> Result<Application>;
    async fn list_scenarios(&self, namespace: &str) -> Result<Vec<IntegrationTestScenario>>;

    /// Git_token returns the provider access token configured for `repo_url`, if any.
    async fn git_token(&self, namespace: &str, repo_url: &str) -> Result<Option<String>>;
}

static CREATE_PARAMS: LazyLock<PostParams> = LazyLock::new(|| PostParams {
    dry_run: false,
    field_manager: Some(CONTROLLER_NAME.into()),
});

static PATCH_PARAMS: LazyLock<PatchParams> = LazyLock::new(|| {
    PatchParams {
        field_manager: Some(CONTROLLER_NAME.into()),
        ..Default::default()
    }
    .validation_strict()
});

/// KubeStore is the [`Store`] backed by the API server.
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
}

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Classify turns API status codes the controller cares about into domain errors.
fn classify<K: Resource<DynamicType = ()>>(err: kube::Error, name: &str) -> Error {
    match err {
        kube::Error::Api(ref status) if status.code == 404 => Error::NotFound {
            kind: K::kind(&()).to_string(),
            name: name.into(),
        },
        kube::Error::Api(ref status) if status.code == 409 => {
            Error::Conflict(status.message.clone())
        }
        err => Error::Kube(err),
    }
}

async fn get<K>(api: Api<K>, name: &str) -> Result<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    api.get(name)
        .instrument(debug_span!("get", kind = %K::kind(&()), name))
        .await
        .map_err(|err| classify::<K>(err, name))
}

async fn list<K>(api: Api<K>, sel: &Selector) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    let mut params = ListParams::default();
    if !sel.is_empty() {
        params = params.labels(&selector_string(sel));
    }
    let list = api
        .list(&params)
        .instrument(debug_span!("list", kind = %K::kind(&())))
        .await
        .map_err(|err| classify::<K>(err, ""))?;
    Ok(list.items)
}

async fn patch<K>(api: Api<K>, name: &str, p: &MetadataPatch) -> Result<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    let body = p.to_merge_patch();
    trace!(%body, "merge patch");
    api.patch(name, &PATCH_PARAMS, &Patch::Merge(&body))
        .instrument(debug_span!("patch", kind = %K::kind(&()), name))
        .await
        .map_err(|err| classify::<K>(err, name))
}

#[async_trait]
impl Store for KubeStore {
    async fn get_pipeline_run(&self, namespace: &str, name: &str) -> Result<PipelineRun> {
        get(self.api(namespace), name).await
    }

    async fn list_pipeline_runs(
        &self,
        namespace: &str,
        sel: &Selector,
    ) -> Result<Vec<PipelineRun>> {
        list(self.api(namespace), sel).await
    }

    async fn patch_pipeline_run(
        &self,
        namespace: &str,
        name: &str,
        p: &MetadataPatch,
    ) -> Result<PipelineRun> {
        patch(self.api(namespace), name, p).await
    }

    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<Snapshot> {
        get(self.api(namespace), name).await
    }

    async fn list_snapshots(&self, namespace: &str, sel: &Selector) -> Result<Vec<Snapshot>> {
        list(self.api(namespace), sel).await
    }

    async fn create_snapshot(&self, snapshot: &Snapshot) -> Result<Snapshot> {
        let namespace = snapshot
            .namespace()
            .ok_or(Error::MissingName("snapshot namespace"))?;
        let api: Api<Snapshot> = self.api(&namespace);
        api.create(&CREATE_PARAMS, snapshot)
            .instrument(debug_span!("create", kind = "Snapshot"))
            .await
            .map_err(|err| classify::<Snapshot>(err, &snapshot.name_any()))
    }

    async fn patch_snapshot(
        &self,
        namespace: &str,
        name: &str,
        p: &MetadataPatch,
    ) -> Result<Snapshot> {
        patch(self.api(namespace), name, p).await
    }

    async fn get_component(&self, namespace: &str, name: &str) -> Result<Component> {
        get(self.api(namespace), name).await
    }

    async fn list_components(&self, namespace: &str) -> Result<Vec<Component>> {
        list(self.api(namespace), &Selector::new()).await
    }

    async fn get_application(&self, namespace: &str, name: &str) -> Result<Application> {
        get(self.api(namespace), name).await
    }

    async fn list_scenarios(&self, namespace: &str) -> Result<Vec<IntegrationTestScenario>> {
        list(self.api(namespace), &Selector::new()).await
    }

    #[instrument(skip(self))]
    async fn git_token(&self, namespace: &str, repo_url: &str) -> Result<Option<String>> {
        let want = normalize_repo_url(repo_url);
        let repos: Vec<Repository> = list(self.api(namespace), &Selector::new()).await?;
        let Some(secret) = repos
            .into_iter()
            .find(|r| normalize_repo_url(&r.spec.url) == want)
            .and_then(|r| r.spec.git_provider)
            .and_then(|g| g.secret)
        else {
            debug!("no Repository with credentials");
            return Ok(None);
        };
        let s: core::v1::Secret = get(self.api(namespace), &secret.name).await?;
        let token = s
            .data
            .as_ref()
            .and_then(|d| d.get(secret.key_or_default()))
            .map(|b| String::from_utf8(b.0.clone()))
            .transpose()
            .map_err(|err| anyhow::anyhow!("secret {:?}: {err}", secret.name))?;
        Ok(token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()))
    }
}
