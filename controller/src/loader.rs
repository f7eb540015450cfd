//! Loader holds the queries the reconcilers run against a [`Store`].

use crate::{
    labels, prelude::*, snapshot,
    store::{Selector, Store},
};
use api::{
    v1alpha1::{Component, Snapshot},
    v1beta2::IntegrationTestScenario,
};

fn selector<const N: usize>(pairs: [(&str, &str); N]) -> Selector {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Application_components returns the Components of `application`, ordered by name.
pub async fn application_components(
    store: &dyn Store,
    namespace: &str,
    application: &str,
) -> Result<Vec<Component>> {
    let mut out: Vec<_> = store
        .list_components(namespace)
        .await?
        .into_iter()
        .filter(|c| c.spec.application == application)
        .collect();
    out.sort_by_key(|c| c.name_any());
    Ok(out)
}

/// Snapshots_for_build_pipeline_run returns the Snapshots whose back-reference points at `plr`.
pub async fn snapshots_for_build_pipeline_run(
    store: &dyn Store,
    namespace: &str,
    application: &str,
    plr: &str,
) -> Result<Vec<Snapshot>> {
    let sel = selector([
        (labels::BUILD_PIPELINERUN_LABEL, plr),
        (labels::APPLICATION_LABEL, application),
    ]);
    store.list_snapshots(namespace, &sel).await
}

/// Component_snapshots_in_group returns component Snapshots of a PR group, newest first.
///
/// Passing `component` narrows the result to that Component's Snapshots.
pub async fn component_snapshots_in_group(
    store: &dyn Store,
    namespace: &str,
    application: &str,
    hash: &str,
    component: Option<&str>,
) -> Result<Vec<Snapshot>> {
    let mut sel = selector([
        (labels::SNAPSHOT_TYPE_LABEL, labels::SNAPSHOT_TYPE_COMPONENT),
        (labels::PR_GROUP_HASH_LABEL, hash),
        (labels::APPLICATION_LABEL, application),
    ]);
    if let Some(c) = component {
        sel.insert(labels::COMPONENT_LABEL.into(), c.into());
    }
    let mut out = store.list_snapshots(namespace, &sel).await?;
    snapshot::sort_newest_first(&mut out);
    Ok(out)
}

/// Build_pipeline_runs_in_group returns the build PipelineRuns of a PR group.
pub async fn build_pipeline_runs_in_group(
    store: &dyn Store,
    namespace: &str,
    application: &str,
    hash: &str,
) -> Result<Vec<PipelineRun>> {
    let sel = selector([
        (labels::PIPELINE_TYPE_LABEL, labels::PIPELINE_TYPE_BUILD),
        (labels::PR_GROUP_HASH_LABEL, hash),
        (labels::APPLICATION_LABEL, application),
    ]);
    store.list_pipeline_runs(namespace, &sel).await
}

/// Scenarios_for_application returns the IntegrationTestScenarios testing `application`.
pub async fn scenarios_for_application(
    store: &dyn Store,
    namespace: &str,
    application: &str,
) -> Result<Vec<IntegrationTestScenario>> {
    let mut out: Vec<_> = store
        .list_scenarios(namespace)
        .await?
        .into_iter()
        .filter(|s| s.spec.application == application)
        .collect();
    out.sort_by_key(|s| s.name_any());
    Ok(out)
}
