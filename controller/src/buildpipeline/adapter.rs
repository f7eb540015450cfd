//! Adapter holds the operations run against one build PipelineRun.
//!
//! Every operation is idempotent: all progress is recorded on the PipelineRun itself, so a
//! pass interrupted at any point is finished by a later one.

use std::collections::BTreeSet;

use super::Outcome;
use crate::{
    labels, loader, pipelinerun, prgroup,
    pipelinerun::CreateSnapshotStatus,
    prelude::*,
    snapshot,
    status::{IntegrationTestStatus, TestReport},
    store::{MetadataPatch, Store},
};
use api::{
    v1alpha1::{Application, Component, Snapshot},
    v1beta2::IntegrationTestScenario,
};

/// Release_finalizer removes the controller's finalizer from the current version of `plr`.
///
/// The PipelineRun is read again first so the patch carries a fresh resource version. A
/// PipelineRun that's already gone counts as released, and `None` is returned.
#[instrument(skip_all, fields(pipelinerun = %plr.name_any()))]
pub async fn release_finalizer(store: &dyn Store, plr: &PipelineRun) -> Result<Option<PipelineRun>> {
    let namespace = plr
        .namespace()
        .ok_or(Error::MissingName("pipelinerun namespace"))?;
    let name = plr.name_any();
    let fresh = match store.get_pipeline_run(&namespace, &name).await {
        Ok(p) => p,
        Err(err) if err.is_not_found() => return Ok(None),
        Err(err) => return Err(err),
    };
    if !pipelinerun::has_finalizer(&fresh) {
        return Ok(Some(fresh));
    }
    let keep: Vec<String> = fresh
        .finalizers()
        .iter()
        .filter(|f| *f != labels::PIPELINERUN_FINALIZER)
        .cloned()
        .collect();
    let patch = MetadataPatch::finalizers(keep, fresh.resource_version());
    match store.patch_pipeline_run(&namespace, &name, &patch).await {
        Ok(p) => {
            info!("Removed Finalizer from the PipelineRun");
            Ok(Some(p))
        }
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Adapter runs the build PipelineRun operations.
///
/// It holds the latest version of the PipelineRun it has seen, and replaces it after every
/// write.
pub struct Adapter<'a> {
    plr: PipelineRun,
    component: &'a Component,
    application: &'a Application,
    ctx: &'a Context,
}

impl<'a> Adapter<'a> {
    pub fn new(
        plr: PipelineRun,
        component: &'a Component,
        application: &'a Application,
        ctx: &'a Context,
    ) -> Self {
        Self {
            plr,
            component,
            application,
            ctx,
        }
    }

    fn store(&self) -> &dyn Store {
        self.ctx.store.as_ref()
    }

    fn namespace(&self) -> Result<String> {
        self.plr
            .namespace()
            .ok_or(Error::MissingName("pipelinerun namespace"))
    }

    async fn patch(&mut self, patch: MetadataPatch) -> Result<()> {
        let namespace = self.namespace()?;
        self.plr = self
            .store()
            .patch_pipeline_run(&namespace, &self.plr.name_any(), &patch)
            .await?;
        Ok(())
    }

    async fn annotate(&mut self, key: &str, value: &str) -> Result<()> {
        if self.plr.annotations().get(key).is_some_and(|v| v == value) {
            return Ok(());
        }
        self.patch(MetadataPatch::default().annotate(key, value))
            .await
    }

    async fn add_finalizer(&mut self) -> Result<()> {
        let mut list = self.plr.finalizers().to_vec();
        list.push(labels::PIPELINERUN_FINALIZER.into());
        let rv = self.plr.resource_version();
        self.patch(MetadataPatch::finalizers(list, rv)).await?;
        info!("Added Finalizer to the PipelineRun");
        Ok(())
    }

    async fn remove_finalizer(&mut self) -> Result<()> {
        if let Some(p) = release_finalizer(self.store(), &self.plr).await? {
            self.plr = p;
        }
        Ok(())
    }

    /// Bookkeeping_done reports whether nothing is left for the finalizer to protect.
    fn bookkeeping_done(&self) -> bool {
        self.plr
            .annotations()
            .contains_key(labels::SNAPSHOT_ANNOTATION)
            || pipelinerun::create_snapshot_status(&self.plr).is_some()
            || pipelinerun::has_failed(&self.plr)
    }

    /// Ensure_pipeline_is_finalized holds deletion of the PipelineRun until its Snapshot exists.
    ///
    /// A PipelineRun being deleted before it succeeded is released right away; Tekton keeps
    /// reporting such runs as running, so waiting for them would hold them forever.
    #[instrument(skip_all, fields(pipelinerun = %self.plr.name_any()))]
    pub async fn ensure_pipeline_is_finalized(&mut self) -> Result<Outcome> {
        let has = pipelinerun::has_finalizer(&self.plr);
        if pipelinerun::is_being_deleted(&self.plr) {
            if has && !pipelinerun::has_succeeded(&self.plr) {
                self.remove_finalizer().await?;
            }
            return Ok(Outcome::Continue);
        }
        if has || self.bookkeeping_done() {
            return Ok(Outcome::Continue);
        }
        self.add_finalizer().await?;
        Ok(Outcome::Continue)
    }

    /// Ensure_snapshot_exists creates the Snapshot for a successful build, exactly once.
    #[instrument(skip_all, fields(pipelinerun = %self.plr.name_any()))]
    pub async fn ensure_snapshot_exists(&mut self) -> Result<Outcome> {
        if !pipelinerun::has_succeeded(&self.plr) {
            if pipelinerun::has_failed(&self.plr) || pipelinerun::is_being_deleted(&self.plr) {
                debug!("build pipelinerun will not produce a snapshot");
                self.remove_finalizer().await?;
            }
            return Ok(Outcome::Continue);
        }
        let namespace = self.namespace()?;
        let plr_name = self.plr.name_any();

        if let Some(name) = self.plr.annotations().get(labels::SNAPSHOT_ANNOTATION).cloned() {
            info!(
                snapshot = %name,
                "The build pipelineRun is already associated with existing Snapshot via annotation"
            );
            match self.store().get_snapshot(&namespace, &name).await {
                Ok(_) => (),
                Err(err) if err.is_not_found() => {
                    warn!(snapshot = %name, "annotated snapshot no longer exists");
                }
                Err(err) => return Err(err),
            }
            self.remove_finalizer().await?;
            return Ok(Outcome::Cancel);
        }

        if let Some(record) = pipelinerun::create_snapshot_status(&self.plr) {
            info!(
                message = %record.message,
                "snapshot creation already failed for this build, not retrying"
            );
            self.remove_finalizer().await?;
            return Ok(Outcome::Cancel);
        }

        if !pipelinerun::is_chains_signed(&self.plr) {
            info!("Not processing the pipelineRun because it's not yet signed with Chains");
            return Err(Error::NotReady(format!(
                "pipelinerun {plr_name} is not yet signed"
            )));
        }

        let application = self.application.name_any();
        let existing = loader::snapshots_for_build_pipeline_run(
            self.store(),
            &namespace,
            &application,
            &plr_name,
        )
        .await?;
        if let Some(found) = snapshot::earliest(&existing) {
            if existing.len() > 1 {
                warn!(
                    count = existing.len(),
                    snapshot = %found.name_any(),
                    "more than one snapshot found for build pipelinerun, using the earliest"
                );
            }
            let name = found.name_any();
            self.annotate(labels::SNAPSHOT_ANNOTATION, &name).await?;
            self.remove_finalizer().await?;
            return Ok(Outcome::Cancel);
        }

        let components =
            loader::application_components(self.store(), &namespace, &application).await?;
        let prepared = match snapshot::prepare_snapshot(
            &self.plr,
            self.component,
            self.application,
            &components,
        ) {
            Ok(s) => s,
            Err(err) if err.is_invalid_input() => {
                warn!(error = %err, "failed to prepare snapshot");
                self.record_failure(&err).await?;
                self.remove_finalizer().await?;
                return Ok(Outcome::Cancel);
            }
            Err(err) => return Err(err),
        };

        let created = self.store().create_snapshot(&prepared).await?;
        let name = created.name_any();
        info!(snapshot = %name, "Created new Snapshot");
        self.ctx.metrics.snapshots_created.increment(1);
        self.annotate(labels::SNAPSHOT_ANNOTATION, &name).await?;
        self.remove_finalizer().await?;
        Ok(Outcome::Cancel)
    }

    /// Record_failure writes the structured failure record for a build that can't produce a
    /// Snapshot.
    async fn record_failure(&mut self, err: &Error) -> Result<()> {
        if pipelinerun::is_being_deleted(&self.plr) {
            return Ok(());
        }
        let record = CreateSnapshotStatus::failed(format!("Failed to create snapshot. Error: {err}"));
        let value = serde_json::to_string(&record)?;
        match self.annotate(labels::CREATE_SNAPSHOT_ANNOTATION, &value).await {
            Err(err) if err.is_not_found() => Ok(()),
            ret => ret,
        }
    }

    /// Ensure_pr_group_annotated copies the PR group onto a pull request build.
    ///
    /// A failed build also tells the rest of its group that it won't be part of the group
    /// Snapshot.
    #[instrument(skip_all, fields(pipelinerun = %self.plr.name_any()))]
    pub async fn ensure_pr_group_annotated(&mut self) -> Result<Outcome> {
        if !pipelinerun::is_pull_request(&self.plr) {
            return Ok(Outcome::Continue);
        }
        let Some(group) = prgroup::group_name(&self.plr).map(String::from) else {
            debug!("no source branch, not a PR group member");
            return Ok(Outcome::Continue);
        };
        if prgroup::group_of(&self.plr).is_none() {
            let hash = prgroup::group_hash(&group);
            self.patch(
                MetadataPatch::default()
                    .label(labels::PR_GROUP_HASH_LABEL, &hash)
                    .annotate(labels::PR_GROUP_ANNOTATION, &group),
            )
            .await?;
            info!(%group, %hash, "added PR group to build pipelinerun");
        }

        if pipelinerun::has_failed(&self.plr) {
            self.notify_group_of_failure(&group).await?;
        }
        Ok(Outcome::Continue)
    }

    /// Notify_group_of_failure annotates the latest Snapshot of every other component in the
    /// group and every in-flight build of other components with a failure notice.
    ///
    /// Errors on single objects are logged and skipped.
    async fn notify_group_of_failure(&self, group: &str) -> Result<()> {
        let namespace = self.namespace()?;
        let application = self.application.name_any();
        let component = self.component.name_any();
        let hash = prgroup::group_hash(group);
        let notice = prgroup::failure_notice(&self.plr.name_any(), &component, group);
        let store = self.store();

        let snapshots =
            loader::component_snapshots_in_group(store, &namespace, &application, &hash, None)
                .await?;
        // Newest first, so the first one seen per component is its latest.
        let mut seen = BTreeSet::new();
        for s in snapshots {
            let Some(owner) = s.labels().get(labels::COMPONENT_LABEL).cloned() else {
                continue;
            };
            if owner == component || !seen.insert(owner) {
                continue;
            }
            if has_notice(&s, &notice) {
                continue;
            }
            let patch =
                MetadataPatch::default().annotate(labels::PR_GROUP_CREATION_ANNOTATION, &notice);
            match store.patch_snapshot(&namespace, &s.name_any(), &patch).await {
                Ok(_) => info!(snapshot = %s.name_any(), "notified snapshot of group build failure"),
                Err(err) => warn!(snapshot = %s.name_any(), error = %err, "failed to notify snapshot"),
            }
        }

        let builds =
            loader::build_pipeline_runs_in_group(store, &namespace, &application, &hash).await?;
        for b in builds {
            let other = pipelinerun::component_name(&b).unwrap_or_default();
            if other == component || pipelinerun::has_finished(&b) || has_notice(&b, &notice) {
                continue;
            }
            let patch =
                MetadataPatch::default().annotate(labels::PR_GROUP_CREATION_ANNOTATION, &notice);
            match store.patch_pipeline_run(&namespace, &b.name_any(), &patch).await {
                Ok(_) => info!(pipelinerun = %b.name_any(), "notified build of group build failure"),
                Err(err) => {
                    warn!(pipelinerun = %b.name_any(), error = %err, "failed to notify build")
                }
            }
        }
        Ok(())
    }

    /// Desired_report returns the status a pull request author should see for the build, if
    /// any.
    fn desired_report(&self) -> Option<IntegrationTestStatus> {
        if pipelinerun::has_failed(&self.plr) {
            Some(IntegrationTestStatus::BuildPLRFailed)
        } else if self
            .plr
            .annotations()
            .contains_key(labels::CREATE_SNAPSHOT_ANNOTATION)
        {
            Some(IntegrationTestStatus::SnapshotCreationFailed)
        } else if pipelinerun::has_succeeded(&self.plr) {
            None
        } else {
            Some(IntegrationTestStatus::BuildPLRInProgress)
        }
    }

    /// Ensure_integration_test_reported_to_git_provider tells the git provider about a build
    /// that has no Snapshot yet.
    #[instrument(skip_all, fields(pipelinerun = %self.plr.name_any()))]
    pub async fn ensure_integration_test_reported_to_git_provider(&mut self) -> Result<Outcome> {
        if !pipelinerun::is_pull_request(&self.plr) {
            debug!(
                "build pipelineRun is not created by pull/merge request, no need to set integration test status in git provider"
            );
            return Ok(Outcome::Continue);
        }
        if self
            .plr
            .annotations()
            .contains_key(labels::SNAPSHOT_ANNOTATION)
        {
            debug!(
                "snapshot has been created for build pipelineRun, no need to report integration status from build pipelinerun status"
            );
            self.annotate(
                labels::SNAPSHOT_CREATION_REPORT_ANNOTATION,
                labels::SNAPSHOT_CREATED_REPORT,
            )
            .await?;
            return Ok(Outcome::Continue);
        }
        if prgroup::group_name(&self.plr).is_none() {
            return Ok(Outcome::Continue);
        }
        let Some((group, hash)) = prgroup::group_of(&self.plr)
            .map(|(g, h)| (g.to_string(), h.to_string()))
        else {
            info!("pr group info has not been added to build pipelineRun metadata, try again");
            return Err(Error::NotReady(format!(
                "pr group not yet annotated on {}",
                self.plr.name_any()
            )));
        };
        let Some(status) = self.desired_report() else {
            return Ok(Outcome::Continue);
        };
        let reported = self
            .plr
            .annotations()
            .get(labels::SNAPSHOT_CREATION_REPORT_ANNOTATION);
        if reported.is_some_and(|r| r == labels::SNAPSHOT_CREATED_REPORT || *r == status.to_string()) {
            debug!(
                "integration test has been set correctly or is being processed, no need to set integration test status from build pipelinerun"
            );
            return Ok(Outcome::Continue);
        }

        match self.report_provisional(status, &group, &hash).await {
            Ok(()) => self.ctx.metrics.git_report(status),
            // Recorded as reported so later passes do not hit the provider again.
            Err(err) if err.is_git_misconfiguration() => warn!(
                error = %err,
                %status,
                "failed to report integration status to git provider, not retrying"
            ),
            Err(err) => return Err(err),
        }
        self.annotate(labels::SNAPSHOT_CREATION_REPORT_ANNOTATION, &status.to_string())
            .await?;
        Ok(Outcome::Continue)
    }

    async fn report_provisional(
        &self,
        status: IntegrationTestStatus,
        group: &str,
        hash: &str,
    ) -> Result<()> {
        let namespace = self.namespace()?;
        let component = self.component.name_any();
        let application = self.application.name_any();
        let provisional = snapshot::provisional(&self.plr, &component, &application);
        let Some(reporter) = self.ctx.status.reporter(&provisional).await? else {
            info!("no git provider detected for build pipelinerun, not reporting");
            return Ok(());
        };

        let scenarios =
            loader::scenarios_for_application(self.store(), &namespace, &application).await?;
        for s in scenarios.iter().filter(|s| applies_to_component(s, &component)) {
            let report = build_report(
                &self.plr,
                &provisional,
                s,
                &component,
                Some(component.as_str()),
                status,
            );
            reporter.report_status(&report).await?;
        }

        let open = self.components_with_open_pr(hash).await?;
        if !prgroup::is_group_expected(open.as_slice()) {
            return Ok(());
        }
        info!(group, "group snapshot is expected to be created for build pipelinerun");
        info!(
            "there is more than 1 component with open pr or mr found, so group snapshot is expected: {open:?}"
        );
        let group_status = match status {
            IntegrationTestStatus::BuildPLRInProgress => IntegrationTestStatus::BuildPLRInProgress,
            _ => IntegrationTestStatus::GroupSnapshotCreationFailed,
        };
        for s in scenarios.iter().filter(|s| applies_to_group(s)) {
            let report = build_report(&self.plr, &provisional, s, group, None, group_status);
            reporter.report_status(&report).await?;
        }
        Ok(())
    }

    /// Components_with_open_pr lists the group's components that still have an open PR: this
    /// one, those with a build in flight, and those whose latest Snapshot's PR is open.
    async fn components_with_open_pr(&self, hash: &str) -> Result<Vec<String>> {
        let namespace = self.namespace()?;
        let application = self.application.name_any();
        let component = self.component.name_any();
        let store = self.store();
        let mut out = vec![component.clone()];

        let builds =
            loader::build_pipeline_runs_in_group(store, &namespace, &application, hash).await?;
        for b in &builds {
            if let Some(c) = pipelinerun::component_name(b)
                && !pipelinerun::has_finished(b)
                && !out.iter().any(|o| o == c)
            {
                out.push(c.to_string());
            }
        }

        for c in loader::application_components(store, &namespace, &application).await? {
            let name = c.name_any();
            if out.contains(&name) {
                continue;
            }
            let snapshots = loader::component_snapshots_in_group(
                store,
                &namespace,
                &application,
                hash,
                Some(&name),
            )
            .await?;
            let Some(latest) = snapshots.first() else {
                continue;
            };
            if let Some(s) = self
                .ctx
                .status
                .find_snapshot_with_open_pr(std::slice::from_ref(latest))
                .await?
            {
                info!(snapshot = %s.name_any(), component = %name, "Opened PR/MR in snapshot is found");
                out.push(name);
            }
        }
        Ok(out)
    }
}

fn has_notice<K: ResourceExt>(obj: &K, notice: &str) -> bool {
    obj.annotations()
        .get(labels::PR_GROUP_CREATION_ANNOTATION)
        .is_some_and(|v| v == notice)
}

fn context_names(s: &IntegrationTestScenario) -> impl Iterator<Item = &str> {
    s.spec.contexts.iter().map(|c| c.name.as_str())
}

/// Applies_to_component reports whether a scenario runs for component Snapshots of `component`.
pub fn applies_to_component(s: &IntegrationTestScenario, component: &str) -> bool {
    let own = format!("component_{component}");
    s.spec.contexts.is_empty()
        || context_names(s)
            .any(|c| matches!(c, "application" | "component" | "pull_request") || c == own)
}

/// Applies_to_group reports whether a scenario runs for group Snapshots.
pub fn applies_to_group(s: &IntegrationTestScenario) -> bool {
    s.spec.contexts.is_empty()
        || context_names(s).any(|c| matches!(c, "application" | "group" | "pull_request"))
}

fn build_report(
    plr: &PipelineRun,
    provisional: &Snapshot,
    scenario: &IntegrationTestScenario,
    prefix: &str,
    component: Option<&str>,
    status: IntegrationTestStatus,
) -> TestReport {
    let scenario_name = scenario.name_any();
    let plr_name = plr.name_any();
    let (summary, text) = match status {
        IntegrationTestStatus::BuildPLRInProgress => (
            format!("Integration test for scenario {scenario_name} is pending"),
            format!("The build pipelinerun {plr_name} is still running."),
        ),
        IntegrationTestStatus::BuildPLRFailed => (
            format!("Integration test for scenario {scenario_name} is cancelled"),
            format!("The build pipelinerun {plr_name} failed, so no Snapshot was created."),
        ),
        IntegrationTestStatus::SnapshotCreationFailed => (
            format!("Integration test for scenario {scenario_name} is cancelled"),
            format!("Snapshot creation failed for build pipelinerun {plr_name}."),
        ),
        _ => (
            format!("Integration test for scenario {scenario_name} is cancelled"),
            format!(
                "The group Snapshot can't be created because build pipelinerun {plr_name} did not produce a Snapshot."
            ),
        ),
    };
    TestReport {
        full_name: format!("{prefix}/{scenario_name}"),
        scenario_name,
        snapshot_name: provisional.name_any(),
        component_name: component.map(String::from),
        status,
        summary,
        text,
        test_pipeline_run_name: None,
    }
}
