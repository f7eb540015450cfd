//! Metrics contains the metrics setup for the controller.
//!
//! Everything is recorded through the `metrics` facade; the binary installs the Prometheus
//! recorder that serves it.

use metrics::{Counter, Unit, counter, describe_counter};

use crate::status::IntegrationTestStatus;

static RECONCILES: &str = "integration_reconciles_total";
static FAILURES: &str = "integration_reconcile_failures_total";
static SNAPSHOTS_CREATED: &str = "integration_snapshots_created_total";
static GIT_REPORTS: &str = "integration_git_reports_total";

/// Common metrics for the reconcilers.
#[derive(Clone)]
pub struct Metrics {
    /// Metrics collected from reconcilers.
    pub reconcile: ReconcileMetrics,
    /// Snapshots_created counts Snapshots created from build PipelineRuns.
    pub snapshots_created: Counter,
}

impl Default for Metrics {
    fn default() -> Self {
        describe_counter!(
            SNAPSHOTS_CREATED,
            Unit::Count,
            "Snapshots created from build PipelineRuns"
        );
        describe_counter!(
            GIT_REPORTS,
            Unit::Count,
            "statuses reported to git providers, by status"
        );
        Self {
            reconcile: ReconcileMetrics::default(),
            snapshots_created: counter!(SNAPSHOTS_CREATED),
        }
    }
}

impl Metrics {
    /// Git_report records one status posted to a git provider.
    pub fn git_report(&self, status: IntegrationTestStatus) {
        let status: &'static str = status.into();
        counter!(GIT_REPORTS, "status" => status).increment(1);
    }
}

/// Metrics collected from reconcilers.
#[derive(Clone)]
pub struct ReconcileMetrics {
    /// Runs records the total number of calls to a reconciler.
    pub runs: Counter,
    /// Failures records the total number of reconciler calls that resulted in a failure.
    pub failures: Counter,
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        describe_counter!(RECONCILES, Unit::Count, "calls to the reconciler");
        describe_counter!(FAILURES, Unit::Count, "reconciler calls that failed");
        Self {
            runs: counter!(RECONCILES),
            failures: counter!(FAILURES),
        }
    }
}
