//! Buildpipeline holds the controller for build PipelineRuns.
//!
//! Each pass runs the [`Adapter`] operations in order. Any of them can end the pass early by
//! returning [`Outcome::Cancel`]; an error ends it and the object is requeued according to
//! [`error_policy`].

use kube::runtime::controller::Error as CtrlErr;
use tokio::{
    signal::unix::{SignalKind, signal},
    time::Duration,
};
use tokio_stream::wrappers::SignalStream;

use crate::{labels, pipelinerun, prelude::*};

mod adapter;

pub use adapter::{Adapter, release_finalizer};

/// Outcome tells the reconciler whether to run the remaining operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Continue with the next operation.
    Continue,
    /// Stop here; the pass is done.
    Cancel,
}

/// Controller is the build PipelineRun controller.
///
/// An error is returned if any setup fails.
#[instrument(skip_all)]
pub fn controller(cancel: CancellationToken, ctx: Arc<Context>) -> Result<ControllerFuture> {
    let client = ctx.client.clone();
    let ctlcfg = watcher::Config::default().labels(&format!(
        "{}={}",
        labels::PIPELINE_TYPE_LABEL,
        labels::PIPELINE_TYPE_BUILD
    ));
    let sig = SignalStream::new(signal(SignalKind::user_defined1())?);
    let api: Api<PipelineRun> = match &ctx.config.namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    let ctl = Controller::new(api, ctlcfg)
        .reconcile_all_on(sig)
        .graceful_shutdown_on(cancel.cancelled_owned());

    Ok(async move {
        info!("spawning build pipelinerun controller");
        ctl.run(reconcile, error_policy, ctx)
            .for_each(|ret| {
                match ret {
                    Ok(_) => (),
                    Err(err) => match err {
                        CtrlErr::ObjectNotFound(objref) => error!(%objref, "object not found"),
                        CtrlErr::ReconcilerFailed(error, objref) => {
                            debug!(%objref, %error, "reconcile error")
                        }
                        CtrlErr::QueueError(error) => error!(%error, "queue error"),
                        CtrlErr::RunnerError(error) => error!(%error, "runner error"),
                    },
                };
                futures::future::ready(())
            })
            .await;
        debug!("build pipelinerun controller finished");
        Ok(())
    }
    .boxed())
}

#[instrument(skip_all, fields(pipelinerun = %obj.name_any()))]
fn error_policy(obj: Arc<PipelineRun>, err: &Error, ctx: Arc<Context>) -> Action {
    ctx.metrics.reconcile.failures.increment(1);
    if err.is_retryable() {
        warn!(error = %err, "requeueing");
        Action::requeue(Duration::from_secs(5))
    } else {
        error!(error = %err, "reconcile error");
        Action::requeue(Duration::from_secs(60))
    }
}

#[instrument(skip_all, fields(pipelinerun = %obj.name_any(), namespace = ?obj.namespace()))]
async fn reconcile(obj: Arc<PipelineRun>, ctx: Arc<Context>) -> Result<Action> {
    trace!("start");
    ctx.metrics.reconcile.runs.increment(1);
    let namespace = obj
        .namespace()
        .ok_or(Error::MissingName("pipelinerun namespace"))?;
    let store = ctx.store.as_ref();

    let Some(component) = pipelinerun::component_name(&obj) else {
        warn!("build pipelinerun has no component label, ignoring");
        return Ok(Action::await_change());
    };
    let component = match store.get_component(&namespace, component).await {
        Ok(c) => c,
        Err(err) if err.is_not_found() => {
            info!(component, "component not found, releasing pipelinerun");
            release_finalizer(store, &obj).await?;
            return Ok(Action::await_change());
        }
        Err(err) => return Err(err),
    };
    let application = match store
        .get_application(&namespace, &component.spec.application)
        .await
    {
        Ok(a) => a,
        Err(err) if err.is_not_found() => {
            info!(
                application = component.spec.application,
                "application not found, releasing pipelinerun"
            );
            release_finalizer(store, &obj).await?;
            return Ok(Action::await_change());
        }
        Err(err) => return Err(err),
    };

    let mut adapter = Adapter::new(PipelineRun::clone(&obj), &component, &application, &ctx);

    // A macro instead of a slice, because every async fn has its own type.
    macro_rules! check_all {
        ($($fn:ident),+ $(,)?) => {
            {
                'checks: {
$(
                    debug!(step = stringify!($fn), "running operation");
                    let outcome = adapter.$fn().await?;
                    debug!(step = stringify!($fn), ?outcome, "ran operation");
                    if outcome == Outcome::Cancel {
                        break 'checks
                    }
)+
                }
            }
        }
    }
    check_all!(
        ensure_pipeline_is_finalized,
        ensure_pr_group_annotated,
        ensure_integration_test_reported_to_git_provider,
        ensure_snapshot_exists,
    );

    trace!("done");
    Ok(Action::await_change())
}
