//! Controller turns finished build PipelineRuns into Snapshots and keeps git providers informed
//! about what happens to them.
use std::sync::{Arc, LazyLock};

// Re-exports for everyone's easy use.
pub(crate) mod prelude {
    pub use std::sync::Arc;

    pub use api::{tekton::PipelineRun, v1alpha1, v1beta2};
    pub use futures::prelude::*;
    pub use k8s_openapi::{api::*, apimachinery::pkg::apis::meta};
    pub use kube::{
        self, Resource, ResourceExt,
        api::{Api, PatchParams, PostParams},
        runtime::{
            controller::{Action, Controller},
            watcher,
        },
    };
    pub use tokio_util::sync::CancellationToken;
    pub use tracing::{debug, error, info, instrument, trace, warn};

    pub use super::{CONTROLLER_NAME, OPERATOR_NAME};
    pub use super::{Context, ControllerFuture, Error, Result};
}

pub mod buildpipeline;
pub mod config;
pub mod labels;
pub mod loader;
pub mod metrics;
pub mod pipelinerun;
pub mod prgroup;
pub mod snapshot;
pub mod status;
pub mod store;

#[cfg(test)]
mod testing;

// NB The docs are unclear, but backtraces are unsupported on stable.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("tracing_subscriber error: {0}")]
    TracingConfig(#[from] tracing_subscriber::filter::ParseError),
    #[error("tracing error: {0}")]
    Tracing(#[from] tracing::subscriber::SetGlobalDefaultError),
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    #[error("kubeconfig error: {0}")]
    KubeConfig(#[from] kube::config::InferConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tokio error: {0}")]
    Tokio(#[from] tokio::task::JoinError),
    #[error("missing name for kubernetes object: {0}")]
    MissingName(&'static str),
    #[error("some other error: {0}")]
    Other(#[from] anyhow::Error),
    #[error("json error: {0}")]
    JSON(#[from] serde_json::Error),
    #[error("parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid snapshot: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("{kind} {name:?} not found")]
    NotFound { kind: String, name: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("Missing info {key} from pipelinerun {pipeline_run}")]
    MissingInfo { key: String, pipeline_run: String },
    #[error("{component}: invalid image digest in container image {image:?}")]
    InvalidImageDigest { component: String, image: String },
    #[error("missing required metadata: {0}")]
    MissingMetadata(String),
    #[error("unknown integration test status: {0:?}")]
    UnknownStatus(String),
    #[error("git provider returned {status} for {url}: {body}")]
    Provider {
        status: u16,
        url: String,
        body: String,
    },
    #[error("not ready: {0}")]
    NotReady(String),
}

impl Error {
    /// Is_not_found reports whether the error means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Is_conflict reports whether the error is an optimistic concurrency failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Is_invalid_input reports whether the error is caused by a build that can never produce a
    /// Snapshot: missing results, a bad digest, or a Snapshot that fails validation.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Error::MissingInfo { .. } | Error::InvalidImageDigest { .. } | Error::Validation(_)
        )
    }

    /// Is_git_misconfiguration reports whether a git provider refused or could not be set up
    /// for a reason that retrying will not fix: missing credentials or coordinates, or a 4xx
    /// other than 429.
    pub fn is_git_misconfiguration(&self) -> bool {
        match self {
            Error::MissingMetadata(_) => true,
            Error::Provider { status, .. } => (400..500).contains(status) && *status != 429,
            _ => false,
        }
    }

    /// Is_retryable reports whether the error is expected to clear up on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Conflict(_) | Error::NotReady(_) | Error::NotFound { .. } => true,
            Error::Http(err) => err.is_timeout() || err.is_connect(),
            Error::Provider { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Result typedef for the controller.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// ControllerFuture is the type a controller constructor should return.
pub type ControllerFuture = futures::future::BoxFuture<'static, Result<()>>;

/// Context is the state shared by every reconcile.
pub struct Context {
    pub client: kube::Client,
    pub store: Arc<dyn store::Store>,
    pub status: Arc<dyn status::GitStatus>,
    pub config: config::Config,
    pub metrics: metrics::Metrics,
}
impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ctx")
    }
}

impl Context {
    /// New constructs a Context backed by the cluster and the real git providers.
    pub fn new(client: kube::Client, config: config::Config) -> Result<Self> {
        let store: Arc<dyn store::Store> = Arc::new(store::KubeStore::new(client.clone()));
        let status = Arc::new(status::Status::new(store.clone(), config.console_url.clone())?);
        Ok(Self {
            client,
            store,
            status,
            config,
            metrics: metrics::Metrics::default(),
        })
    }
}

/// CONTROLLER_NAME is used as the field manager for every write.
pub static CONTROLLER_NAME: &str = "integration-controller";

/// OPERATOR_NAME is the name the controller uses whenever it needs a human-readable name.
pub static OPERATOR_NAME: LazyLock<String> =
    LazyLock::new(|| format!("integration-controller-{}", env!("CARGO_PKG_VERSION")));
