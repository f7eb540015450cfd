//! Config holds the settings the reconcilers read.

use crate::status::DEFAULT_CONSOLE_URL;

/// Config is assembled from the command line.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Console_url is the pipeline run viewer template linked from commit statuses.
    ///
    /// `{namespace}` and `{pipelinerun}` are replaced per report.
    pub console_url: String,
    /// Namespace restricts the watch to one namespace. `None` watches the whole cluster.
    pub namespace: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            console_url: DEFAULT_CONSOLE_URL.into(),
            namespace: None,
        }
    }
}
