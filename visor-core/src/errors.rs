//! Error taxonomy for context discovery, chunking, and the bounded executor.
//!
//! Every variant here is fatal for the invocation that hits it: nothing in
//! the context pipeline retries locally. The `visor` binary adds its own
//! error types for the network phases.

use std::path::PathBuf;
use thiserror::Error;

/// Failures raised while resolving or chunking a build context.
#[derive(Debug, Error)]
pub enum ContextError {
    /// A manifest line could not be tokenized into a directive at all.
    #[error("{file}:{line}: malformed directive: {message}")]
    Parse {
        file: PathBuf,
        line: usize,
        message: String,
    },

    /// A copy source resolved outside the context root. Security-relevant,
    /// never recovered.
    #[error("illegal path {path} escapes context root {root}")]
    IllegalPath { path: PathBuf, root: PathBuf },

    /// The inherit chain exceeded the bounded depth (cycle or runaway chain).
    #[error("inherit chain is longer than {limit} manifests")]
    ChainTooLong { limit: usize },

    /// An internal invariant was violated; indicates a bug upstream, not a
    /// user error.
    #[error("internal invariant violated: {0}")]
    IllegalState(String),

    /// Filesystem access failed.
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The VCS ignore oracle (git) could not be consulted.
    #[error("git invocation failed: {0}")]
    Vcs(String),

    /// The chunking worker died without producing a result.
    #[error("chunking worker exited without producing a result: {0}")]
    WorkerExited(String),
}

impl ContextError {
    /// Attach a path to an `std::io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
