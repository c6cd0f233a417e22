//! Error types shared by every worker-owning primitive.
//!
//! Most failure modes of the framework are either caught at compile time
//! (unknown event alternatives, non-exhaustive visitors) or are part of the
//! normal protocol (a cancelled timer reports `false`). What remains are the
//! operating-system level failures around worker threads.

use thiserror::Error;

/// Errors raised while spawning or joining worker threads.
#[derive(Debug, Error)]
pub enum StrandError {
    /// The operating system refused to create the worker thread.
    #[error("failed to spawn worker thread `{name}`")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    /// The worker thread unwound instead of returning.
    #[error("worker thread `{name}` panicked")]
    Panicked { name: String },
    /// The worker was already joined through another handle.
    #[error("worker thread `{name}` was already joined")]
    AlreadyJoined { name: String },
}

impl StrandError {
    pub(crate) fn spawn(name: &str, source: std::io::Error) -> Self {
        Self::Spawn {
            name: name.to_owned(),
            source,
        }
    }

    pub(crate) fn panicked(name: &str) -> Self {
        Self::Panicked {
            name: name.to_owned(),
        }
    }
}

pub type StrandResult<T> = Result<T, StrandError>;
