//! CLI command implementations.

pub mod inspect;
pub mod snapshot;
pub mod stream;
pub mod validate;
pub mod verify;

use thiserror::Error;

/// Failures reported by the commands themselves.
#[derive(Debug, Error)]
pub enum CommandError {
    /// A command needs `--path`.
    #[error("a directory path is required for {0}")]
    MissingPath(&'static str),

    /// Verification found damaged journals.
    #[error("verification failed for {0} store(s)")]
    VerificationFailed(usize),

    /// The directory holds nothing to work on.
    #[error("no stores found in {0}")]
    NoStores(String),
}
