//! Error types for simulation runs.

use thiserror::Error;

/// Errors that can fail one simulation run.
#[derive(Debug, Error)]
pub enum Error {
    /// The environment aborted the episode.
    #[error(transparent)]
    Env(#[from] oraas_env::Error),

    /// The policy boundary rejected an observation or action.
    #[error(transparent)]
    Policy(#[from] oraas_policy::Error),
}

/// Result type alias for simulation runs.
pub type Result<T> = std::result::Result<T, Error>;
