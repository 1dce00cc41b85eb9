//! Error types for the scheduler.
//!
//! Only operations that depend on the OS can fail recoverably (spawning
//! worker or timer threads). Invalid API use (touching scheduler state
//! from an unattached thread, destroying a scheduler with workers still
//! attached, violating the `WaitGroup` counter contract) is a programmer
//! error and panics instead.

use thiserror::Error;

/// Main error type for scheduler operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {reason}")]
    WorkerSpawn {
        /// Reason for the spawn failure
        reason: String,
    },

    /// The timer thread could not be spawned.
    #[error("failed to spawn timer thread: {reason}")]
    TimerSpawn {
        /// Reason for the spawn failure
        reason: String,
    },
}

/// Convenient result type alias
pub type Result<T> = std::result::Result<T, Error>;
