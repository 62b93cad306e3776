//! Engine errors

use thiserror::Error;

/// Engine result
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors surfaced by the scheduler's outer API.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to start coroutine thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Coroutine group has been dropped")]
    GroupDropped,

    #[error("No global coroutine group installed")]
    NoGlobalGroup,

    #[error("A global coroutine group is already installed")]
    GlobalAlreadyInstalled,
}

/// Returned by every suspension point once cancellation has been delivered.
///
/// This is a termination signal rather than a failure: a body that sees it
/// should run its cleanup and return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("coroutine cancelled")]
pub struct Cancelled;

/// Sequencer builder misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SequencerError {
    #[error("sequence is closed: no steps may follow an unconditional loop")]
    Closed,
}
