//! Engine-level errors surfaced through the facade.

/// Errors returned by [`SoundManager`](crate::SoundManager).
///
/// Most operations are fire-and-forget and cannot fail; the protocol assumes
/// the worker only ever exits through the acknowledged shutdown path, so an
/// unexpected exit is a hard error on the next `step()`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The audio worker exited outside the acknowledged shutdown path.
    #[error("audio worker stopped unexpectedly")]
    WorkerStopped,
}
