//! Callback-to-future adaptation.
//!
//! Engine operations complete by invoking a [`Callback`] exactly once, often
//! from an engine worker thread. [`promisify`] hands such an operation a
//! fresh callback and returns a [`Pending`] future that settles with whatever
//! the callback receives.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{DuckDbError, DuckDbResult};

/// Completion callback appended to every single-shot engine operation.
pub type Callback<T> = Box<dyn FnOnce(DuckDbResult<T>) + Send + 'static>;

/// How the caller wants to learn about completion of an engine operation
/// that also returns a value synchronously.
pub enum Completion<T> {
    /// Invoke the callback once the operation finishes.
    WithCallback(Callback<T>),
    /// Fire and forget; the engine reports failures on its own.
    WithoutCallback,
}

impl<T> Completion<T> {
    /// Deliver a result, if anyone is listening.
    ///
    /// Returns the result back when there is no callback so the engine can
    /// report it some other way.
    pub fn complete(self, result: DuckDbResult<T>) -> Option<DuckDbResult<T>> {
        match self {
            Self::WithCallback(done) => {
                done(result);
                None
            }
            Self::WithoutCallback => Some(result),
        }
    }

    /// Whether a callback is attached.
    pub fn is_observed(&self) -> bool {
        matches!(self, Self::WithCallback(_))
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WithCallback(_) => f.write_str("Completion::WithCallback"),
            Self::WithoutCallback => f.write_str("Completion::WithoutCallback"),
        }
    }
}

/// A single-resolution future for one engine operation.
#[must_use = "the operation result is lost unless awaited"]
pub struct Pending<T> {
    state: State<T>,
}

enum State<T> {
    Settled(Option<DuckDbResult<T>>),
    Waiting(oneshot::Receiver<DuckDbResult<T>>),
}

// The result is only ever moved out, never pinned.
impl<T> Unpin for Pending<T> {}

impl<T> Pending<T> {
    /// A future that has already failed.
    pub fn failed(err: DuckDbError) -> Self {
        Self {
            state: State::Settled(Some(Err(err))),
        }
    }

    /// A future that has already succeeded.
    pub fn ready(value: T) -> Self {
        Self {
            state: State::Settled(Some(Ok(value))),
        }
    }
}

impl<T> Future for Pending<T> {
    type Output = DuckDbResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            State::Settled(result) => Poll::Ready(
                result
                    .take()
                    .unwrap_or_else(|| Err(DuckDbError::internal("future polled after completion"))),
            ),
            State::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => {
                    this.state = State::Settled(None);
                    Poll::Ready(result)
                }
                Poll::Ready(Err(_)) => {
                    this.state = State::Settled(None);
                    Poll::Ready(Err(DuckDbError::internal(
                        "engine dropped the completion callback without invoking it",
                    )))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Settled(Some(_)) => "settled",
            State::Settled(None) => "consumed",
            State::Waiting(_) => "waiting",
        };
        f.debug_struct("Pending").field("state", &state).finish()
    }
}

/// Create a linked callback/future pair.
pub fn callback<T: Send + 'static>() -> (Callback<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    let done: Callback<T> = Box::new(move |result| {
        // The receiver may already be gone if the caller stopped awaiting.
        let _ = tx.send(result);
    });
    let pending = Pending {
        state: State::Waiting(rx),
    };
    (done, pending)
}

/// Run a callback-style operation and return a future for its result.
///
/// `op` receives the completion callback to pass as the engine call's final
/// argument; all other arguments are whatever `op` forwards.
pub fn promisify<T, F>(op: F) -> Pending<T>
where
    T: Send + 'static,
    F: FnOnce(Callback<T>),
{
    let (done, pending) = callback();
    op(done);
    pending
}
