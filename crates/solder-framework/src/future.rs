//! A small promise/future pair for asynchronous operation results.
//!
//! Component enable/disable and configuration updates run on the async work
//! service; their callers get a [`Completion`] that resolves once the work
//! finishes.  The pair is a thin wrapper over `tokio::sync::oneshot` — no
//! executor is required to *complete* a promise, and a [`Completion`] can be
//! either `.await`ed or synchronously [`Completion::wait`]ed on.
//!
//! Dropping a [`Promise`] without settling it resolves the completion to
//! [`ServiceError::Cancelled`]; that is exactly the behaviour wanted when the
//! framework shuts down with operations still queued.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use solder_core::{ServiceError, ServiceResult};

/// The producing half: settle it exactly once with a value or an error.
pub struct Promise<T> {
    tx: oneshot::Sender<ServiceResult<T>>,
}

impl<T> Promise<T> {
    /// Resolves the completion with `value`.
    pub fn complete(self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    /// Resolves the completion with `error`.
    pub fn fail(self, error: ServiceError) {
        let _ = self.tx.send(Err(error));
    }

    /// Resolves the completion with an already-built result.
    pub fn settle(self, result: ServiceResult<T>) {
        let _ = self.tx.send(result);
    }
}

/// The consuming half of a [`Promise`].
pub struct Completion<T> {
    rx: oneshot::Receiver<ServiceResult<T>>,
}

impl<T> Completion<T> {
    /// Creates an already-settled completion.
    pub fn ready(result: ServiceResult<T>) -> Self {
        let (promise, completion) = channel();
        promise.settle(result);
        completion
    }

    /// Blocks the calling thread until the promise settles.
    ///
    /// Must not be called from an async context; use `.await` there.
    pub fn wait(self) -> ServiceResult<T> {
        self.rx.blocking_recv().unwrap_or(Err(ServiceError::Cancelled))
    }
}

impl<T> Future for Completion<T> {
    type Output = ServiceResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(ServiceError::Cancelled)))
    }
}

/// Creates a connected promise/completion pair.
pub fn channel<T>() -> (Promise<T>, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    (Promise { tx }, Completion { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_with_value() {
        let (promise, completion) = channel();
        promise.complete(7);
        assert_eq!(completion.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn dropped_promise_resolves_to_cancelled() {
        let (promise, completion) = channel::<()>();
        drop(promise);
        assert_eq!(completion.await.unwrap_err(), ServiceError::Cancelled);
    }

    #[test]
    fn wait_blocks_until_settled() {
        let (promise, completion) = channel();
        std::thread::spawn(move || promise.complete("done"));
        assert_eq!(completion.wait().unwrap(), "done");
    }
}
