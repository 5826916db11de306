// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The async I/O primitive (component C2): one pending read or write against
//! one endpoint, with at-most-once completion delivery and idempotent
//! cancellation.
//!
//! A pending operation is an owned [`tokio::task::JoinHandle`] rather than a
//! raw pointer threaded through platform async-I/O bookkeeping: the
//! runtime, not hand-rolled pointer arithmetic, owns the operation's
//! lifetime, and dropping or aborting the handle is the cancellation path.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;

use crate::error::Error;

/// A single in-flight read or write. The pump (C7) is responsible for never
/// having more than one `AsyncOp` outstanding per direction per connection;
/// this type does not enforce that itself -- that's the pump's
/// responsibility, not the primitive's. In practice the pump holds exactly
/// one long-lived read `AsyncOp` and one long-lived write `AsyncOp` per
/// connection (see [`crate::pump`]), each wrapping the whole read or write
/// half for the connection's lifetime rather than a single frame.
pub struct AsyncOp<T> {
    handle: Option<JoinHandle<Result<T, Error>>>,
    callback_called: AtomicBool,
}

impl<T: Send + 'static> AsyncOp<T> {
    /// Submits `fut` to the runtime, returning immediately with a handle to
    /// its eventual completion.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        AsyncOp {
            handle: Some(tokio::spawn(fut)),
            callback_called: AtomicBool::new(false),
        }
    }

    /// True from submission until the op is consumed by [`AsyncOp::wait`] or
    /// cancelled.
    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    /// True once the OS/runtime reports the operation finished, whether
    /// successfully, with an error, or because it was cancelled.
    pub fn is_complete(&self) -> bool {
        match &self.handle {
            Some(h) => h.is_finished(),
            None => true,
        }
    }

    /// Best-effort cancellation. Idempotent, and safe to call on an already
    /// complete operation (aborting a finished task is a no-op in tokio).
    pub fn cancel(&mut self) {
        if let Some(h) = &self.handle {
            h.abort();
        }
    }

    /// Consumes the operation, awaiting its result. Returns
    /// [`Error::Abandoned`] if called twice (the op was already consumed) or
    /// if the underlying task was cancelled out from under the caller.
    pub async fn wait(&mut self) -> Result<T, Error> {
        let handle = self.handle.take().ok_or(Error::Abandoned)?;
        match handle.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_cancelled() => Err(Error::Abandoned),
            Err(join_err) => Err(Error::Other(join_err.to_string())),
        }
    }

    /// Invokes `callback` with `result` at most once, guarding against
    /// re-entrant double-calls with an atomic flag. A second call with the
    /// op already reported is a silent no-op rather than an error.
    pub fn call_callback<F: FnOnce(Result<T, Error>)>(&self, result: Result<T, Error>, callback: F) {
        if self.callback_called.swap(true, Ordering::SeqCst) {
            return;
        }
        callback(result);
    }
}

/// Dropping an op that hasn't been [`AsyncOp::wait`]ed aborts the task
/// backing it, the same way [`AsyncOp::cancel`] does. This is what lets the
/// pump (C7) hold exactly one `AsyncOp` per direction for the lifetime of a
/// connection and simply drop it on teardown instead of having to reach in
/// and cancel it explicitly.
impl<T> Drop for AsyncOp<T> {
    fn drop(&mut self) {
        if let Some(h) = &self.handle {
            h.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn op_starts_valid_and_becomes_invalid_after_wait() {
        let mut op = AsyncOp::spawn(async { Ok(7u32) });
        assert!(op.is_valid());
        let v = op.wait().await.unwrap();
        assert_eq!(v, 7);
        assert!(!op.is_valid());
    }

    #[tokio::test]
    async fn double_wait_is_abandoned() {
        let mut op = AsyncOp::spawn(async { Ok(1u32) });
        op.wait().await.unwrap();
        let err = op.wait().await.unwrap_err();
        assert!(matches!(err, Error::Abandoned));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_even_when_already_complete() {
        let mut op = AsyncOp::spawn(async { Ok(1u32) });
        op.cancel();
        op.cancel();
    }

    #[tokio::test]
    async fn call_callback_runs_at_most_once() {
        let op: AsyncOp<u32> = AsyncOp::spawn(async { Ok(3u32) });
        let mut calls = 0;
        op.call_callback(Ok(3), |_| calls += 1);
        op.call_callback(Ok(3), |_| calls += 1);
        assert_eq!(calls, 1);
    }
}
