// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Correlation table (component C6): maps an in-flight call's `uid` to the
//! callback that should run when its reply (or a synthetic disconnect
//! error) arrives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::value::Value;

/// The string payload delivered to every pending callback when the
/// connection is lost before a reply arrives.
pub const LOST_CONNECTION_MESSAGE: &str = "Lost IPC Connection";

/// Invoked with the decoded reply values (or the synthetic lost-connection
/// value produced on disconnect/error). Consumed at most once, which is why
/// this is `FnOnce` rather than `Fn`: a callback fires exactly once per call.
pub type Callback = Box<dyn FnOnce(Vec<Value>) + Send + 'static>;

/// Process-wide, monotonically increasing call id. Starts at 1 and is never
/// reused within a process lifetime.
#[derive(Default)]
pub struct UidAllocator(AtomicU64);

impl UidAllocator {
    pub fn new() -> Self {
        UidAllocator(AtomicU64::new(0))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// The uid -> pending-callback map for one connection. Guarded by a mutex
/// that is never held while a callback runs: every accessor here that
/// yields a callback to the caller (`take`, `drain`) releases the lock
/// first -- the lock is released *before* invoking the callback, which is
/// why `drain` returns the callbacks rather than calling them inline.
#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<u64, Callback>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` under `uid`. Callers must do this *before*
    /// enqueuing the outbound write, so a fast reply can never race ahead
    /// of registration.
    pub fn insert(&self, uid: u64, callback: Callback) {
        self.pending.lock().unwrap().insert(uid, callback);
    }

    /// Cancels a pending call. Idempotent: returns whether an entry was
    /// actually present to remove.
    pub fn remove(&self, uid: u64) -> bool {
        self.pending.lock().unwrap().remove(&uid).is_some()
    }

    /// Atomically removes and returns the callback for `uid`, if any. Used
    /// when a reply arrives; a `uid` with no pending entry (already
    /// cancelled, or a duplicate/late reply) yields `None` silently.
    pub fn take(&self, uid: u64) -> Option<Callback> {
        self.pending.lock().unwrap().remove(&uid)
    }

    /// Drains every pending entry, releasing the lock before returning so
    /// the caller can invoke each callback with the synthetic
    /// [`lost_connection_reply`] without risking a reentrant deadlock.
    /// Called exactly once, when the owning connection is torn down.
    pub fn drain(&self) -> Vec<Callback> {
        let mut pending = self.pending.lock().unwrap();
        pending.drain().map(|(_, cb)| cb).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The reply value every pending callback receives when its connection is
/// lost before completion.
///
/// This is a single `Value::String`, not a `Value::Null` carrying an
/// out-of-band string payload: a wire-level `Null` has no payload slot, so
/// the two can't both be true at once. This module's own error replies
/// (see [`crate::pump`]'s `handle_inbound`) already use `Value::String` for
/// a failure message, and this follows that same precedent rather than
/// inventing a second convention. This is a deliberate, recorded resolution
/// (see DESIGN.md), not an oversight -- a handler that branches on
/// `Value::Null` to detect a lost connection will not match this value; it
/// should match on `Value::String` instead.
pub fn lost_connection_reply() -> Vec<Value> {
    vec![Value::String(LOST_CONNECTION_MESSAGE.as_bytes().to_vec())]
}
