//! Write-deduplication cache for dimension rows
//!
//! Dimension rows (`service_names`, `span_names`) carry no per-span data, so
//! writing the same one again is pure load on the store. Each ingest worker
//! owns a [`WriteDedupCache`] remembering which dimension keys it already
//! wrote in the current time window.
//!
//! # Design
//!
//! - Owned by one worker, never shared: plain `FxHashSet`, no locking
//! - Window is `now_ms / window_ms`; entering a new window clears the set
//! - The window is checked on every access, not by a timer
//! - Marks are optimistic: a key is marked before its write completes. Each
//!   mark is held by a [`MarkGuard`] that sends the key back through a
//!   [`DedupRevert`] handle unless the write is seen to succeed, whether it
//!   failed or its outcome was dropped unobserved. The cache drops reverted
//!   keys on its next access so the following call retries
//!
//! Keys are `service` for a service row and `service‖span` for a span-name
//! row; see [`service_key`] and [`span_name_key`].

use crate::clock::Clock;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;

/// Separator between service and span name in a span-name key.
pub const KEY_SEPARATOR: char = '‖';

/// Dedup key of a service dimension row.
pub fn service_key(service_name: &str) -> String {
    service_name.to_string()
}

/// Dedup key of a span-name dimension row.
pub fn span_name_key(service_name: &str, span_name: &str) -> String {
    let mut key = String::with_capacity(service_name.len() + span_name.len() + 3);
    key.push_str(service_name);
    key.push(KEY_SEPARATOR);
    key.push_str(span_name);
    key
}

/// Sends keys of failed writes back to the cache that marked them.
///
/// Cheap to clone; sending after the cache is dropped is a no-op.
#[derive(Debug, Clone)]
pub struct DedupRevert {
    tx: UnboundedSender<String>,
}

impl DedupRevert {
    /// Ask the cache to forget `key`.
    pub fn revert(&self, key: String) {
        // Cache gone means its marks are gone too.
        let _ = self.tx.send(key);
    }
}

/// Holds one optimistic mark until its write is known to have succeeded.
///
/// Dropping the guard without calling [`keep`](Self::keep) reverts the mark.
#[derive(Debug)]
#[must_use = "dropping the guard reverts the mark"]
pub struct MarkGuard {
    revert: DedupRevert,
    key: Option<String>,
}

impl MarkGuard {
    /// Key this guard holds.
    pub fn key(&self) -> &str {
        self.key.as_deref().unwrap_or_default()
    }

    /// The write succeeded; leave the mark in place.
    pub fn keep(mut self) {
        self.key = None;
    }
}

impl Drop for MarkGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.revert.revert(key);
        }
    }
}

/// Per-worker set of dimension keys written in the current window.
#[derive(Debug)]
pub struct WriteDedupCache {
    clock: Arc<dyn Clock>,
    window_ms: i64,
    window: i64,
    marked: FxHashSet<String>,
    revert_tx: UnboundedSender<String>,
    revert_rx: UnboundedReceiver<String>,
}

impl WriteDedupCache {
    /// Empty cache with windows of `window_ms` milliseconds (at least 1).
    pub fn new(clock: Arc<dyn Clock>, window_ms: u64) -> Self {
        let window_ms = window_ms.clamp(1, i64::MAX as u64) as i64;
        let (revert_tx, revert_rx) = mpsc::unbounded_channel();
        let window = clock.now_millis().div_euclid(window_ms);
        Self {
            clock,
            window_ms,
            window,
            marked: FxHashSet::default(),
            revert_tx,
            revert_rx,
        }
    }

    /// Mark `key` as written. Returns `false` if it was already marked in
    /// this window, in which case the caller skips the write.
    pub fn try_mark(&mut self, key: &str) -> bool {
        self.refresh();
        if self.marked.contains(key) {
            return false;
        }
        self.marked.insert(key.to_string());
        true
    }

    /// Forget `key`, so the next [`try_mark`](Self::try_mark) succeeds.
    pub fn unmark(&mut self, key: &str) {
        self.refresh();
        self.marked.remove(key);
    }

    /// Whether `key` is marked in the current window.
    pub fn contains(&mut self, key: &str) -> bool {
        self.refresh();
        self.marked.contains(key)
    }

    /// Number of marked keys in the current window.
    pub fn len(&mut self) -> usize {
        self.refresh();
        self.marked.len()
    }

    /// Whether nothing is marked in the current window.
    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// Handle for reverting marks from write completions.
    pub fn revert_handle(&self) -> DedupRevert {
        DedupRevert {
            tx: self.revert_tx.clone(),
        }
    }

    /// Mark `key` and return a guard holding the mark, or `None` if it was
    /// already marked in this window.
    pub fn try_guard(&mut self, key: String) -> Option<MarkGuard> {
        if !self.try_mark(&key) {
            return None;
        }
        Some(MarkGuard {
            revert: self.revert_handle(),
            key: Some(key),
        })
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    fn refresh(&mut self) {
        while let Ok(key) = self.revert_rx.try_recv() {
            trace!(key = %key, "reverting dedup mark");
            self.marked.remove(&key);
        }

        let window = self.clock.now_millis().div_euclid(self.window_ms);
        if window != self.window {
            trace!(from = self.window, to = window, cleared = self.marked.len(), "dedup window rolled");
            self.marked.clear();
            self.window = window;
        }
    }
}
