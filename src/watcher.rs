//! Timeout-bounded one-shot observers for approval-gated requests.
//!
//! A verification request that needs human approval suspends its handler
//! until the popup reports a decision. [`RequestsWatcher`] holds the
//! per-request callback triple and a deadline timer; whichever of
//! accept / decline / timeout happens first wins, fires its callback
//! exactly once, and retires the entry. Later signals for the same id are
//! idempotent no-ops.
//!
//! State machine per request id:
//!
//! ```text
//! PENDING ──► ACCEPTED | DECLINED | TIMED_OUT   (terminal on first)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::identifiers::RequestId;

// ============================================================================
// Constants
// ============================================================================

/// Default deadline for a pending approval.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ============================================================================
// Types
// ============================================================================

/// Fired when the user accepts; receives the approved payload.
pub type AcceptedCallback = Box<dyn FnOnce(Value) + Send>;

/// Fired when the user declines.
pub type DeclinedCallback = Box<dyn FnOnce() + Send>;

/// Fired when the deadline elapses first.
pub type TimeoutCallback = Box<dyn FnOnce() + Send>;

struct WatchEntry {
    on_accepted: AcceptedCallback,
    on_declined: DeclinedCallback,
    on_timeout: TimeoutCallback,
    timer: JoinHandle<()>,
}

type EntryMap = FxHashMap<RequestId, WatchEntry>;

// ============================================================================
// RequestsWatcher
// ============================================================================

/// One-shot resolver registry for human-approval-gated requests.
///
/// Cheap to clone; clones share the entry map, so the connection handler
/// that registers a request and the popup handlers that settle it can
/// hold separate handles.
pub struct RequestsWatcher {
    entries: Arc<Mutex<EntryMap>>,
    request_timeout: Duration,
}

impl Clone for RequestsWatcher {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            request_timeout: self.request_timeout,
        }
    }
}

impl Default for RequestsWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestsWatcher {
    /// Creates a watcher with the default deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a watcher with a custom deadline.
    #[must_use]
    pub fn with_timeout(request_timeout: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(EntryMap::default())),
            request_timeout,
        }
    }

    /// Returns the number of requests still pending.
    #[inline]
    #[must_use]
    pub fn watched_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Registers the callback triple for a request and arms its deadline.
    ///
    /// Re-registering an id replaces the previous entry (its timer is
    /// cancelled and its callbacks are dropped unfired).
    pub fn listen_for_request(
        &self,
        id: RequestId,
        on_accepted: AcceptedCallback,
        on_declined: DeclinedCallback,
        on_timeout: TimeoutCallback,
    ) {
        let entries = Arc::clone(&self.entries);
        let deadline = self.request_timeout;
        let timer = tokio::spawn(async move {
            sleep(deadline).await;
            Self::expire(&entries, id);
        });

        let entry = WatchEntry {
            on_accepted,
            on_declined,
            on_timeout,
            timer,
        };

        let previous = self.entries.lock().insert(id, entry);
        if let Some(previous) = previous {
            warn!(%id, "Replacing watched request");
            previous.timer.abort();
        }

        debug!(%id, ?deadline, "Watching request");
    }

    /// Signals user acceptance. Returns `true` if this settled the
    /// request, `false` for unknown or already-terminal ids.
    pub fn accept(&self, id: RequestId, payload: Value) -> bool {
        let entry = self.entries.lock().remove(&id);

        match entry {
            Some(entry) => {
                entry.timer.abort();
                debug!(%id, "Request accepted");
                (entry.on_accepted)(payload);
                true
            }
            None => {
                debug!(%id, "Ignoring accept for unknown or settled request");
                false
            }
        }
    }

    /// Signals user decline. Returns `true` if this settled the request,
    /// `false` for unknown or already-terminal ids.
    pub fn decline(&self, id: RequestId) -> bool {
        let entry = self.entries.lock().remove(&id);

        match entry {
            Some(entry) => {
                entry.timer.abort();
                debug!(%id, "Request declined");
                (entry.on_declined)();
                true
            }
            None => {
                debug!(%id, "Ignoring decline for unknown or settled request");
                false
            }
        }
    }

    /// Deadline transition, driven by the armed timer.
    fn expire(entries: &Mutex<EntryMap>, id: RequestId) {
        let entry = entries.lock().remove(&id);

        if let Some(entry) = entry {
            debug!(%id, "Request timed out");
            (entry.on_timeout)();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
