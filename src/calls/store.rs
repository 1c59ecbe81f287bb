//! Per-call action state
//!
//! Keyed store that makes Answer/Transfer idempotent under concurrent
//! redelivery. Every operation is an atomic check-and-set; callers never read
//! state and write it back in two steps.

use super::{CallLegRole, CallState};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Outbound call-control action guarded by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallAction {
    Answer,
    Transfer,
}

impl CallAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallAction::Answer => "answer",
            CallAction::Transfer => "transfer",
        }
    }
}

/// Result of trying to claim an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller owns the action and must either complete or release it.
    Granted,
    /// Another handler is issuing the action right now.
    InFlight,
    /// The action already succeeded for this call leg.
    Completed,
}

/// State change applied by [`CallActionStore::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: Option<CallState>,
    pub current: CallState,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.previous != Some(self.current)
    }
}

/// Result of pinning a verification key to a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPin {
    /// No key was pinned; this one now is.
    Pinned,
    /// The same key was already pinned.
    Matches,
    /// A different key is pinned for this call.
    Conflict,
}

/// Shared per-call action state, injected into the state machine.
///
/// Implementations must make each method atomic with respect to concurrent
/// callers for the same call id and must not hold a lock across an await.
#[async_trait]
pub trait CallActionStore: Send + Sync {
    /// Claim `action` for `(call_id, role)`.
    async fn try_claim(&self, call_id: &str, role: CallLegRole, action: CallAction) -> Claim;

    /// Mark a granted claim as successfully completed. It is never granted again.
    async fn complete(&self, call_id: &str, role: CallLegRole, action: CallAction);

    /// Give a granted claim back so a later redelivery can retry the action.
    async fn release(&self, call_id: &str, role: CallLegRole, action: CallAction);

    /// Current lifecycle state of a call.
    async fn state(&self, call_id: &str) -> Option<CallState>;

    /// Move a call forward; lower-ranked proposals leave the state unchanged.
    async fn advance(&self, call_id: &str, proposed: CallState) -> Transition;

    /// Set `next` only if the call is currently in `expected`.
    async fn compare_and_set(&self, call_id: &str, expected: CallState, next: CallState) -> bool;

    /// Public key pinned for this call, if any.
    async fn pinned_key(&self, call_id: &str) -> Option<[u8; 32]>;

    /// Pin `key` to the call unless another key is already pinned.
    async fn pin_key(&self, call_id: &str, key: [u8; 32]) -> KeyPin;

    /// Number of calls currently tracked.
    async fn tracked(&self) -> usize;

    /// Drop terminal calls untouched for longer than `retention`. Returns the
    /// number of calls removed.
    async fn prune(&self, retention: Duration) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionStatus {
    InFlight,
    Completed,
}

#[derive(Debug)]
struct CallEntry {
    state: Option<CallState>,
    actions: HashMap<(CallLegRole, CallAction), ActionStatus>,
    pinned_key: Option<[u8; 32]>,
    touched_at: Instant,
}

impl CallEntry {
    fn new() -> Self {
        Self {
            state: None,
            actions: HashMap::new(),
            pinned_key: None,
            touched_at: Instant::now(),
        }
    }
}

/// How long a call that never reaches a terminal state is kept after its
/// last event.
pub const DEFAULT_IDLE_CALL_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// Process-local [`CallActionStore`].
#[derive(Debug)]
pub struct InMemoryCallStore {
    calls: Mutex<HashMap<String, CallEntry>>,
    idle_ttl: Duration,
}

impl Default for InMemoryCallStore {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            idle_ttl: DEFAULT_IDLE_CALL_TTL,
        }
    }
}

impl InMemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop non-terminal calls (including key-pin-only entries) once they
    /// have been silent for `idle_ttl`, or for the prune retention when that
    /// is longer.
    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    /// Number of calls currently tracked.
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    fn with_entry<R>(&self, call_id: &str, f: impl FnOnce(&mut CallEntry) -> R) -> R {
        let mut calls = self.calls.lock();
        let entry = calls
            .entry(call_id.to_string())
            .or_insert_with(CallEntry::new);
        entry.touched_at = Instant::now();
        f(entry)
    }
}

#[async_trait]
impl CallActionStore for InMemoryCallStore {
    async fn try_claim(&self, call_id: &str, role: CallLegRole, action: CallAction) -> Claim {
        self.with_entry(call_id, |entry| match entry.actions.get(&(role, action)) {
            Some(ActionStatus::InFlight) => Claim::InFlight,
            Some(ActionStatus::Completed) => Claim::Completed,
            None => {
                entry.actions.insert((role, action), ActionStatus::InFlight);
                Claim::Granted
            }
        })
    }

    async fn complete(&self, call_id: &str, role: CallLegRole, action: CallAction) {
        self.with_entry(call_id, |entry| {
            entry.actions.insert((role, action), ActionStatus::Completed);
        })
    }

    async fn release(&self, call_id: &str, role: CallLegRole, action: CallAction) {
        self.with_entry(call_id, |entry| {
            if entry.actions.get(&(role, action)) == Some(&ActionStatus::InFlight) {
                entry.actions.remove(&(role, action));
            }
        })
    }

    async fn state(&self, call_id: &str) -> Option<CallState> {
        self.calls.lock().get(call_id).and_then(|entry| entry.state)
    }

    async fn advance(&self, call_id: &str, proposed: CallState) -> Transition {
        self.with_entry(call_id, |entry| {
            let previous = entry.state;
            let current = CallState::merge(previous, proposed);
            entry.state = Some(current);
            Transition { previous, current }
        })
    }

    async fn compare_and_set(&self, call_id: &str, expected: CallState, next: CallState) -> bool {
        self.with_entry(call_id, |entry| {
            if entry.state == Some(expected) {
                entry.state = Some(next);
                true
            } else {
                false
            }
        })
    }

    async fn pinned_key(&self, call_id: &str) -> Option<[u8; 32]> {
        self.calls.lock().get(call_id).and_then(|entry| entry.pinned_key)
    }

    async fn pin_key(&self, call_id: &str, key: [u8; 32]) -> KeyPin {
        self.with_entry(call_id, |entry| match entry.pinned_key {
            None => {
                entry.pinned_key = Some(key);
                KeyPin::Pinned
            }
            Some(pinned) if pinned == key => KeyPin::Matches,
            Some(_) => KeyPin::Conflict,
        })
    }

    async fn tracked(&self) -> usize {
        self.len()
    }

    async fn prune(&self, retention: Duration) -> usize {
        let mut calls = self.calls.lock();
        let before = calls.len();
        let idle = retention.max(self.idle_ttl);
        calls.retain(|_, entry| {
            let keep_for = if entry.state.is_some_and(|s| s.is_terminal()) {
                retention
            } else {
                idle
            };
            entry.touched_at.elapsed() < keep_for
        });
        before - calls.len()
    }
}
