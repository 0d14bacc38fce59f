//! Target-to-session registry.
//!
//! Session setup (control handshake and port negotiation) costs far more
//! than a single measurement run, and Prometheus polls the same targets
//! at a fixed interval, so established sessions are cached per target and
//! reused until they break or the process shuts down.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use twamp_core::{MeasurementClient, MeasurementSession, Result};

/// What a registry slot currently holds.
///
/// `Evicted` is a tombstone: the slot has been unlinked from the registry
/// and must not be filled again. A task that was already waiting on the
/// slot's lock when it was evicted re-acquires through the registry
/// instead of resurrecting an unlinked slot.
enum SlotState<S> {
    Vacant,
    Ready(S),
    Evicted,
}

type Slot<S> = Arc<Mutex<SlotState<S>>>;

/// An acquired session. Holding this value holds the session's
/// exclusivity lock: at most one measurement run is in flight per session
/// because the underlying control connection cannot be shared.
pub struct ActiveSession<S: MeasurementSession> {
    target: String,
    slot: Slot<S>,
    guard: OwnedMutexGuard<SlotState<S>>,
}

impl<S: MeasurementSession> ActiveSession<S> {
    /// The established session, exclusively borrowed for one run.
    pub fn session(&mut self) -> &mut S {
        match &mut *self.guard {
            SlotState::Ready(session) => session,
            // acquire() only hands out slots it has filled
            _ => unreachable!("active session without an established slot"),
        }
    }
}

/// Registry of established measurement sessions, keyed by target.
///
/// The map itself is only ever locked for lookup, insert and unlink;
/// connecting, running and closing all happen under the per-slot lock so
/// that targets never block each other.
pub struct SessionCache<C: MeasurementClient> {
    client: C,
    sessions: DashMap<String, Slot<C::Session>>,
}

impl<C: MeasurementClient> SessionCache<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            sessions: DashMap::new(),
        }
    }

    /// Returns the cached session for `target`, establishing one first if
    /// none exists. Establishment runs under the slot lock, which
    /// serializes creation per target: a concurrent caller for the same
    /// target blocks until the first caller's attempt resolves and then
    /// observes its result. On failure no entry remains in the registry.
    pub async fn acquire(&self, target: &str) -> Result<ActiveSession<C::Session>> {
        loop {
            let slot = {
                let entry = self
                    .sessions
                    .entry(target.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(SlotState::Vacant)));
                entry.clone()
            };

            let mut guard = slot.clone().lock_owned().await;
            match &*guard {
                SlotState::Ready(_) => {
                    debug!("reusing cached session for {}", target);
                    return Ok(ActiveSession {
                        target: target.to_string(),
                        slot,
                        guard,
                    });
                }
                SlotState::Evicted => {
                    // Unlinked while we waited for the lock; start over
                    // with a fresh registry entry.
                    drop(guard);
                    continue;
                }
                SlotState::Vacant => match self.client.connect(target).await {
                    Ok(session) => {
                        info!("established measurement session for {}", target);
                        *guard = SlotState::Ready(session);
                        return Ok(ActiveSession {
                            target: target.to_string(),
                            slot,
                            guard,
                        });
                    }
                    Err(e) => {
                        // Tombstone and unlink before releasing the lock
                        // so no waiter can find this slot via the map.
                        *guard = SlotState::Evicted;
                        self.unlink(target, &slot);
                        return Err(e);
                    }
                },
            }
        }
    }

    /// Discards the session held by `active` and removes its registry
    /// entry. Used when a run reports the connection itself as unusable;
    /// the next probe for the target starts from a clean slate.
    pub async fn evict_active(&self, mut active: ActiveSession<C::Session>) {
        if let SlotState::Ready(mut session) =
            std::mem::replace(&mut *active.guard, SlotState::Evicted)
        {
            session.close().await;
        }
        self.unlink(&active.target, &active.slot);
        info!("evicted broken session for {}", active.target);
    }

    /// Stops and removes the session cached for `target`, if any.
    /// Evicting an unknown target is a no-op.
    pub async fn evict(&self, target: &str) {
        let Some((_, slot)) = self.sessions.remove(target) else {
            return;
        };
        let mut guard = slot.lock().await;
        if let SlotState::Ready(mut session) = std::mem::replace(&mut *guard, SlotState::Evicted) {
            session.close().await;
            info!("evicted session for {}", target);
        }
    }

    /// Evicts every cached session. Called once, at shutdown, after new
    /// request admission has stopped. An acquire racing with the drain
    /// either sees its entry before removal or creates a fresh session it
    /// is itself responsible for.
    pub async fn drain_all(&self) {
        let targets: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        if !targets.is_empty() {
            info!("draining {} cached sessions", targets.len());
        }
        for target in targets {
            self.evict(&target).await;
        }
    }

    /// Number of targets currently holding a registry entry.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn unlink(&self, target: &str, slot: &Slot<C::Session>) {
        self.sessions
            .remove_if(target, |_, current| Arc::ptr_eq(current, slot));
    }
}
