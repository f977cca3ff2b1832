//! Request coalescing for documentation generation.
//!
//! Each key maps to a write-once slot. The first request for a key spawns the
//! generation as its own task and registers a watch receiver for it; every
//! later request, concurrent or not, subscribes to that same slot and observes
//! the same outcome.
//!
//! ```text
//! DocRequest A ─┐
//!               │                       spawned task
//! DocRequest B ─┼──► Coalescer ───────► generate() (once)
//!               │        │                   │
//! DocRequest C ─┘        ▼                   ▼
//!                  [A, B, C wait on   watch::Sender<Some(outcome)>
//!                   the same slot] ◄─────────┘
//! ```
//!
//! Failed outcomes stay in the slot; a repeated request observes the cached
//! failure instead of re-running the extractor. Callers that want a retry
//! must evict the key explicitly.

use crate::error::GenerationFailure;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

/// Result of one generation, shared by every waiter.
pub type Outcome<T> = Result<T, GenerationFailure>;

type Slot<T> = watch::Receiver<Option<Outcome<T>>>;

/// Counters for monitoring coalescing effectiveness.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Total requests received.
    pub total_requests: u64,
    /// Requests that joined an existing slot.
    pub coalesced_requests: u64,
    /// Requests that spawned a generation.
    pub new_requests: u64,
}

impl CoalescerStats {
    /// Share of requests served from an existing slot (0.0 to 1.0).
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / self.total_requests as f64
        }
    }
}

/// Get-or-create table of in-flight and completed generations.
pub struct Coalescer<K, T> {
    slots: Mutex<HashMap<K, Slot<T>>>,
    stats: Mutex<CoalescerStats>,
}

impl<K, T> Default for Coalescer<K, T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            stats: Mutex::new(CoalescerStats::default()),
        }
    }
}

impl<K, T> Coalescer<K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the slot for `key`, spawning `generate` if there is none.
    ///
    /// The lookup and the insert happen under one lock with no suspension in
    /// between, so the first caller wins and `generate` runs at most once per
    /// key. The spawned task outlives the caller.
    pub fn get_or_spawn<F, Fut>(&self, key: K, generate: F) -> Pending<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
    {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.total_requests += 1;

        if let Some(slot) = slots.get(&key) {
            stats.coalesced_requests += 1;
            debug!(key = ?key, coalesced = stats.coalesced_requests, "Joining existing generation");
            return Pending {
                slot: slot.clone(),
                created: false,
            };
        }

        let (tx, rx) = watch::channel(None);
        slots.insert(key.clone(), rx.clone());
        stats.new_requests += 1;
        debug!(key = ?key, slots = slots.len(), "Starting generation");

        let generation = generate();
        tokio::spawn(async move {
            let outcome = generation.await;
            tx.send_replace(Some(outcome));
        });

        Pending {
            slot: rx,
            created: true,
        }
    }

    /// Completed outcome for `key`, if any.
    pub fn peek(&self, key: &K) -> Option<Outcome<T>> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(key).and_then(|slot| slot.borrow().clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.contains_key(key)
    }

    /// Drop every slot whose key matches `pred`. Generations already running
    /// keep running; their waiters still receive the outcome.
    pub fn evict_where(&self, pred: impl Fn(&K) -> bool) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let before = slots.len();
        slots.retain(|key, _| !pred(key));
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CoalescerStats {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            total_requests = stats.total_requests,
            coalesced = stats.coalesced_requests,
            new_requests = stats.new_requests,
            slots = self.len(),
            coalescing_ratio = format!("{:.1}%", stats.coalescing_ratio() * 100.0),
            "Generation cache statistics"
        );
    }
}

/// Handle on one slot of a [`Coalescer`].
pub struct Pending<T> {
    slot: Slot<T>,
    created: bool,
}

impl<T: Clone> Pending<T> {
    /// Whether this request spawned the generation.
    pub fn created(&self) -> bool {
        self.created
    }

    /// Wait for the shared outcome.
    pub async fn wait(mut self) -> Outcome<T> {
        match self.slot.wait_for(Option::is_some).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or_else(|| Err(GenerationFailure::new("generation produced no result"))),
            Err(_) => Err(GenerationFailure::new(
                "generation task ended without a result",
            )),
        }
    }
}
