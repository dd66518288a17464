//! Expectation store.
//!
//! Live expectations are held in priority order behind a copy-on-write
//! vector: readers take an `Arc` snapshot without blocking writers beyond
//! the swap, and writers rebuild the vector under a single lock. Bounded
//! use counts decrement atomically so an expectation configured for `k`
//! uses is dispatched at most `k` times across concurrent requests.

use crate::error::MockError;
use crate::matcher::{CompiledRequestMatcher, RequestMatcherDef};
use crate::model::{Action, ExpectationDef, HttpRequest};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// One live expectation.
pub struct Expectation {
    pub id: String,
    pub priority_index: u64,
    pub def: ExpectationDef,
    pub matcher: CompiledRequestMatcher,
    pub action: Action,
    /// Remaining uses, -1 meaning unlimited.
    remaining: AtomicI64,
}

impl Expectation {
    fn build(def: ExpectationDef, id: String, priority_index: u64) -> Result<Self, MockError> {
        let matcher = CompiledRequestMatcher::compile(&def.http_request)
            .map_err(MockError::Configuration)?;
        let action = def.action().map_err(MockError::Configuration)?;
        let budget = def.times.clone().unwrap_or_default().as_budget();
        Ok(Self {
            id,
            priority_index,
            def,
            matcher,
            action,
            remaining: AtomicI64::new(budget),
        })
    }

    /// Claim one use. Fails once a bounded budget is exhausted.
    fn acquire_use(&self) -> AcquireOutcome {
        loop {
            let current = self.remaining.load(Ordering::Acquire);
            if current < 0 {
                return AcquireOutcome::Unlimited;
            }
            if current == 0 {
                return AcquireOutcome::Exhausted;
            }
            if self
                .remaining
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return if current == 1 {
                    AcquireOutcome::LastUse
                } else {
                    AcquireOutcome::Acquired
                };
            }
        }
    }

    pub fn remaining_uses(&self) -> i64 {
        self.remaining.load(Ordering::Acquire)
    }
}

#[derive(Debug, PartialEq)]
enum AcquireOutcome {
    Unlimited,
    Acquired,
    /// Acquired, and the budget is now zero
    LastUse,
    Exhausted,
}

/// Consistent point-in-time view used by one request's matching pass.
#[derive(Clone)]
pub struct Snapshot {
    items: Arc<Vec<Arc<Expectation>>>,
    generation: u64,
}

impl Snapshot {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Expectation>> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub struct ExpectationStore {
    live: RwLock<Arc<Vec<Arc<Expectation>>>>,
    next_priority: AtomicU64,
    /// Bumped on every reset; retirement through a stale snapshot is a no-op.
    generation: AtomicU64,
    max_expectations: usize,
}

impl ExpectationStore {
    pub fn new(max_expectations: usize) -> Self {
        Self {
            live: RwLock::new(Arc::new(Vec::new())),
            next_priority: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            max_expectations,
        }
    }

    /// Register an expectation, compiling its matcher and resolving its
    /// action. An id matching a live expectation replaces it in place,
    /// keeping its priority index.
    pub fn add(&self, def: ExpectationDef) -> Result<Arc<Expectation>, MockError> {
        let mut live = self.live.write();

        if let Some(id) = def.id.clone() {
            if let Some(position) = live.iter().position(|e| e.id == id) {
                let priority_index = live[position].priority_index;
                let updated = Arc::new(Expectation::build(def, id, priority_index)?);
                let mut next = live.as_ref().clone();
                next[position] = Arc::clone(&updated);
                *live = Arc::new(next);
                debug!(id = %updated.id, "expectation updated in place");
                return Ok(updated);
            }
        }

        if live.len() >= self.max_expectations {
            return Err(MockError::Configuration(format!(
                "expectation limit of {} reached",
                self.max_expectations
            )));
        }

        let id = def
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let priority_index = self.next_priority.fetch_add(1, Ordering::Relaxed);
        let created = Arc::new(Expectation::build(def, id, priority_index)?);
        let mut next = live.as_ref().clone();
        next.push(Arc::clone(&created));
        *live = Arc::new(next);
        debug!(id = %created.id, priority = created.priority_index, "expectation added");
        Ok(created)
    }

    /// Remove every expectation whose matcher definition equals the given
    /// one. Returns how many were removed.
    pub fn remove_matching(&self, matcher: &RequestMatcherDef) -> usize {
        let mut live = self.live.write();
        let before = live.len();
        let next: Vec<Arc<Expectation>> = live
            .iter()
            .filter(|e| e.def.http_request != *matcher)
            .cloned()
            .collect();
        let removed = before - next.len();
        if removed > 0 {
            *live = Arc::new(next);
        }
        removed
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            items: Arc::clone(&self.live.read()),
            generation: self.generation.load(Ordering::Acquire),
        }
    }

    /// All live expectations in priority order.
    pub fn list(&self) -> Vec<Arc<Expectation>> {
        self.live.read().iter().cloned().collect()
    }

    /// Select the first expectation in the snapshot that matches the request
    /// and still has budget, consuming one use. Exhausted expectations are
    /// retired from the live set unless a reset intervened.
    pub fn select(
        &self,
        snapshot: &Snapshot,
        request: &HttpRequest,
    ) -> Option<(Arc<Expectation>, HashMap<String, String>)> {
        for expectation in snapshot.iter() {
            let Some(params) = expectation.matcher.matches_with_params(request) else {
                continue;
            };
            match expectation.acquire_use() {
                AcquireOutcome::Unlimited | AcquireOutcome::Acquired => {
                    return Some((Arc::clone(expectation), params));
                }
                AcquireOutcome::LastUse => {
                    self.retire(snapshot.generation, &expectation.id);
                    return Some((Arc::clone(expectation), params));
                }
                AcquireOutcome::Exhausted => continue,
            }
        }
        None
    }

    /// Remove a retired expectation from the live set. No-op when the store
    /// has been reset since the snapshot was taken.
    fn retire(&self, snapshot_generation: u64, id: &str) {
        let mut live = self.live.write();
        if self.generation.load(Ordering::Acquire) != snapshot_generation {
            return;
        }
        if live.iter().any(|e| e.id == id) {
            let next: Vec<Arc<Expectation>> =
                live.iter().filter(|e| e.id != id).cloned().collect();
            *live = Arc::new(next);
            debug!(id, "expectation retired, uses exhausted");
        }
    }

    /// Atomic swap to empty; in-flight snapshots stay readable but can no
    /// longer mutate the store.
    pub fn reset(&self) {
        let mut live = self.live.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        *live = Arc::new(Vec::new());
    }

    pub fn len(&self) -> usize {
        self.live.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.read().is_empty()
    }
}
