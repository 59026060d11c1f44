//! Per-Plug Evaluation State
//!
//! Every output plug has, per context, one of three states:
//!
//! - `Dirty`: nothing is known. Either never evaluated, or invalidated by
//!   dirty propagation.
//! - `Hashed`: the content hash is known but no value has been produced for
//!   it yet (a downstream hash was requested, or the last compute failed).
//! - `Clean`: the hash is known and a value for it was produced.
//!
//! Dirty propagation drops every context's state for a plug in one step.
//! Each plug keeps at most `limit` contexts; pulling a plug at ever new
//! frames forgets the contexts it touched least recently, which only costs
//! a rehash when one of them is pulled again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::graph::PlugId;
use crate::hash::Hash;

/// Evaluation state of one plug in one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlugState {
    /// The hash and value are unknown.
    Dirty,
    /// The hash is known; the value has not been produced.
    Hashed(Hash),
    /// The hash is known and the value was produced.
    Clean(Hash),
}

impl PlugState {
    /// The known hash, if any.
    pub fn hash(&self) -> Option<Hash> {
        match self {
            Self::Dirty => None,
            Self::Hashed(h) | Self::Clean(h) => Some(*h),
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean(_))
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    state: PlugState,
    last_used: u64,
}

/// Concurrent table of plug states, keyed by plug then context hash.
#[derive(Debug)]
pub(crate) struct StateTable {
    states: DashMap<PlugId, HashMap<Hash, Slot>>,
    limit: usize,
    clock: AtomicU64,
}

impl StateTable {
    /// A table keeping at most `limit` contexts per plug.
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            states: DashMap::new(),
            limit: limit.max(1),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn get(&self, plug: PlugId, context: Hash) -> PlugState {
        self.states
            .get(&plug)
            .and_then(|per_context| per_context.get(&context).map(|slot| slot.state))
            .unwrap_or(PlugState::Dirty)
    }

    /// Record a freshly computed hash. A `Clean` entry for the same hash is kept.
    pub(crate) fn record_hash(&self, plug: PlugId, context: Hash, hash: Hash) {
        self.update(plug, context, |state| {
            if state != PlugState::Clean(hash) {
                PlugState::Hashed(hash)
            } else {
                state
            }
        });
    }

    pub(crate) fn mark_clean(&self, plug: PlugId, context: Hash, hash: Hash) {
        self.update(plug, context, |_| PlugState::Clean(hash));
    }

    fn update(&self, plug: PlugId, context: Hash, next: impl FnOnce(PlugState) -> PlugState) {
        let now = self.tick();
        let mut per_context = self.states.entry(plug).or_default();
        let slot = per_context.entry(context).or_insert(Slot {
            state: PlugState::Dirty,
            last_used: now,
        });
        slot.state = next(slot.state);
        slot.last_used = now;
        if per_context.len() > self.limit {
            evict_oldest(&mut per_context, self.limit);
        }
    }

    /// Forget everything about `plug`. Returns whether anything was known.
    pub(crate) fn invalidate(&self, plug: PlugId) -> bool {
        self.states.remove(&plug).is_some()
    }

    /// Number of contexts with known state for `plug`.
    #[cfg(test)]
    pub(crate) fn contexts(&self, plug: PlugId) -> usize {
        self.states.get(&plug).map_or(0, |per_context| per_context.len())
    }
}

/// Drop the least recently used contexts down to a low-water mark below
/// `limit`.
fn evict_oldest(per_context: &mut HashMap<Hash, Slot>, limit: usize) {
    let keep = limit - limit / 16;
    let mut stamps: Vec<u64> = per_context.values().map(|slot| slot.last_used).collect();
    let drop = stamps.len() - keep;
    let (_, cutoff, _) = stamps.select_nth_unstable(drop - 1);
    let cutoff = *cutoff;
    per_context.retain(|_, slot| slot.last_used > cutoff);
}
