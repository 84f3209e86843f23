//! # Deferred Action Scheduler
//!
//! One scheduler per region. Every mutation of world state that a packet
//! handler wants to make is queued here as an [`Action`] bound to an actor
//! and executed later by the region's ticking task.
//!
//! # Guarantees
//! - Actions of one actor run in due order; actions with equal due ticks run
//!   in enqueue order.
//! - Each action runs at most once: it is removed from its queue before it
//!   runs.
//! - An action whose actor was invalidated is dropped without running.
//! - An action whose actor moved to another region is forwarded to that
//!   region's scheduler.
//! - A panicking action is logged and does not stop the scheduler.

use parking_lot::Mutex;
use realmd_core::{ActorId, RegionId};
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::actor::Actor;
use crate::region::Region;
use crate::world::World;

/// Everything an action may touch
pub struct ActionContext<'a> {
    pub world: &'a World,
    pub region: &'a Region,
    pub actor: &'a Arc<Actor>,
    /// Region tick the action runs at
    pub now: u64,
}

/// A deferred unit of work bound to one actor
pub type Action = Box<dyn FnOnce(&ActionContext<'_>) + Send + 'static>;

struct Pending {
    due: u64,
    seq: u64,
    actor: Arc<Actor>,
    action: Action,
}

/// Counters exposed for diagnostics
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub executed: AtomicU64,
    pub discarded: AtomicU64,
    pub forwarded: AtomicU64,
    pub panicked: AtomicU64,
}

/// Snapshot of [`SchedulerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerCounts {
    pub executed: u64,
    pub discarded: u64,
    pub forwarded: u64,
    pub panicked: u64,
}

/// Per-actor timed action queues of one region
///
/// # Thread Safety
/// `enqueue` may be called from any task. `run_due` is meant to be driven by
/// exactly one task per region; the queue lock is never held while an action
/// runs, so actions may enqueue further actions.
pub struct Scheduler {
    region: RegionId,
    epoch: Instant,
    next_seq: AtomicU64,
    queues: Mutex<HashMap<ActorId, VecDeque<Pending>>>,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new(region: RegionId) -> Self {
        Self {
            region,
            epoch: Instant::now(),
            next_seq: AtomicU64::new(0),
            queues: Mutex::new(HashMap::new()),
            stats: SchedulerStats::default(),
        }
    }

    /// Milliseconds since the scheduler started; the region clock
    pub fn now(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn region(&self) -> RegionId {
        self.region
    }

    /// Queue `action` for `actor` to run after `delay_ms`
    pub fn enqueue(&self, actor: Arc<Actor>, delay_ms: u64, action: Action) {
        let due = self.now().saturating_add(delay_ms);
        self.enqueue_at(actor, due, action);
    }

    /// Queue `action` for `actor` to run at region tick `due`
    pub fn enqueue_at(&self, actor: Arc<Actor>, due: u64, action: Action) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = actor.id;
        let mut queues = self.queues.lock();
        let queue = queues.entry(id).or_default();
        let at = queue.partition_point(|p| p.due <= due);
        queue.insert(at, Pending { due, seq, actor, action });
        trace!("Queued action {} for {} at tick {} in region {}", seq, id, due, self.region.get());
    }

    /// Number of actions waiting
    pub fn pending(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }

    pub fn pending_for(&self, actor: ActorId) -> usize {
        self.queues.lock().get(&actor).map_or(0, VecDeque::len)
    }

    /// Drop every queued action of `actor`
    pub fn forget(&self, actor: ActorId) -> usize {
        let dropped = self.queues.lock().remove(&actor).map_or(0, |q| q.len());
        if dropped > 0 {
            self.stats.discarded.fetch_add(dropped as u64, Ordering::Relaxed);
        }
        dropped
    }

    pub fn counts(&self) -> SchedulerCounts {
        SchedulerCounts {
            executed: self.stats.executed.load(Ordering::Relaxed),
            discarded: self.stats.discarded.load(Ordering::Relaxed),
            forwarded: self.stats.forwarded.load(Ordering::Relaxed),
            panicked: self.stats.panicked.load(Ordering::Relaxed),
        }
    }

    fn take_due(&self, now: u64) -> Vec<Pending> {
        let mut queues = self.queues.lock();
        let mut due = Vec::new();
        queues.retain(|_, queue| {
            while queue.front().is_some_and(|p| p.due <= now) {
                if let Some(pending) = queue.pop_front() {
                    due.push(pending);
                }
            }
            !queue.is_empty()
        });
        due.sort_by_key(|p| (p.due, p.seq));
        due
    }

    /// Run every action due at `now`
    ///
    /// # Returns
    /// Number of actions that actually ran.
    pub fn run_due(&self, world: &World, region: &Region, now: u64) -> usize {
        let mut ran = 0;
        for pending in self.take_due(now) {
            let Pending { seq, actor, action, due } = pending;
            if !actor.is_valid() {
                trace!("Discarding action {} of stale {}", seq, actor.id);
                self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let home = actor.region();
            if home != self.region {
                match world.region(home) {
                    Some(target) => {
                        debug!("Forwarding action {} of {} to region {}", seq, actor.id, home.get());
                        target.scheduler.enqueue_at(actor, due.min(target.scheduler.now()), action);
                        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                    }
                    None => {
                        warn!("Dropping action {} of {}: unknown region {}", seq, actor.id, home.get());
                        self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                    }
                }
                continue;
            }

            let ctx = ActionContext {
                world,
                region,
                actor: &actor,
                now,
            };
            match catch_unwind(AssertUnwindSafe(|| action(&ctx))) {
                Ok(()) => {
                    ran += 1;
                    self.stats.executed.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    error!("Action {} of {} panicked in region {}", seq, actor.id, self.region.get());
                    self.stats.panicked.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        ran
    }
}
