use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

use crate::foundation::core::{InstanceId, TaskId};
use crate::generator::completion::CancellationToken;
use crate::host::state::OpKind;

/// Handle of a scheduled continuation.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer {}", self.0)
    }
}

/// Who a timer belongs to and when it is due.
#[derive(Clone, Debug)]
pub(crate) struct TimerEntry {
    pub(crate) instance: InstanceId,
    pub(crate) phase: OpKind,
    pub(crate) task: Option<TaskId>,
    pub(crate) token: CancellationToken,
    pub(crate) due_ms: u64,
    pub(crate) period_ms: Option<u64>,
}

/// Deterministic virtual-time timer queue.
///
/// Determinism rule: ready timers fire in `(due, TimerId)` order. Cleared timers are removed from
/// the map and their heap entries are skipped lazily; the heap is rebuilt once dead entries
/// outnumber live ones.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    next_id: u64,
    queue: BinaryHeap<Reverse<(u64, u64)>>,
    timers: HashMap<TimerId, TimerEntry>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn schedule(&mut self, mut entry: TimerEntry) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        if let Some(p) = entry.period_ms.as_mut() {
            *p = (*p).max(1);
        }
        self.queue.push(Reverse((entry.due_ms, id.0)));
        self.timers.insert(id, entry);
        id
    }

    /// Remove a timer owned by `instance`. Other instances' timers are left alone.
    pub(crate) fn clear(&mut self, instance: InstanceId, id: TimerId) -> bool {
        match self.timers.get(&id) {
            Some(e) if e.instance == instance => self.remove(id).is_some(),
            _ => false,
        }
    }

    pub(crate) fn remove(&mut self, id: TimerId) -> Option<TimerEntry> {
        let entry = self.timers.remove(&id);
        self.compact();
        entry
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }

    pub(crate) fn count_for(&self, instance: InstanceId) -> usize {
        self.timers.values().filter(|e| e.instance == instance).count()
    }

    /// Due time of the earliest live timer.
    pub(crate) fn next_due(&mut self) -> Option<u64> {
        self.skip_dead();
        self.queue.peek().map(|Reverse((due, _))| *due)
    }

    /// Pop the earliest timer if it is due at or before `limit`.
    ///
    /// Intervals are re-armed one period later; one-shot timers are removed. The returned entry
    /// carries the due time it fired at.
    pub(crate) fn pop_due(&mut self, limit: u64) -> Option<(TimerId, TimerEntry)> {
        self.skip_dead();
        let Reverse((due, raw)) = *self.queue.peek()?;
        if due > limit {
            return None;
        }
        self.queue.pop();
        let id = TimerId(raw);
        let period = self.timers.get(&id)?.period_ms;
        let fired = match period {
            Some(period) => {
                let e = self.timers.get_mut(&id)?;
                let fired = e.clone();
                e.due_ms = due.saturating_add(period);
                self.queue.push(Reverse((e.due_ms, raw)));
                fired
            }
            None => self.timers.remove(&id)?,
        };
        Some((id, fired))
    }

    /// Live timers of `instance` not created by `destroy`, in firing order.
    pub(crate) fn pending_for(&self, instance: InstanceId) -> Vec<(TimerId, TimerEntry)> {
        let mut out: Vec<_> = self
            .timers
            .iter()
            .filter(|(_, e)| e.instance == instance && e.phase != OpKind::Destroy)
            .map(|(id, e)| (*id, e.clone()))
            .collect();
        out.sort_by_key(|(id, e)| (e.due_ms, *id));
        out
    }

    /// Drop every timer of `instance`; returns how many were live.
    pub(crate) fn purge_instance(&mut self, instance: InstanceId) -> usize {
        let before = self.timers.len();
        self.timers.retain(|_, e| e.instance != instance);
        self.compact();
        before - self.timers.len()
    }

    #[cfg(test)]
    pub(crate) fn heap_len(&self) -> usize {
        self.queue.len()
    }

    fn compact(&mut self) {
        const SLACK: usize = 32;
        let dead = self.queue.len().saturating_sub(self.timers.len());
        if dead <= self.timers.len().max(SLACK) {
            return;
        }
        self.queue = self
            .timers
            .iter()
            .map(|(id, e)| Reverse((e.due_ms, id.0)))
            .collect();
    }

    fn skip_dead(&mut self) {
        while let Some(Reverse((due, raw))) = self.queue.peek().copied() {
            match self.timers.get(&TimerId(raw)) {
                Some(e) if e.due_ms == due => return,
                _ => {
                    self.queue.pop();
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/host/scheduler.rs"]
mod tests;
