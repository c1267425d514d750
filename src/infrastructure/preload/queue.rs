//! Priority-ordered preload queue with one entry per key.

use std::cmp::Reverse;
use std::collections::HashMap;

use priority_queue::PriorityQueue;

use crate::domain::entities::{CacheKey, PreloadPriority, PreloadTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Rank {
    priority: PreloadPriority,
    order: Reverse<u64>,
}

/// Outcome of `PreloadQueue::push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// A new task was queued.
    New,
    /// An existing task moved to a higher priority.
    Upgraded,
    /// The key was already queued at an equal or higher priority.
    Unchanged,
}

/// Highest priority first; equal priorities in enqueue order.
#[derive(Debug, Default)]
pub struct PreloadQueue {
    ranks: PriorityQueue<CacheKey, Rank>,
    tasks: HashMap<CacheKey, PreloadTask>,
    next_seq: u64,
}

impl PreloadQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a task, or upgrades the queued task for the same key.
    ///
    /// An upgrade keeps the original enqueue order among its new peers.
    pub fn push(&mut self, mut task: PreloadTask) -> Enqueued {
        if let Some(rank) = self.ranks.get_priority(&task.key).copied() {
            if task.priority <= rank.priority {
                return Enqueued::Unchanged;
            }
            self.ranks.change_priority(
                &task.key,
                Rank {
                    priority: task.priority,
                    order: rank.order,
                },
            );
            if let Some(queued) = self.tasks.get_mut(&task.key) {
                queued.priority = task.priority;
            }
            return Enqueued::Upgraded;
        }

        task.seq = self.next_seq;
        self.next_seq += 1;
        self.ranks.push(
            task.key.clone(),
            Rank {
                priority: task.priority,
                order: Reverse(task.seq),
            },
        );
        self.tasks.insert(task.key.clone(), task);
        Enqueued::New
    }

    /// Takes the most urgent task.
    pub fn pop(&mut self) -> Option<PreloadTask> {
        let (key, _) = self.ranks.pop()?;
        self.tasks.remove(&key)
    }

    /// Removes a queued task.
    pub fn remove(&mut self, key: &CacheKey) -> Option<PreloadTask> {
        self.ranks.remove(key);
        self.tasks.remove(key)
    }

    /// Drops every queued task.
    pub fn clear(&mut self) {
        self.ranks.clear();
        self.tasks.clear();
    }

    /// Returns true if the key is queued.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.tasks.contains_key(key)
    }

    /// Current priority of a queued key.
    #[must_use]
    pub fn priority_of(&self, key: &CacheKey) -> Option<PreloadPriority> {
        self.ranks.get_priority(key).map(|rank| rank.priority)
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
