//! Bounded multi-tier priority queue.
//!
//! Items are served highest tier first and FIFO within a tier. With an aging
//! policy, an item's effective tier rises by one for every `promote_after` it
//! has waited, so low-priority work cannot starve under sustained load.

use crate::error::{OrchestrationError, Result};
use crate::request::Priority;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

const TIERS: usize = Priority::DESCENDING.len();

/// Starvation guard for low tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgingPolicy {
    /// Promote a waiting item one tier per interval. `None` keeps strict priority.
    pub promote_after: Option<Duration>,
}

impl AgingPolicy {
    /// Strict priority, no promotion.
    #[must_use]
    pub const fn strict() -> Self {
        Self { promote_after: None }
    }

    /// Promotes one tier per `interval` waited.
    #[must_use]
    pub const fn promote_after(interval: Duration) -> Self {
        Self { promote_after: Some(interval) }
    }

    fn effective_rank(&self, rank: usize, waited: Duration) -> usize {
        let Some(interval) = self.promote_after else {
            return rank;
        };
        if interval.is_zero() {
            return rank;
        }
        let steps = usize::try_from(waited.as_nanos() / interval.as_nanos()).unwrap_or(usize::MAX);
        rank.saturating_add(steps).min(TIERS - 1)
    }
}

/// Items waiting per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    /// Urgent tier depth.
    pub urgent: usize,
    /// High tier depth.
    pub high: usize,
    /// Normal tier depth.
    pub normal: usize,
    /// Low tier depth.
    pub low: usize,
}

impl QueueDepths {
    /// Sum over all tiers.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.urgent + self.high + self.normal + self.low
    }
}

#[derive(Debug)]
struct Queued<T> {
    item: T,
    enqueued_at: Instant,
}

/// Bounded priority queue shared by producers and workers.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    tiers: Mutex<[VecDeque<Queued<T>>; TIERS]>,
    capacity: usize,
    aging: AgingPolicy,
    notify: Notify,
}

impl<T: Send> PriorityQueue<T> {
    /// Creates an empty queue holding at most `capacity` items.
    #[must_use]
    pub fn new(capacity: usize, aging: AgingPolicy) -> Self {
        Self {
            tiers: Mutex::new(std::array::from_fn(|_| VecDeque::new())),
            capacity,
            aging,
            notify: Notify::new(),
        }
    }

    /// Maximum number of queued items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues an item.
    ///
    /// # Errors
    /// Returns `OrchestrationError::QueueFull` when the queue is at capacity.
    pub async fn push(&self, item: T, priority: Priority) -> Result<()> {
        {
            let mut tiers = self.tiers.lock().await;
            let len: usize = tiers.iter().map(VecDeque::len).sum();
            if len >= self.capacity {
                return Err(OrchestrationError::QueueFull { capacity: self.capacity });
            }
            tiers[priority.rank()].push_back(Queued { item, enqueued_at: Instant::now() });
            debug!(priority = %priority, depth = len + 1, "Enqueued item");
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Removes the next item, if any.
    pub async fn pop(&self) -> Option<T> {
        let mut tiers = self.tiers.lock().await;
        let now = Instant::now();

        // The front of each tier is its oldest item, so it carries the tier's
        // highest effective rank. Ties go to the higher real tier.
        let rank = (0..TIERS)
            .rev()
            .filter_map(|rank| {
                tiers[rank].front().map(|queued| {
                    let waited = now.saturating_duration_since(queued.enqueued_at);
                    (self.aging.effective_rank(rank, waited), rank)
                })
            })
            .max()
            .map(|(_, rank)| rank)?;

        tiers[rank].pop_front().map(|queued| queued.item)
    }

    /// Waits up to `timeout` for an item.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.pop().await {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Number of queued items.
    pub async fn len(&self) -> usize {
        self.tiers.lock().await.iter().map(VecDeque::len).sum()
    }

    /// Returns `true` if nothing is queued.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Items waiting per tier.
    pub async fn depths(&self) -> QueueDepths {
        let tiers = self.tiers.lock().await;
        QueueDepths {
            urgent: tiers[Priority::Urgent.rank()].len(),
            high: tiers[Priority::High.rank()].len(),
            normal: tiers[Priority::Normal.rank()].len(),
            low: tiers[Priority::Low.rank()].len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_strict_priority_order() {
        let queue = PriorityQueue::new(10, AgingPolicy::strict());
        queue.push("low", Priority::Low).await.unwrap();
        queue.push("urgent", Priority::Urgent).await.unwrap();
        queue.push("normal", Priority::Normal).await.unwrap();
        queue.push("high", Priority::High).await.unwrap();

        let mut order = Vec::new();
        while let Some(item) = queue.pop().await {
            order.push(item);
        }
        assert_eq!(order, vec!["urgent", "high", "normal", "low"]);
    }

    #[tokio::test]
    async fn test_fifo_within_tier() {
        let queue = PriorityQueue::new(10, AgingPolicy::strict());
        for i in 0..5 {
            queue.push(i, Priority::Normal).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(queue.pop().await, Some(i));
        }
    }

    #[tokio::test]
    async fn test_capacity_enforced() {
        let queue = PriorityQueue::new(2, AgingPolicy::strict());
        queue.push(1, Priority::Low).await.unwrap();
        queue.push(2, Priority::Low).await.unwrap();
        let err = queue.push(3, Priority::Urgent).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::QueueFull { capacity: 2 }));
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_depths() {
        let queue = PriorityQueue::new(10, AgingPolicy::strict());
        queue.push(1, Priority::High).await.unwrap();
        queue.push(2, Priority::High).await.unwrap();
        queue.push(3, Priority::Low).await.unwrap();
        let depths = queue.depths().await;
        assert_eq!(depths.high, 2);
        assert_eq!(depths.low, 1);
        assert_eq!(depths.total(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aging_promotes_waiting_items() {
        let queue = PriorityQueue::new(10, AgingPolicy::promote_after(Duration::from_secs(10)));
        queue.push("old-low", Priority::Low).await.unwrap();
        tokio::time::advance(Duration::from_secs(25)).await;
        queue.push("fresh-high", Priority::High).await.unwrap();

        // old-low has climbed two tiers and ties with fresh-high; the real tier wins.
        assert_eq!(queue.pop().await, Some("fresh-high"));

        queue.push("fresh-normal", Priority::Normal).await.unwrap();
        assert_eq!(queue.pop().await, Some("old-low"));
        assert_eq!(queue.pop().await, Some("fresh-normal"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_never_promotes() {
        let queue = PriorityQueue::new(10, AgingPolicy::strict());
        queue.push("old-low", Priority::Low).await.unwrap();
        tokio::time::advance(Duration::from_secs(3600)).await;
        queue.push("fresh-normal", Priority::Normal).await.unwrap();
        assert_eq!(queue.pop().await, Some("fresh-normal"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_timeout() {
        let queue = std::sync::Arc::new(PriorityQueue::new(10, AgingPolicy::strict()));
        assert_eq!(queue.pop_timeout(Duration::from_millis(50)).await, None::<u32>);

        let producer = std::sync::Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push(7, Priority::Normal).await.unwrap();
        });
        assert_eq!(queue.pop_timeout(Duration::from_secs(1)).await, Some(7));
    }
}
