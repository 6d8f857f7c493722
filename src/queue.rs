//! Bounded admission queue.
//!
//! One lock guards two bounds: `max_concurrent` requests run at once, and at
//! most `max_queue_size` more may wait. Admission never blocks — a request is
//! admitted, parked with a 1-based position, or rejected, and the caller
//! decides what to do. Waiters are strictly FIFO.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::debug;

/// Assumed seconds per queued request when estimating wait time.
const ESTIMATED_SECONDS_PER_SLOT: u64 = 3;

/// Lifecycle of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Queued,
    Processing,
    Completed,
    Cancelled,
}

/// Outcome of an admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A slot was free; the caller runs the request now.
    Processing,
    /// Parked in the waiting list.
    Pending {
        queue_position: usize,
        estimated_wait_seconds: u64,
    },
    /// Both bounds exhausted.
    Rejected,
}

/// Live snapshot of one request, served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSnapshot {
    pub request_id: String,
    pub status: QueueStatus,
    pub queued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

/// Queue occupancy counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueStats {
    pub active_requests: usize,
    pub queued_requests: usize,
    pub max_concurrency: usize,
    pub max_queue_size: usize,
}

#[derive(Debug)]
struct InFlight {
    queued_at: DateTime<Utc>,
    started_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Waiter {
    request_id: String,
    queued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    active: HashMap<String, InFlight>,
    waiting: VecDeque<Waiter>,
}

/// Bounded admission queue; the single serialising primitive of the gateway.
#[derive(Debug)]
pub struct TranslationQueue {
    max_concurrent: usize,
    max_queue_size: usize,
    inner: Mutex<Inner>,
}

impl TranslationQueue {
    pub fn new(max_concurrent: usize, max_queue_size: usize) -> Self {
        Self {
            max_concurrent,
            max_queue_size,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Atomically admit, park or reject `request_id`.
    pub fn acquire_slot(&self, request_id: &str) -> Admission {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if inner.active.len() < self.max_concurrent {
            let now = Utc::now();
            inner.active.insert(
                request_id.to_owned(),
                InFlight {
                    queued_at: now,
                    started_at: now,
                },
            );
            debug!(
                request_id,
                active = inner.active.len(),
                "request admitted immediately"
            );
            return Admission::Processing;
        }

        if inner.waiting.len() < self.max_queue_size {
            inner.waiting.push_back(Waiter {
                request_id: request_id.to_owned(),
                queued_at: Utc::now(),
            });
            let queue_position = inner.waiting.len();
            debug!(request_id, queue_position, "request parked");
            return Admission::Pending {
                queue_position,
                estimated_wait_seconds: queue_position as u64 * ESTIMATED_SECONDS_PER_SLOT,
            };
        }

        debug!(request_id, "queue full, request rejected");
        Admission::Rejected
    }

    /// Release an in-flight slot and promote the head waiter, if any.
    ///
    /// Remaining waiters shift forward by one; positions stay contiguous
    /// because they are derived from list order.
    pub fn release_slot(&self, request_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.active.remove(request_id).is_none() {
            return;
        }

        if let Some(next) = inner.waiting.pop_front() {
            debug!(request_id = %next.request_id, "promoting waiter to in-flight");
            inner.active.insert(
                next.request_id,
                InFlight {
                    queued_at: next.queued_at,
                    started_at: Utc::now(),
                },
            );
        }
    }

    /// Cancel a request. Only waiting requests can be cancelled; in-flight
    /// work cannot be pre-empted.
    pub fn cancel(&self, request_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = inner.waiting.len();
        inner.waiting.retain(|w| w.request_id != request_id);
        inner.waiting.len() != before
    }

    /// Live snapshot for the status endpoint. `None` once a request has
    /// completed (or was never seen).
    pub fn snapshot(&self, request_id: &str) -> Option<RequestSnapshot> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(in_flight) = inner.active.get(request_id) {
            return Some(RequestSnapshot {
                request_id: request_id.to_owned(),
                status: QueueStatus::Processing,
                queued_at: in_flight.queued_at,
                queue_position: None,
                started_at: Some(in_flight.started_at),
            });
        }

        inner
            .waiting
            .iter()
            .position(|w| w.request_id == request_id)
            .map(|index| RequestSnapshot {
                request_id: request_id.to_owned(),
                status: QueueStatus::Queued,
                queued_at: inner.waiting[index].queued_at,
                queue_position: Some(index + 1),
                started_at: None,
            })
    }

    /// Current occupancy.
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        QueueStats {
            active_requests: inner.active.len(),
            queued_requests: inner.waiting.len(),
            max_concurrency: self.max_concurrent,
            max_queue_size: self.max_queue_size,
        }
    }

    /// Number of requests currently running.
    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active
            .len()
    }

    /// Drop every queued and in-flight entry. Shutdown only.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.active.clear();
        inner.waiting.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(queue: &TranslationQueue, ids: &[&str]) -> Vec<Option<usize>> {
        ids.iter()
            .map(|id| queue.snapshot(id).and_then(|s| s.queue_position))
            .collect()
    }

    #[test]
    fn admits_until_concurrency_bound() {
        let queue = TranslationQueue::new(2, 2);
        assert_eq!(queue.acquire_slot("a"), Admission::Processing);
        assert_eq!(queue.acquire_slot("b"), Admission::Processing);
        assert!(matches!(
            queue.acquire_slot("c"),
            Admission::Pending {
                queue_position: 1,
                estimated_wait_seconds: 3
            }
        ));
    }

    #[test]
    fn rejects_when_both_bounds_full() {
        let queue = TranslationQueue::new(1, 1);
        assert_eq!(queue.acquire_slot("a"), Admission::Processing);
        assert!(matches!(queue.acquire_slot("b"), Admission::Pending { .. }));
        assert_eq!(queue.acquire_slot("c"), Admission::Rejected);
    }

    #[test]
    fn zero_queue_size_rejects_immediately() {
        let queue = TranslationQueue::new(1, 0);
        assert_eq!(queue.acquire_slot("a"), Admission::Processing);
        assert_eq!(queue.acquire_slot("b"), Admission::Rejected);
    }

    #[test]
    fn release_promotes_head_and_renumbers() {
        let queue = TranslationQueue::new(1, 3);
        queue.acquire_slot("a");
        queue.acquire_slot("b");
        queue.acquire_slot("c");
        queue.acquire_slot("d");
        assert_eq!(positions(&queue, &["b", "c", "d"]), [Some(1), Some(2), Some(3)]);

        queue.release_slot("a");
        // b promoted to in-flight; c and d shift forward.
        assert_eq!(queue.snapshot("b").unwrap().status, QueueStatus::Processing);
        assert_eq!(positions(&queue, &["c", "d"]), [Some(1), Some(2)]);
    }

    #[test]
    fn cancel_removes_waiter_and_renumbers() {
        let queue = TranslationQueue::new(1, 3);
        queue.acquire_slot("a");
        queue.acquire_slot("b");
        queue.acquire_slot("c");
        assert!(queue.cancel("b"));
        assert_eq!(positions(&queue, &["c"]), [Some(1)]);
        assert!(queue.snapshot("b").is_none());
    }

    #[test]
    fn cancel_refuses_in_flight_requests() {
        let queue = TranslationQueue::new(1, 1);
        queue.acquire_slot("a");
        assert!(!queue.cancel("a"));
        assert_eq!(queue.snapshot("a").unwrap().status, QueueStatus::Processing);
    }

    #[test]
    fn completed_requests_disappear_from_snapshots() {
        let queue = TranslationQueue::new(1, 1);
        queue.acquire_slot("a");
        queue.release_slot("a");
        assert!(queue.snapshot("a").is_none());
    }

    #[test]
    fn snapshot_of_in_flight_has_no_position() {
        let queue = TranslationQueue::new(1, 1);
        queue.acquire_slot("a");
        let snap = queue.snapshot("a").unwrap();
        assert_eq!(snap.status, QueueStatus::Processing);
        assert!(snap.queue_position.is_none());
        assert!(snap.started_at.is_some());
    }

    #[test]
    fn invariants_hold_under_mixed_operations() {
        let queue = TranslationQueue::new(3, 5);
        let ids: Vec<String> = (0..12).map(|i| format!("r{i}")).collect();

        let mut admitted = Vec::new();
        let mut waiting = Vec::new();
        for id in &ids {
            match queue.acquire_slot(id) {
                Admission::Processing => admitted.push(id.clone()),
                Admission::Pending { .. } => waiting.push(id.clone()),
                Admission::Rejected => {}
            }
        }
        assert_eq!(admitted.len(), 3);
        assert_eq!(waiting.len(), 5);

        // Interleave releases and cancels, checking bounds and contiguity.
        queue.cancel(&waiting[2]);
        waiting.remove(2);
        for _ in 0..3 {
            let done = admitted.remove(0);
            queue.release_slot(&done);
            if !waiting.is_empty() {
                admitted.push(waiting.remove(0));
            }

            let stats = queue.stats();
            assert!(stats.active_requests <= 3);
            let found: Vec<Option<usize>> = waiting
                .iter()
                .map(|id| queue.snapshot(id).and_then(|s| s.queue_position))
                .collect();
            let expected: Vec<Option<usize>> = (1..=waiting.len()).map(Some).collect();
            assert_eq!(found, expected, "positions must stay contiguous");
        }
    }

    #[test]
    fn clear_empties_everything() {
        let queue = TranslationQueue::new(1, 2);
        queue.acquire_slot("a");
        queue.acquire_slot("b");
        queue.clear();
        let stats = queue.stats();
        assert_eq!(stats.active_requests, 0);
        assert_eq!(stats.queued_requests, 0);
    }
}
