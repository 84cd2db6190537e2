//! Bounded per-persona queue for memory persistence.
//!
//! A persona's in-memory writes are serialized by its own pipeline; this
//! queue serializes the corresponding store flushes so concurrent sessions
//! cannot interleave snapshot writes for one persona. The queue is bounded;
//! under overflow it sheds the oldest interaction-only flush, never a
//! knowledge flush, and counts every shed job.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Default queue capacity per persona.
const DEFAULT_CAPACITY: usize = 64;

/// What a flush job carries; knowledge flushes are never shed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushKind {
    /// Snapshot taken after ordinary interaction writes.
    Interaction,
    /// Snapshot taken after knowledge/insight writes.
    Knowledge,
}

/// One pending memory snapshot flush.
#[derive(Debug, Clone)]
pub struct FlushJob {
    pub persona_id: String,
    pub kind: FlushKind,
    /// Exported memory blob to persist.
    pub blob: Vec<u8>,
    pub queued_at: DateTime<Utc>,
}

impl FlushJob {
    pub fn new(persona_id: impl Into<String>, kind: FlushKind, blob: Vec<u8>) -> Self {
        Self {
            persona_id: persona_id.into(),
            kind,
            blob,
            queued_at: Utc::now(),
        }
    }
}

/// Bounded FIFO of flush jobs with overflow shedding.
#[derive(Debug)]
pub struct PersistQueue {
    capacity: usize,
    jobs: Mutex<VecDeque<FlushJob>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl Default for PersistQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl PersistQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            jobs: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a flush job. Returns `false` when the job (or an older one)
    /// was shed to stay within capacity.
    pub fn push(&self, job: FlushJob) -> bool {
        let mut jobs = self.jobs.lock();
        let mut accepted = true;

        if jobs.len() >= self.capacity {
            // Shed the oldest interaction flush. Knowledge flushes survive;
            // if only knowledge is queued, an incoming interaction flush is
            // shed instead and a knowledge flush is admitted over capacity.
            if let Some(pos) = jobs.iter().position(|j| j.kind == FlushKind::Interaction) {
                jobs.remove(pos);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                accepted = false;
            } else if job.kind == FlushKind::Interaction {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        jobs.push_back(job);
        drop(jobs);
        self.notify.notify_one();
        accepted
    }

    /// Await the next job. Returns `None` once the queue is closed and
    /// drained.
    pub async fn pop(&self) -> Option<FlushJob> {
        loop {
            // Register interest before checking, so a push or close landing
            // between the check and the await still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut jobs = self.jobs.lock();
                if let Some(job) = jobs.pop_front() {
                    return Some(job);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the queue; pending jobs remain poppable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Number of jobs shed so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(kind: FlushKind) -> FlushJob {
        FlushJob::new("p1", kind, vec![1, 2, 3])
    }

    #[test]
    fn test_overflow_sheds_oldest_interaction() {
        let queue = PersistQueue::new(2);
        assert!(queue.push(job(FlushKind::Interaction)));
        assert!(queue.push(job(FlushKind::Knowledge)));

        // Queue full: the incoming job displaces the oldest interaction.
        assert!(!queue.push(job(FlushKind::Interaction)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_knowledge_never_shed() {
        let queue = PersistQueue::new(2);
        assert!(queue.push(job(FlushKind::Knowledge)));
        assert!(queue.push(job(FlushKind::Knowledge)));

        // Incoming interaction flush is shed, knowledge stays put.
        assert!(!queue.push(job(FlushKind::Interaction)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);

        // Incoming knowledge flush is admitted over capacity.
        queue.push(job(FlushKind::Knowledge));
        assert_eq!(queue.len(), 3);
    }

    #[tokio::test]
    async fn test_pop_returns_fifo_then_none_after_close() {
        let queue = PersistQueue::new(8);
        let mut first = job(FlushKind::Interaction);
        first.blob = vec![1];
        let mut second = job(FlushKind::Knowledge);
        second.blob = vec![2];
        queue.push(first);
        queue.push(second);
        queue.close();

        assert_eq!(queue.pop().await.unwrap().blob, vec![1]);
        assert_eq!(queue.pop().await.unwrap().blob, vec![2]);
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = std::sync::Arc::new(PersistQueue::new(8));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(job(FlushKind::Knowledge));
        let popped = consumer.await.unwrap();
        assert!(popped.is_some());
    }
}
