//! Expectations: probes that were sent and not yet echoed back.
//!
//! One [`ExpectationQueue`] belongs to exactly one connection epoch.
//! Probes are appended at the tail when written; echoed responses are
//! reconciled from the head:
//!
//! - head ID == response ID   => matched, latency recorded, stop.
//! - head ID != response ID   => head is lost, discard it and keep going.
//! - queue exhausted          => no expectation for this response.
//!
//! A response whose ID is behind the head (its expectation was already
//! discarded) drains the queue and ends up as "no expectation" too.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::message::Probe;

/// A sent probe awaiting its echoed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    /// When the probe was handed to the transport.
    pub sent_at: Instant,
    pub probe: Probe,
}

/// Successful match of a response against the queue head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched {
    pub expectation: Expectation,

    /// `received_at - sent_at`.
    pub latency: Duration,
}

/// Outcome of reconciling one response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reconciliation {
    /// Expectations skipped over before a match (or before the queue ran dry),
    /// in the order they were sent.
    pub lost: Vec<Expectation>,

    /// `None` when no expectation matched the response.
    pub matched: Option<Matched>,
}

impl Reconciliation {
    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }
}

/// FIFO of outstanding expectations for one connection epoch.
#[derive(Debug, Default)]
pub struct ExpectationQueue {
    pending: VecDeque<Expectation>,
}

impl ExpectationQueue {
    pub fn new() -> Self {
        ExpectationQueue::default()
    }

    /// Record a probe that was just written.
    pub fn push(&mut self, sent_at: Instant, probe: Probe) {
        self.pending.push_back(Expectation { sent_at, probe });
    }

    /// Reconcile a response received at `received_at`.
    pub fn reconcile(&mut self, response: &Probe, received_at: Instant) -> Reconciliation {
        let mut outcome = Reconciliation::default();

        while let Some(exp) = self.pending.pop_front() {
            if exp.probe.id == response.id {
                let latency = received_at.saturating_duration_since(exp.sent_at);
                outcome.matched = Some(Matched {
                    expectation: exp,
                    latency,
                });
                break;
            }
            outcome.lost.push(exp);
        }

        outcome
    }

    /// Head of the queue: the oldest outstanding probe.
    pub fn front(&self) -> Option<&Expectation> {
        self.pending.front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// IDs of all outstanding probes, oldest first.
    pub fn outstanding_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.pending.iter().map(|e| e.probe.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(ids: &[u64], start: Instant) -> ExpectationQueue {
        let mut q = ExpectationQueue::new();
        for &id in ids {
            q.push(start, Probe::hello(id));
        }
        q
    }

    #[tokio::test(start_paused = true)]
    async fn in_order_responses_all_match() {
        let start = Instant::now();
        let mut q = queue_with(&[1, 2, 3], start);

        tokio::time::advance(Duration::from_millis(15)).await;
        let now = Instant::now();

        for id in 1..=3 {
            let out = q.reconcile(&Probe::hello(id), now);
            assert!(out.lost.is_empty());
            let m = out.matched.expect("should match");
            assert_eq!(m.expectation.probe.id, id);
            assert_eq!(m.latency, Duration::from_millis(15));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn gap_reports_skipped_probes_as_lost() {
        let start = Instant::now();
        let mut q = queue_with(&[1, 2, 3], start);

        let out = q.reconcile(&Probe::hello(2), start);

        assert_eq!(out.lost.len(), 1);
        assert_eq!(out.lost[0].probe.id, 1);
        assert_eq!(out.matched.map(|m| m.expectation.probe.id), Some(2));
        assert_eq!(q.outstanding_ids().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn unknown_response_drains_queue_without_match() {
        let start = Instant::now();
        let mut q = queue_with(&[4, 5], start);

        let out = q.reconcile(&Probe::hello(9), start);

        assert!(!out.is_match());
        assert_eq!(out.lost.iter().map(|e| e.probe.id).collect::<Vec<_>>(), vec![4, 5]);
        assert!(q.is_empty());
    }

    #[test]
    fn stale_response_looks_like_no_expectation() {
        let start = Instant::now();
        let mut q = queue_with(&[1, 2, 3], start);
        let _ = q.reconcile(&Probe::hello(2), start);

        // 1 was already discarded; its late echo drains what is left.
        let out = q.reconcile(&Probe::hello(1), start);

        assert!(!out.is_match());
        assert_eq!(out.lost.len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn empty_queue_yields_empty_reconciliation() {
        let mut q = ExpectationQueue::new();
        let out = q.reconcile(&Probe::hello(1), Instant::now());
        assert_eq!(out, Reconciliation::default());
        assert!(q.front().is_none());
    }
}
