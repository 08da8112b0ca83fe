//! Per-peer reconnect timers with exponential backoff.
//!
//! At most one timer is pending per peer. When it fires, the peer id is sent
//! on the `due` channel and the node actor decides what to do. A timer that
//! was cancelled after it fired is detected through [`ReconnectScheduler::fired`].

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

use mesh_core::config::ReconnectConfig;
use mesh_core::PeerId;

const MAX_DELAY: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub growth: f64,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            base: config.base_delay(),
            growth: config.growth_factor,
            max_attempts: config.max_attempts,
        }
    }

    /// `base * growth^attempt`, clamped to five minutes.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.growth.max(1.0).powi(attempt.min(32) as i32);
        Duration::try_from_secs_f64(self.base.as_secs_f64() * factor)
            .unwrap_or(MAX_DELAY)
            .min(MAX_DELAY)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

/// Outcome of asking for a retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Schedule {
    Scheduled { attempt: u32, delay: Duration },
    AlreadyPending,
    /// The attempt cap was just reached; the peer is now unreachable.
    Exhausted,
    /// The peer was already given up on.
    Unreachable,
    Disabled,
}

#[derive(Default)]
struct ReconnectTimer {
    attempts: u32,
    pending: Option<AbortHandle>,
}

pub struct ReconnectScheduler {
    policy: ReconnectPolicy,
    timers: HashMap<PeerId, ReconnectTimer>,
    unreachable: HashSet<PeerId>,
    disabled: bool,
    due_tx: mpsc::UnboundedSender<PeerId>,
}

impl ReconnectScheduler {
    pub fn new(policy: ReconnectPolicy, due_tx: mpsc::UnboundedSender<PeerId>) -> Self {
        Self {
            policy,
            timers: HashMap::new(),
            unreachable: HashSet::new(),
            disabled: false,
            due_tx,
        }
    }

    /// Arm a retry for `peer` unless one is pending, the cap is reached, or
    /// the scheduler is disabled.
    pub fn schedule(&mut self, peer: &PeerId) -> Schedule {
        if self.disabled {
            return Schedule::Disabled;
        }
        if self.unreachable.contains(peer) {
            return Schedule::Unreachable;
        }

        let timer = self.timers.entry(peer.clone()).or_default();
        if timer.pending.is_some() {
            return Schedule::AlreadyPending;
        }
        if timer.attempts >= self.policy.max_attempts {
            self.timers.remove(peer);
            self.unreachable.insert(peer.clone());
            return Schedule::Exhausted;
        }

        let delay = self.policy.delay_for(timer.attempts);
        timer.attempts += 1;
        let attempt = timer.attempts;

        let tx = self.due_tx.clone();
        let due = peer.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(due);
        });
        timer.pending = Some(task.abort_handle());

        debug!(peer = %peer.short(), attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        Schedule::Scheduled { attempt, delay }
    }

    /// Consume a firing. False if the timer was cancelled in the meantime,
    /// in which case the caller must not act on it.
    pub fn fired(&mut self, peer: &PeerId) -> bool {
        match self.timers.get_mut(peer) {
            Some(timer) => timer.pending.take().is_some(),
            None => false,
        }
    }

    /// Link came up: drop the timer and reset the attempt counter.
    pub fn succeeded(&mut self, peer: &PeerId) {
        self.cancel(peer);
        self.unreachable.remove(peer);
    }

    /// Cancel any pending timer and forget the attempt count. Idempotent.
    pub fn cancel(&mut self, peer: &PeerId) {
        if let Some(timer) = self.timers.remove(peer) {
            if let Some(handle) = timer.pending {
                handle.abort();
            }
        }
    }

    /// Cancel and clear the unreachable mark, giving the peer a fresh budget.
    pub fn forget(&mut self, peer: &PeerId) {
        self.cancel(peer);
        self.unreachable.remove(peer);
    }

    /// Terminal failure: no more retries for `peer`.
    pub fn mark_unreachable(&mut self, peer: &PeerId) {
        self.cancel(peer);
        self.unreachable.insert(peer.clone());
    }

    pub fn is_pending(&self, peer: &PeerId) -> bool {
        self.timers
            .get(peer)
            .is_some_and(|timer| timer.pending.is_some())
    }

    pub fn is_unreachable(&self, peer: &PeerId) -> bool {
        self.unreachable.contains(peer)
    }

    pub fn attempts(&self, peer: &PeerId) -> u32 {
        self.timers.get(peer).map_or(0, |timer| timer.attempts)
    }

    pub fn pending_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .timers
            .iter()
            .filter(|(_, timer)| timer.pending.is_some())
            .map(|(peer, _)| peer.clone())
            .collect();
        peers.sort();
        peers
    }

    pub fn unreachable_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.unreachable.iter().cloned().collect();
        peers.sort();
        peers
    }

    /// Cancel everything and refuse further scheduling.
    pub fn disable(&mut self) {
        self.disabled = true;
        self.cancel_all();
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.timers.drain() {
            if let Some(handle) = timer.pending {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_secs(1),
            growth: 1.5,
            max_attempts,
        }
    }

    fn peer() -> PeerId {
        PeerId::from("peer-x")
    }

    #[test]
    fn delays_grow_and_are_clamped() {
        let p = policy(3);
        assert_eq!(p.delay_for(0), Duration::from_secs(1));
        assert_eq!(p.delay_for(1), Duration::from_millis(1500));
        assert_eq!(p.delay_for(2), Duration::from_millis(2250));

        let mut last = Duration::ZERO;
        for attempt in 0..100 {
            let d = p.delay_for(attempt);
            assert!(d >= last);
            assert!(d <= MAX_DELAY);
            last = d;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sched = ReconnectScheduler::new(policy(3), tx);

        assert_eq!(
            sched.schedule(&peer()),
            Schedule::Scheduled {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
        assert!(sched.is_pending(&peer()));

        let due = rx.recv().await.unwrap();
        assert_eq!(due, peer());
        assert!(sched.fired(&peer()));
        assert!(!sched.is_pending(&peer()));
        assert_eq!(sched.attempts(&peer()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_timer_per_peer() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut sched = ReconnectScheduler::new(policy(3), tx);
        sched.schedule(&peer());
        assert_eq!(sched.schedule(&peer()), Schedule::AlreadyPending);
        assert_eq!(sched.attempts(&peer()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cap_reached_marks_unreachable() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sched = ReconnectScheduler::new(policy(3), tx);

        let mut delays = Vec::new();
        for _ in 0..3 {
            match sched.schedule(&peer()) {
                Schedule::Scheduled { delay, .. } => delays.push(delay),
                other => panic!("expected a timer, got {other:?}"),
            }
            rx.recv().await.unwrap();
            assert!(sched.fired(&peer()));
        }
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));

        assert_eq!(sched.schedule(&peer()), Schedule::Exhausted);
        assert!(sched.is_unreachable(&peer()));
        assert_eq!(sched.schedule(&peer()), Schedule::Unreachable);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent_and_suppresses_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sched = ReconnectScheduler::new(policy(3), tx);
        sched.schedule(&peer());

        sched.cancel(&peer());
        sched.cancel(&peer());
        assert!(!sched.is_pending(&peer()));
        assert!(!sched.fired(&peer()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_attempts() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sched = ReconnectScheduler::new(policy(3), tx);
        sched.schedule(&peer());
        rx.recv().await.unwrap();
        sched.fired(&peer());

        sched.succeeded(&peer());
        assert_eq!(sched.attempts(&peer()), 0);
        assert_eq!(
            sched.schedule(&peer()),
            Schedule::Scheduled {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_scheduler_refuses() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut sched = ReconnectScheduler::new(policy(3), tx);
        sched.schedule(&peer());
        sched.disable();
        assert!(!sched.is_pending(&peer()));
        assert_eq!(sched.schedule(&peer()), Schedule::Disabled);
    }
}
