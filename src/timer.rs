//! Named timers.
//!
//! Each [`TimerKey`] owns at most one armed timer. Arming a key cancels
//! whatever was armed under it before. Expiries are delivered as
//! [`TimerFired`] messages on a channel so the owning event loop handles
//! them like any other input.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Timer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Next connection attempt after a failure or drop.
    ReconnectRetry,
    /// Clears the activity of an item left paused too long.
    ClearActivity,
    /// Sends the coalesced update once the throttle window ends.
    ThrottleFlush,
}

/// Expiry notice for one armed timer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub key: TimerKey,
    generation: u64,
}

struct ArmedTimer {
    generation: u64,
    deadline: Instant,
    task: JoinHandle<()>,
}

/// Registry of armed timers, one per key.
pub struct TimerRegistry {
    armed: HashMap<TimerKey, ArmedTimer>,
    next_generation: u64,
    fired_tx: UnboundedSender<TimerFired>,
}

impl TimerRegistry {
    /// Create a registry and the receiver its expiries arrive on.
    pub fn new() -> (Self, UnboundedReceiver<TimerFired>) {
        let (fired_tx, fired_rx) = unbounded_channel();
        let registry = Self {
            armed: HashMap::new(),
            next_generation: 0,
            fired_tx,
        };
        (registry, fired_rx)
    }

    /// Arm `key` to fire after `delay`, replacing any timer already armed
    /// under it.
    pub fn set(&mut self, key: TimerKey, delay: Duration) {
        self.clear(key);

        self.next_generation += 1;
        let generation = self.next_generation;
        let deadline = Instant::now() + delay;
        let tx = self.fired_tx.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(TimerFired { key, generation });
        });

        tracing::trace!(?key, ?delay, "timer armed");
        self.armed.insert(
            key,
            ArmedTimer {
                generation,
                deadline,
                task,
            },
        );
    }

    /// Cancel the timer under `key`. Returns whether one was armed.
    pub fn clear(&mut self, key: TimerKey) -> bool {
        match self.armed.remove(&key) {
            Some(timer) => {
                timer.task.abort();
                tracing::trace!(?key, "timer cleared");
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&mut self) {
        for (_, timer) in self.armed.drain() {
            timer.task.abort();
        }
    }

    pub fn is_armed(&self, key: TimerKey) -> bool {
        self.armed.contains_key(&key)
    }

    /// Time left before `key` fires, if armed.
    pub fn remaining(&self, key: TimerKey) -> Option<Duration> {
        self.armed
            .get(&key)
            .map(|timer| timer.deadline.saturating_duration_since(Instant::now()))
    }

    /// Accept an expiry notice.
    ///
    /// Returns `true` and disarms the key only if the notice belongs to the
    /// instance currently armed. Notices from cleared or replaced timers,
    /// which may already sit in the channel, are rejected.
    pub fn claim(&mut self, fired: TimerFired) -> bool {
        match self.armed.get(&fired.key) {
            Some(timer) if timer.generation == fired.generation => {
                self.armed.remove(&fired.key);
                true
            }
            _ => false,
        }
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.clear_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (mut timers, mut rx) = TimerRegistry::new();
        timers.set(TimerKey::ClearActivity, Duration::from_secs(5));

        let start = Instant::now();
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.key, TimerKey::ClearActivity);
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(timers.claim(fired));
        assert!(!timers.is_armed(TimerKey::ClearActivity));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_previous_timer() {
        let (mut timers, mut rx) = TimerRegistry::new();
        timers.set(TimerKey::ThrottleFlush, Duration::from_secs(1));
        timers.set(TimerKey::ThrottleFlush, Duration::from_secs(10));

        let start = Instant::now();
        let fired = rx.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(timers.claim(fired));

        let nothing = tokio::time::timeout(Duration::from_secs(60), rx.recv()).await;
        assert!(nothing.is_err(), "replaced timer must not fire");
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_timer_never_fires() {
        let (mut timers, mut rx) = TimerRegistry::new();
        timers.set(TimerKey::ReconnectRetry, Duration::from_secs(5));
        assert!(timers.clear(TimerKey::ReconnectRetry));
        assert!(!timers.clear(TimerKey::ReconnectRetry));

        let nothing = tokio::time::timeout(Duration::from_secs(60), rx.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_notice_is_rejected() {
        let (mut timers, mut rx) = TimerRegistry::new();
        timers.set(TimerKey::ThrottleFlush, Duration::from_secs(1));
        let stale = rx.recv().await.unwrap();

        // Re-armed before the first notice was handled.
        timers.set(TimerKey::ThrottleFlush, Duration::from_secs(1));
        assert!(!timers.claim(stale));
        assert!(timers.is_armed(TimerKey::ThrottleFlush));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let (mut timers, _rx) = TimerRegistry::new();
        timers.set(TimerKey::ThrottleFlush, Duration::from_secs(3));
        timers.set(TimerKey::ClearActivity, Duration::from_secs(7));

        assert_eq!(
            timers.remaining(TimerKey::ThrottleFlush),
            Some(Duration::from_secs(3))
        );
        timers.clear_all();
        assert!(!timers.is_armed(TimerKey::ThrottleFlush));
        assert!(!timers.is_armed(TimerKey::ClearActivity));
        assert_eq!(timers.remaining(TimerKey::ClearActivity), None);
    }
}
