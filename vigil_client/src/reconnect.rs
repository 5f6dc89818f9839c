use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub trait Clock: Send {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut g) = self.now.lock() {
            *g += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        match self.now.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Upper bound of a uniform extra delay added per attempt.
    pub jitter: Duration,
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
            jitter: Duration::ZERO,
        }
    }

    pub fn capped(self, max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..self
        }
    }

    pub fn with_jitter(self, jitter: Duration) -> Self {
        Self { jitter, ..self }
    }

    fn delay_for(&self, rng: &mut impl Rng) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        let extra_ms = rng.gen_range(0..=self.jitter.as_millis() as u64);
        self.delay + Duration::from_millis(extra_ms)
    }

    fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Scheduled {
        attempt: u32,
        delay: Duration,
        due: Instant,
    },
    /// A reconnect is already outstanding; nothing new was scheduled.
    AlreadyPending { due: Instant },
    Exhausted { attempts: u32 },
}

pub struct Reconnector<C: Clock = SystemClock> {
    policy: ReconnectPolicy,
    clock: C,
    rng: StdRng,
    attempts: u32,
    pending: Option<Instant>,
}

impl Reconnector<SystemClock> {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self::with_clock(policy, SystemClock)
    }
}

impl<C: Clock> Reconnector<C> {
    pub fn with_clock(policy: ReconnectPolicy, clock: C) -> Self {
        Self {
            policy,
            clock,
            rng: StdRng::from_entropy(),
            attempts: 0,
            pending: None,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn pending(&self) -> Option<Instant> {
        self.pending
    }

    /// Called on every closure (including a failed connect).
    pub fn on_closed(&mut self) -> Schedule {
        if let Some(due) = self.pending {
            return Schedule::AlreadyPending { due };
        }
        let attempt = self.attempts + 1;
        if !self.policy.allows(attempt) {
            return Schedule::Exhausted {
                attempts: self.attempts,
            };
        }
        self.attempts = attempt;
        let delay = self.policy.delay_for(&mut self.rng);
        let due = self.clock.now() + delay;
        self.pending = Some(due);
        Schedule::Scheduled {
            attempt,
            delay,
            due,
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.pending
            .map(|due| due.saturating_duration_since(self.clock.now()))
    }

    pub fn is_due(&self) -> bool {
        self.pending.is_some_and(|due| self.clock.now() >= due)
    }

    /// Consumes the outstanding attempt once it is due.
    pub fn fire(&mut self) -> bool {
        if !self.is_due() {
            return false;
        }
        self.pending = None;
        true
    }

    pub fn on_open(&mut self) {
        self.attempts = 0;
        self.pending = None;
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(ms: u64) -> Reconnector<ManualClock> {
        Reconnector::with_clock(
            ReconnectPolicy::fixed(Duration::from_millis(ms)),
            ManualClock::new(),
        )
    }

    #[test]
    fn one_attempt_outstanding_and_not_before_delay() {
        let clock = ManualClock::new();
        let mut r = Reconnector::with_clock(
            ReconnectPolicy::fixed(Duration::from_millis(2000)),
            clock.clone(),
        );

        let first = r.on_closed();
        let Schedule::Scheduled { attempt, delay, due } = first else {
            panic!("expected a scheduled attempt, got {first:?}");
        };
        assert_eq!(attempt, 1);
        assert_eq!(delay, Duration::from_millis(2000));

        // A second closure signal while pending must not stack another attempt.
        assert_eq!(r.on_closed(), Schedule::AlreadyPending { due });
        assert_eq!(r.attempts(), 1);

        clock.advance(Duration::from_millis(1999));
        assert!(!r.fire());
        assert_eq!(r.remaining(), Some(Duration::from_millis(1)));

        clock.advance(Duration::from_millis(1));
        assert!(r.fire());
        assert!(!r.fire());
        assert_eq!(r.pending(), None);
    }

    #[test]
    fn unlimited_by_default() {
        let mut r = fixed(10);
        for n in 1..=500 {
            assert!(matches!(r.on_closed(), Schedule::Scheduled { attempt, .. } if attempt == n));
            r.cancel();
        }
    }

    #[test]
    fn capped_policy_exhausts_and_open_resets() {
        let mut r = Reconnector::with_clock(
            ReconnectPolicy::fixed(Duration::from_millis(5)).capped(2),
            ManualClock::new(),
        );
        assert!(matches!(r.on_closed(), Schedule::Scheduled { attempt: 1, .. }));
        r.cancel();
        assert!(matches!(r.on_closed(), Schedule::Scheduled { attempt: 2, .. }));
        r.cancel();
        assert_eq!(r.on_closed(), Schedule::Exhausted { attempts: 2 });

        r.on_open();
        assert!(matches!(r.on_closed(), Schedule::Scheduled { attempt: 1, .. }));
    }

    #[test]
    fn jitter_stays_in_band() {
        let mut r = Reconnector::with_clock(
            ReconnectPolicy::fixed(Duration::from_millis(100)).with_jitter(Duration::from_millis(50)),
            ManualClock::new(),
        );
        for _ in 0..100 {
            let Schedule::Scheduled { delay, .. } = r.on_closed() else {
                panic!("expected scheduled");
            };
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
            r.cancel();
        }
    }
}
