#![forbid(unsafe_code)]

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Ping schedule for one PubSub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatTiming {
	/// Delay from socket open to the first PING.
	pub initial_ping_delay: Duration,
	/// Later pings are spaced uniformly in `[ping_interval_min, ping_interval_max)`.
	pub ping_interval_min: Duration,
	pub ping_interval_max: Duration,
	/// How long a PING may go unanswered.
	pub pong_timeout: Duration,
}

impl Default for HeartbeatTiming {
	fn default() -> Self {
		Self {
			initial_ping_delay: Duration::from_secs(270),
			ping_interval_min: Duration::from_secs(240),
			ping_interval_max: Duration::from_secs(300),
			pong_timeout: Duration::from_secs(10),
		}
	}
}

impl HeartbeatTiming {
	pub fn next_ping_interval<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
		if self.ping_interval_max <= self.ping_interval_min {
			return self.ping_interval_min;
		}
		rng.random_range(self.ping_interval_min..self.ping_interval_max)
	}
}

/// Delay before recreating the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
	pub base_delay: Duration,
	/// When set above `base_delay`, consecutive failures double the delay up to this cap.
	pub max_delay: Option<Duration>,
}

impl Default for ReconnectPolicy {
	fn default() -> Self {
		Self {
			base_delay: Duration::from_secs(60),
			max_delay: None,
		}
	}
}

impl ReconnectPolicy {
	/// `consecutive_failures` counts reconnects since the last healthy session, starting at 1.
	pub fn delay(&self, consecutive_failures: u32) -> Duration {
		match self.max_delay {
			Some(max) if max > self.base_delay => {
				crate::backoff_delay(consecutive_failures.saturating_sub(1), self.base_delay, max)
			}
			_ => self.base_delay,
		}
	}
}

/// Timer state owned by a single connection.
///
/// At most one pong deadline is armed at a time. The session is dropped on
/// reconnect, which discards both timers with it.
#[derive(Debug)]
pub struct HeartbeatSession {
	generation: u64,
	next_ping_at: Instant,
	pong_deadline: Option<Instant>,
}

impl HeartbeatSession {
	pub fn open(generation: u64, timing: &HeartbeatTiming, now: Instant) -> Self {
		Self {
			generation,
			next_ping_at: now + timing.initial_ping_delay,
			pong_deadline: None,
		}
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	pub fn next_ping_at(&self) -> Instant {
		self.next_ping_at
	}

	pub fn pong_deadline(&self) -> Option<Instant> {
		self.pong_deadline
	}

	/// Record a PING sent at `now`: schedule the next one and arm the deadline.
	///
	/// An already armed deadline is kept, so an unanswered PING still expires
	/// when pings are spaced closer than the pong timeout.
	pub fn ping_sent(&mut self, timing: &HeartbeatTiming, now: Instant, next_interval: Duration) {
		self.next_ping_at = now + next_interval;
		self.pong_deadline.get_or_insert(now + timing.pong_timeout);
	}

	/// Cancel the pending deadline. Returns `false` when none was armed.
	pub fn pong_received(&mut self) -> bool {
		self.pong_deadline.take().is_some()
	}

	pub fn pong_overdue(&self, now: Instant) -> bool {
		self.pong_deadline.is_some_and(|d| now >= d)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	#[test]
	fn fixed_backoff_by_default() {
		let policy = ReconnectPolicy::default();
		assert_eq!(policy.delay(1), Duration::from_secs(60));
		assert_eq!(policy.delay(50), Duration::from_secs(60));
	}

	#[test]
	fn capped_exponential_when_enabled() {
		let policy = ReconnectPolicy {
			base_delay: Duration::from_secs(60),
			max_delay: Some(Duration::from_secs(600)),
		};
		assert_eq!(policy.delay(1), Duration::from_secs(60));
		assert_eq!(policy.delay(2), Duration::from_secs(120));
		assert_eq!(policy.delay(4), Duration::from_secs(480));
		assert_eq!(policy.delay(5), Duration::from_secs(600));
	}

	#[tokio::test(start_paused = true)]
	async fn pong_cancels_only_one_deadline() {
		let timing = HeartbeatTiming::default();
		let start = Instant::now();
		let mut session = HeartbeatSession::open(1, &timing, start);
		assert_eq!(session.next_ping_at(), start + Duration::from_secs(270));
		assert_eq!(session.pong_deadline(), None);

		session.ping_sent(&timing, start, Duration::from_secs(250));
		assert_eq!(session.pong_deadline(), Some(start + Duration::from_secs(10)));
		assert!(!session.pong_overdue(start + Duration::from_secs(9)));
		assert!(session.pong_overdue(start + Duration::from_secs(10)));

		assert!(session.pong_received());
		assert!(!session.pong_received());
		assert!(!session.pong_overdue(start + Duration::from_secs(60)));
	}

	#[tokio::test(start_paused = true)]
	async fn unanswered_ping_keeps_first_deadline() {
		let timing = HeartbeatTiming {
			initial_ping_delay: Duration::from_secs(1),
			ping_interval_min: Duration::from_secs(5),
			ping_interval_max: Duration::from_secs(6),
			pong_timeout: Duration::from_secs(10),
		};
		let start = Instant::now();
		let mut session = HeartbeatSession::open(1, &timing, start);

		session.ping_sent(&timing, start + Duration::from_secs(1), Duration::from_secs(5));
		session.ping_sent(&timing, start + Duration::from_secs(6), Duration::from_secs(5));
		assert_eq!(session.pong_deadline(), Some(start + Duration::from_secs(11)));
		assert!(session.pong_overdue(start + Duration::from_secs(11)));

		assert!(session.pong_received());
		session.ping_sent(&timing, start + Duration::from_secs(12), Duration::from_secs(5));
		assert_eq!(session.pong_deadline(), Some(start + Duration::from_secs(22)));
	}

	proptest! {
		#[test]
		fn ping_interval_stays_in_window(seed in any::<u64>()) {
			let timing = HeartbeatTiming::default();
			let mut rng = StdRng::seed_from_u64(seed);
			let d = timing.next_ping_interval(&mut rng);
			prop_assert!(d >= Duration::from_secs(240));
			prop_assert!(d < Duration::from_secs(300));
		}
	}
}
