//! Trailing-edge debouncer driven by `tokio::time`.

use std::time::Duration;

use tokio::time::Instant;

/// Collapses a burst of triggers into a single firing after a quiet window.
///
/// Every [`trigger`](Self::trigger) pushes the deadline out to `now + window`; the owner waits
/// on [`until`] with the current [`deadline`](Self::deadline) and calls
/// [`fire`](Self::fire) once it passes.
#[derive(Debug)]
pub struct Debouncer {
	window: Duration,
	deadline: Option<Instant>,
}

impl Debouncer {
	pub fn new(window: Duration) -> Self {
		Self {
			window,
			deadline: None,
		}
	}

	pub fn trigger(&mut self) {
		let now = Instant::now();
		self.deadline = Some(now.checked_add(self.window).unwrap_or_else(|| far_future(now)));
	}

	pub fn cancel(&mut self) {
		self.deadline = None;
	}

	pub fn is_armed(&self) -> bool {
		self.deadline.is_some()
	}

	pub fn deadline(&self) -> Option<Instant> {
		self.deadline
	}

	/// Disarms the debouncer if its deadline has passed. Returns whether it fired.
	pub fn fire(&mut self) -> bool {
		match self.deadline {
			Some(deadline) if deadline <= Instant::now() => {
				self.deadline = None;
				true
			}
			_ => false,
		}
	}
}

/// Roughly 30 years out.
fn far_future(now: Instant) -> Instant {
	now + Duration::from_secs(86400 * 365 * 30)
}

/// Sleeps until `deadline`, or forever when there is none.
pub async fn until(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}
