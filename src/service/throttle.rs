//! Last-value-wins throttle.
//!
//! A `Throttle` forwards submitted values to a sink at most once per interval. A submission after
//! a quiet period is emitted right away on the runtime; submissions that arrive sooner only
//! replace the pending value, and a single deferred emission fires at the interval boundary.

use crate::service::tasks::spawn_or_log;

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type Sink<T> = Arc<dyn Fn(T) + Send + Sync>;

struct ThrottleState<T> {
	pending: Option<T>,
	last_emit: Option<Instant>,
	task: Option<JoinHandle<()>>,
}

/// Coalesces bursts of values into at most one emission per interval
pub struct Throttle<T: Send + 'static> {
	name: &'static str,
	interval: Duration,
	state: Arc<Mutex<ThrottleState<T>>>,
	sink: Sink<T>,
}

impl<T: Send + 'static> Throttle<T> {
	pub fn new<F>(name: &'static str, interval: Duration, sink: F) -> Self
	where
		F: Fn(T) + Send + Sync + 'static,
	{
		Self {
			name,
			interval,
			state: Arc::new(Mutex::new(ThrottleState {
				pending: None,
				last_emit: None,
				task: None,
			})),
			sink: Arc::new(sink),
		}
	}

	/// Submit a value; only the latest value submitted before an emission is delivered.
	pub fn submit(&self, value: T) {
		let mut state = self.state.lock();
		state.pending = Some(value);
		if state.task.is_some() {
			return;
		}

		let now = Instant::now();
		let deadline = match state.last_emit {
			Some(last) if now.saturating_duration_since(last) < self.interval => last + self.interval,
			_ => now,
		};

		let shared = Arc::clone(&self.state);
		let sink = Arc::clone(&self.sink);
		// the task needs the lock to clear its own handle, so it cannot finish before we store it
		state.task = spawn_or_log(self.name, async move {
			tokio::time::sleep_until(deadline).await;
			let value = {
				let mut state = shared.lock();
				state.task = None;
				state.last_emit = Some(Instant::now());
				state.pending.take()
			};
			if let Some(value) = value {
				sink(value);
			}
		});
	}

	/// Drop the pending value and abort a scheduled emission.
	pub fn cancel(&self) {
		let mut state = self.state.lock();
		state.pending = None;
		if let Some(task) = state.task.take() {
			task.abort();
		}
	}

	pub fn is_pending(&self) -> bool {
		self.state.lock().task.is_some()
	}
}

impl<T: Send + 'static> Drop for Throttle<T> {
	fn drop(&mut self) {
		if let Some(task) = self.state.lock().task.take() {
			task.abort();
		}
	}
}
