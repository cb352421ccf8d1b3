//! Idle shutdown timer.

use crate::service::tasks::spawn_or_log;

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

type IdleAction = Arc<dyn Fn() + Send + Sync>;

/// Delayed action that every qualifying activity pushes further out
pub struct IdleShutdownTimer {
	delay: Duration,
	action: IdleAction,
	pending: Mutex<Option<JoinHandle<()>>>,
}

impl IdleShutdownTimer {
	pub fn new<F>(delay: Duration, action: F) -> Self
	where
		F: Fn() + Send + Sync + 'static,
	{
		Self {
			delay,
			action: Arc::new(action),
			pending: Mutex::new(None),
		}
	}

	/// Cancel any pending firing and arm a fresh one.
	pub fn reset(&self) {
		let mut pending = self.pending.lock();
		if let Some(task) = pending.take() {
			task.abort();
		}

		let delay = self.delay;
		let action = Arc::clone(&self.action);
		*pending = spawn_or_log("idle shutdown timer", async move {
			tokio::time::sleep(delay).await;
			debug!("Idle shutdown delay of {:?} elapsed", delay);
			action();
		});
	}

	pub fn cancel(&self) {
		if let Some(task) = self.pending.lock().take() {
			task.abort();
		}
	}

	pub fn is_armed(&self) -> bool {
		self.pending
			.lock()
			.as_ref()
			.is_some_and(|task| !task.is_finished())
	}
}

impl Drop for IdleShutdownTimer {
	fn drop(&mut self) {
		self.cancel();
	}
}
