//! Background task spawning for service callbacks.
//!
//! Listener callbacks arrive on arbitrary collaborator threads, and during teardown the runtime
//! may already be gone. `spawn_or_log` schedules work on the current tokio runtime if one is
//! reachable and otherwise logs the rejection at info level instead of panicking.

use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::info;

/// Spawn `future` on the current runtime, returning `None` if execution was rejected.
pub fn spawn_or_log<F>(task_name: &str, future: F) -> Option<JoinHandle<()>>
where
	F: Future<Output = ()> + Send + 'static,
{
	match Handle::try_current() {
		Ok(handle) => Some(handle.spawn(future)),
		Err(e) => {
			info!("{} rejected, no runtime available: {}", task_name, e);
			None
		}
	}
}
