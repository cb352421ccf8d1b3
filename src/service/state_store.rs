//! Persistent service state.
//!
//! The service remembers two values across restarts: the best chain height it has ever seen,
//! a high-water mark used to tell whether the local chain is replaying, and when the wallet was
//! last used, which drives how soon the next background start is scheduled.

use crate::service::tasks::spawn_or_log;
use crate::service::types::{BlockHeight, SyncServiceError};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const STATE_FILENAME: &str = "service_state.json";
const STATE_TEMP_FILENAME: &str = "service_state.json.tmp";

/// Storage for state that outlives a single service run
pub trait ServiceStateStore: Send + Sync {
	fn best_chain_height_ever(&self) -> BlockHeight;

	/// Raise the high-water mark to `height`; returns true if it moved.
	fn maybe_increment_best_chain_height_ever(&self, height: BlockHeight) -> bool;

	fn last_used(&self) -> Option<DateTime<Utc>>;

	fn touch_last_used(&self);

	/// Time since last use, `Duration::MAX` if never used
	fn last_used_ago(&self) -> Duration {
		self.last_used()
			.map(|at| (Utc::now() - at).to_std().unwrap_or(Duration::ZERO))
			.unwrap_or(Duration::MAX)
	}
}

/// On-disk representation of the service state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedServiceState {
	pub best_chain_height_ever: BlockHeight,
	pub last_used: Option<DateTime<Utc>>,
}

impl PersistedServiceState {
	fn raise_height(&mut self, height: BlockHeight) -> bool {
		if height > self.best_chain_height_ever {
			self.best_chain_height_ever = height;
			true
		} else {
			false
		}
	}
}

/// JSON file in the data directory.
///
/// Updates are written in the background: the latest state goes to a temporary file which is
/// then renamed over the previous one, so a crash mid-write leaves the old state intact.
pub struct FileServiceStateStore {
	path: PathBuf,
	temp_path: PathBuf,
	state: Arc<Mutex<PersistedServiceState>>,
	writer: Arc<tokio::sync::Mutex<()>>,
}

impl FileServiceStateStore {
	/// Open the store in `data_dir`, starting empty if no state was saved yet.
	pub async fn open(data_dir: &Path) -> Result<Self, SyncServiceError> {
		tokio::fs::create_dir_all(data_dir).await?;
		let path = data_dir.join(STATE_FILENAME);

		let state = match tokio::fs::read_to_string(&path).await {
			Ok(content) => match serde_json::from_str::<PersistedServiceState>(&content) {
				Ok(state) => {
					info!(
						"Loaded service state from {:?}, best height ever {}",
						path, state.best_chain_height_ever
					);
					state
				}
				Err(e) => {
					warn!("Discarding unreadable service state {:?}: {}", path, e);
					PersistedServiceState::default()
				}
			},
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedServiceState::default(),
			Err(e) => return Err(e.into()),
		};

		Ok(Self {
			path,
			temp_path: data_dir.join(STATE_TEMP_FILENAME),
			state: Arc::new(Mutex::new(state)),
			writer: Arc::new(tokio::sync::Mutex::new(())),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Write the current state now, waiting for any background write in flight.
	pub async fn flush(&self) -> Result<(), SyncServiceError> {
		let _writing = self.writer.lock().await;
		let snapshot = self.state.lock().clone();
		write_state(&self.path, &self.temp_path, &snapshot).await
	}

	fn persist(&self) {
		let path = self.path.clone();
		let temp_path = self.temp_path.clone();
		let state = Arc::clone(&self.state);
		let writer = Arc::clone(&self.writer);
		spawn_or_log("service state write", async move {
			let _writing = writer.lock().await;
			// whatever is current by now, so a late write never rolls state back
			let snapshot = state.lock().clone();
			if let Err(e) = write_state(&path, &temp_path, &snapshot).await {
				warn!("Failed to write service state to {:?}: {}", path, e);
			}
		});
	}
}

async fn write_state(
	path: &Path,
	temp_path: &Path,
	state: &PersistedServiceState,
) -> Result<(), SyncServiceError> {
	let json = serde_json::to_vec_pretty(state)?;
	tokio::fs::write(temp_path, json).await?;
	tokio::fs::rename(temp_path, path).await?;
	debug!("Service state written to {:?}", path);
	Ok(())
}

impl ServiceStateStore for FileServiceStateStore {
	fn best_chain_height_ever(&self) -> BlockHeight {
		self.state.lock().best_chain_height_ever
	}

	fn maybe_increment_best_chain_height_ever(&self, height: BlockHeight) -> bool {
		let raised = self.state.lock().raise_height(height);
		if raised {
			self.persist();
		}
		raised
	}

	fn last_used(&self) -> Option<DateTime<Utc>> {
		self.state.lock().last_used
	}

	fn touch_last_used(&self) {
		self.state.lock().last_used = Some(Utc::now());
		self.persist();
	}
}

/// Volatile store for hosts that keep this state elsewhere
#[derive(Default)]
pub struct MemoryServiceStateStore {
	state: Mutex<PersistedServiceState>,
}

impl MemoryServiceStateStore {
	pub fn new(state: PersistedServiceState) -> Self {
		Self {
			state: Mutex::new(state),
		}
	}
}

impl ServiceStateStore for MemoryServiceStateStore {
	fn best_chain_height_ever(&self) -> BlockHeight {
		self.state.lock().best_chain_height_ever
	}

	fn maybe_increment_best_chain_height_ever(&self, height: BlockHeight) -> bool {
		self.state.lock().raise_height(height)
	}

	fn last_used(&self) -> Option<DateTime<Utc>> {
		self.state.lock().last_used
	}

	fn touch_last_used(&self) {
		self.state.lock().last_used = Some(Utc::now());
	}
}
