//! Service configuration.
//!
//! `ServiceConfig` collects every tunable of the sync service: where the chain store lives,
//! how the peer group is configured, throttling and idle policy. It deserializes from JSON with
//! per-field defaults so a partial file only overrides what it names.

use crate::service::types::{NodeServices, SyncServiceError};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// How the peer engine fetches blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
	/// Filtered blocks via bloom filters
	Bloom,
	/// Full blocks
	Full,
}

/// Idle detection policy, in ticks of the activity history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdlePolicy {
	/// Entries required before an idle verdict is possible
	pub min_collect_history: usize,
	/// Most recent entry index still considered for block activity
	pub idle_block_timeout: usize,
	/// Most recent entry index still considered for transaction activity
	pub idle_transaction_timeout: usize,
}

impl IdlePolicy {
	pub fn max_history_size(&self) -> usize {
		self.idle_block_timeout.max(self.idle_transaction_timeout)
	}
}

impl Default for IdlePolicy {
	fn default() -> Self {
		Self {
			min_collect_history: 2,
			idle_block_timeout: 1,
			idle_transaction_timeout: 5,
		}
	}
}

/// Configuration for the sync service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
	/// Directory holding the chain store and persisted service state
	pub data_dir: PathBuf,
	pub chain_store_filename: String,
	/// Master switch for starting the peer group at all
	pub blockchain_sync_enabled: bool,
	pub sync_mode: SyncMode,
	pub max_connected_peers: usize,
	pub trusted_peer_host: Option<String>,
	pub trusted_peer_only: bool,
	pub peer_connect_timeout_ms: u64,
	pub peer_discovery_timeout_ms: u64,
	/// Minimum spacing of blockchain-state broadcasts during download
	pub broadcast_throttle_ms: u64,
	/// Activity history tick period
	pub tick_interval_secs: u64,
	/// Delay without qualifying activity after which the service stops itself
	pub idle_shutdown_secs: u64,
	pub idle: IdlePolicy,
	pub connectivity_notification_enabled: bool,
	/// Appended to notification titles, e.g. "testnet"
	pub network_flavor: Option<String>,
	pub coin_decimals: u32,
	pub coin_code: String,
}

impl Default for ServiceConfig {
	fn default() -> Self {
		Self {
			data_dir: PathBuf::from("blockstore"),
			chain_store_filename: "blockchain".to_string(),
			blockchain_sync_enabled: true,
			sync_mode: SyncMode::Bloom,
			max_connected_peers: 6,
			trusted_peer_host: None,
			trusted_peer_only: false,
			peer_connect_timeout_ms: 15_000,
			peer_discovery_timeout_ms: 10_000,
			broadcast_throttle_ms: 1_000,
			tick_interval_secs: 60,
			idle_shutdown_secs: 600,
			idle: IdlePolicy::default(),
			connectivity_notification_enabled: false,
			network_flavor: None,
			coin_decimals: 8,
			coin_code: "GRS".to_string(),
		}
	}
}

impl ServiceConfig {
	/// Load configuration from a JSON file.
	pub async fn load(path: &Path) -> Result<Self, SyncServiceError> {
		let content = tokio::fs::read_to_string(path).await?;
		let config: ServiceConfig = serde_json::from_str(&content)?;
		config.validate()?;
		info!("Loaded service configuration from {:?}", path);
		Ok(config)
	}

	/// Reject settings the service cannot run with.
	pub fn validate(&self) -> Result<(), SyncServiceError> {
		if self.chain_store_filename.trim().is_empty() {
			return Err(SyncServiceError::Config(
				"chain_store_filename must not be empty".to_string(),
			));
		}
		if self.max_connected_peers == 0 {
			return Err(SyncServiceError::Config(
				"max_connected_peers must be at least 1".to_string(),
			));
		}
		if self.tick_interval_secs == 0 {
			return Err(SyncServiceError::Config(
				"tick_interval_secs must be at least 1".to_string(),
			));
		}
		if self.coin_decimals > 18 {
			return Err(SyncServiceError::Config(
				"coin_decimals must not exceed 18".to_string(),
			));
		}
		if self.idle.max_history_size() == 0 {
			return Err(SyncServiceError::Config(
				"idle policy must keep at least one history entry".to_string(),
			));
		}
		Ok(())
	}

	pub fn chain_store_path(&self) -> PathBuf {
		self.data_dir.join(&self.chain_store_filename)
	}

	pub fn has_trusted_peer(&self) -> bool {
		self.trusted_peer_host
			.as_deref()
			.is_some_and(|host| !host.trim().is_empty())
	}

	pub fn connect_trusted_peer_only(&self) -> bool {
		self.has_trusted_peer() && self.trusted_peer_only
	}

	pub fn max_connections(&self) -> usize {
		if self.connect_trusted_peer_only() {
			1
		} else {
			self.max_connected_peers
		}
	}

	pub fn required_services(&self) -> NodeServices {
		match self.sync_mode {
			SyncMode::Bloom => NodeServices::NETWORK.union(NodeServices::BLOOM),
			SyncMode::Full => NodeServices::NETWORK,
		}
	}

	pub fn peer_connect_timeout(&self) -> Duration {
		Duration::from_millis(self.peer_connect_timeout_ms)
	}

	pub fn peer_discovery_timeout(&self) -> Duration {
		Duration::from_millis(self.peer_discovery_timeout_ms)
	}

	pub fn broadcast_throttle(&self) -> Duration {
		Duration::from_millis(self.broadcast_throttle_ms)
	}

	pub fn tick_interval(&self) -> Duration {
		Duration::from_secs(self.tick_interval_secs)
	}

	pub fn idle_shutdown_delay(&self) -> Duration {
		Duration::from_secs(self.idle_shutdown_secs)
	}

	pub fn flavor_suffix(&self) -> String {
		match &self.network_flavor {
			Some(flavor) => format!(" [{}]", flavor),
			None => String::new(),
		}
	}
}
