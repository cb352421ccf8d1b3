//! Interfaces of the collaborators the sync service orchestrates.
//!
//! The wallet model, the peer-wire engine, the on-disk chain store and the notification UI are
//! implemented elsewhere. The service only talks to them through these traits, which keeps the
//! lifecycle logic testable with in-memory fakes.

use crate::service::types::{
	Address, Amount, BlockHeight, BroadcastHandle, ChainStoreError, ListenerId, NodeServices,
	PeerInfo, StoredBlock, Transaction, WalletTransaction,
};
use crate::service::notification::CoinsReceivedNotification;

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Receives coins-received/sent events from the wallet
pub trait WalletEventListener: Send + Sync {
	fn on_coins_received(&self, tx: &WalletTransaction);
	fn on_coins_sent(&self, tx: &WalletTransaction);
}

/// Read-only view of the wallet plus event subscription
pub trait Wallet: Send + Sync {
	/// Height of the last block the wallet processed, `None` if it never saw one
	fn last_seen_block_height(&self) -> Option<BlockHeight>;
	fn balance(&self) -> Amount;
	fn transaction_value(&self, tx: &Transaction) -> Amount;
	/// Creation time of the oldest key, used to pick a checkpoint
	fn earliest_key_creation_time(&self) -> Option<DateTime<Utc>>;
	fn add_event_listener(&self, listener: Arc<dyn WalletEventListener>) -> ListenerId;
	fn remove_event_listener(&self, id: ListenerId);
}

/// An open block store
pub trait ChainStore: Send + Sync {
	/// Current chain head; errors here mean the store is unusable
	fn head(&self) -> Result<StoredBlock, ChainStoreError>;
	/// Parent of `block`, `None` at the start of the stored chain
	fn previous(&self, block: &StoredBlock) -> Result<Option<StoredBlock>, ChainStoreError>;
	fn close(&self) -> Result<(), ChainStoreError>;
}

/// Opens, seeds and deletes chain stores on disk
pub trait ChainStoreProvider: Send + Sync {
	fn exists(&self, path: &Path) -> bool;
	fn open(&self, path: &Path) -> Result<Arc<dyn ChainStore>, ChainStoreError>;
	/// Seed a freshly created store with checkpoints preceding `earliest_key_time`
	fn load_checkpoints(
		&self,
		store: &dyn ChainStore,
		earliest_key_time: DateTime<Utc>,
	) -> Result<(), ChainStoreError>;
	fn delete(&self, path: &Path) -> Result<(), ChainStoreError>;
}

/// Peer connect/disconnect callbacks
pub trait PeerConnectivityListener: Send + Sync {
	fn on_peer_connected(&self, peer: &PeerInfo, peer_count: usize);
	fn on_peer_disconnected(&self, peer: &PeerInfo, peer_count: usize);
}

/// Block download callbacks
pub trait DownloadListener: Send + Sync {
	/// A download session begins with `blocks_left` blocks outstanding
	fn on_chain_download_started(&self, peer: &PeerInfo, blocks_left: u64);
	fn on_blocks_downloaded(&self, peer: &PeerInfo, blocks_left: u64);
}

/// Settings applied to a peer group before it starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerGroupConfig {
	pub max_connections: usize,
	pub required_services: NodeServices,
	pub trusted_peer_host: Option<String>,
	pub trusted_peer_only: bool,
	pub connect_timeout: Duration,
	pub discovery_timeout: Duration,
}

/// The running sync engine
#[async_trait::async_trait]
pub trait PeerGroup: Send + Sync {
	fn configure(&self, config: &PeerGroupConfig);
	fn add_wallet(&self, wallet: Arc<dyn Wallet>);
	fn remove_wallet(&self);
	fn add_connectivity_listener(&self, listener: Arc<dyn PeerConnectivityListener>) -> ListenerId;
	fn remove_listener(&self, id: ListenerId);
	/// Begin connecting; returns without waiting
	fn start_async(&self);
	fn start_blockchain_download(&self, listener: Arc<dyn DownloadListener>) -> ListenerId;
	/// Request shutdown; returns without waiting
	fn stop_async(&self);
	/// Shut down and wait until all connections are closed
	async fn stop(&self);
	fn connected_peers(&self) -> Vec<PeerInfo>;
	fn broadcast_transaction(&self, tx: &Transaction) -> BroadcastHandle;
}

/// Builds a peer group on top of an open chain store
pub trait PeerGroupFactory: Send + Sync {
	fn create(&self, chain: Arc<dyn ChainStore>) -> Result<Arc<dyn PeerGroup>, String>;
}

/// Presents notifications to the user
pub trait NotificationPresenter: Send + Sync {
	fn show_coins_received(&self, notification: &CoinsReceivedNotification);
	fn cancel_coins_received(&self);
	fn show_peers_connected(&self, peer_count: usize);
	fn cancel_peers_connected(&self);
}

/// Collects non-fatal diagnostics such as consistency mismatches
pub trait DiagnosticsReporter: Send + Sync {
	fn report_background_trace(&self, message: &str);
}

/// Resolves user-assigned labels for addresses
pub trait AddressBook: Send + Sync {
	fn resolve_label(&self, address: &Address) -> Option<String>;
}

/// Arranges for the service to be started again later
pub trait StartScheduler: Send + Sync {
	fn schedule_start(&self, after: Duration);
}
