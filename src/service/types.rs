use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub type BlockHeight = u32;

/// Signed amount in the smallest currency unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(pub i64);

impl Amount {
	pub const ZERO: Amount = Amount(0);

	pub fn is_positive(&self) -> bool {
		self.0 > 0
	}

	pub fn saturating_add(self, other: Amount) -> Amount {
		Amount(self.0.saturating_add(other.0))
	}
}

/// Hash of a transaction as reported by the wallet.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&hex::encode(self.0))
	}
}

impl fmt::Debug for TxHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "TxHash({})", self)
	}
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; 32]);

impl fmt::Display for BlockHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&hex::encode(self.0))
	}
}

impl fmt::Debug for BlockHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "BlockHash({})", self)
	}
}

/// Encoded receiving address, opaque to the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// How deeply the network has accepted a wallet transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceType {
	/// Included in the best chain
	Building,
	/// Seen on the network, not yet in a block
	Pending,
	/// Conflicts with the best chain
	Dead,
	Unknown,
}

/// A wallet transaction as delivered with coins-received/sent events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletTransaction {
	pub hash: TxHash,
	/// Net value of the transaction to the wallet
	pub value: Amount,
	/// Wallet address that received the funds, if one can be attributed
	pub receiving_address: Option<Address>,
	pub confidence: ConfidenceType,
}

/// Serialized transaction handed to the peer engine for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
	pub hash: TxHash,
	pub raw: Vec<u8>,
}

/// Handle returned by the peer engine for an announced transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastHandle {
	pub tx_hash: TxHash,
}

/// A block header as kept by the local chain store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlock {
	pub hash: BlockHash,
	pub height: BlockHeight,
	pub time: DateTime<Utc>,
}

/// Snapshot of a connected peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
	pub address: String,
	pub best_height: BlockHeight,
	pub user_agent: Option<String>,
	pub ping: Option<Duration>,
}

/// Identifies a listener registered with a collaborator, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Service bits a peer must advertise to be connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeServices(pub u64);

impl NodeServices {
	pub const NETWORK: NodeServices = NodeServices(1);
	pub const BLOOM: NodeServices = NodeServices(1 << 2);

	pub fn union(self, other: NodeServices) -> NodeServices {
		NodeServices(self.0 | other.0)
	}

	pub fn contains(&self, other: NodeServices) -> bool {
		self.0 & other.0 == other.0
	}
}

/// Environmental condition that forbids running the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Impediment {
	Network,
	Storage,
}

/// Set of currently active impediments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpedimentSet(BTreeSet<Impediment>);

impl ImpedimentSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn contains(&self, impediment: Impediment) -> bool {
		self.0.contains(&impediment)
	}

	/// Returns true if the impediment was not present before.
	pub fn insert(&mut self, impediment: Impediment) -> bool {
		self.0.insert(impediment)
	}

	/// Returns true if the impediment was present.
	pub fn remove(&mut self, impediment: Impediment) -> bool {
		self.0.remove(&impediment)
	}

	pub fn iter(&self) -> impl Iterator<Item = Impediment> + '_ {
		self.0.iter().copied()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}
}

impl FromIterator<Impediment> for ImpedimentSet {
	fn from_iter<I: IntoIterator<Item = Impediment>>(iter: I) -> Self {
		Self(iter.into_iter().collect())
	}
}

/// Immutable snapshot of the local chain as seen by the service.
///
/// Recreated on every query; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainState {
	pub best_chain_date: DateTime<Utc>,
	pub best_chain_height: BlockHeight,
	/// True while the local chain is behind the best height ever observed
	pub replaying: bool,
	pub impediments: ImpedimentSet,
}

/// Lifecycle state of the sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
	Stopped,
	Starting,
	Running,
	Stopping,
}

/// Memory pressure levels reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrimMemoryLevel {
	RunningModerate,
	RunningLow,
	RunningCritical,
	UiHidden,
	Background,
	Moderate,
	Complete,
}

/// Errors reported by chain-store collaborators
#[derive(Debug, thiserror::Error)]
pub enum ChainStoreError {
	#[error("Chain store corrupt: {0}")]
	Corrupt(String),

	#[error("Block not found: {0}")]
	BlockNotFound(BlockHash),

	#[error("Chain store closed")]
	Closed,

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

/// Errors surfaced by the sync service
#[derive(Debug, thiserror::Error)]
pub enum SyncServiceError {
	#[error("Chain store at {path:?} cannot be created: {source}")]
	ChainStoreCorrupt {
		path: PathBuf,
		#[source]
		source: ChainStoreError,
	},

	#[error("Chain store error: {0}")]
	ChainStore(#[from] ChainStoreError),

	#[error("Service is shutting down")]
	ShutdownInProgress,

	#[error("Peer group error: {0}")]
	PeerGroup(String),

	#[error("Configuration error: {0}")]
	Config(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}
