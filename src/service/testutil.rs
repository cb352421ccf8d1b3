//! In-memory collaborators for service tests.

use crate::service::collaborators::{
	AddressBook, ChainStore, ChainStoreProvider, DiagnosticsReporter, DownloadListener,
	NotificationPresenter, PeerConnectivityListener, PeerGroup, PeerGroupConfig, PeerGroupFactory,
	StartScheduler, Wallet, WalletEventListener,
};
use crate::service::config::ServiceConfig;
use crate::service::controller::{Collaborators, SyncLifecycleController};
use crate::service::notification::CoinsReceivedNotification;
use crate::service::state_store::MemoryServiceStateStore;
use crate::service::types::{
	Address, Amount, BlockHash, BlockHeight, BroadcastHandle, ChainStoreError, ListenerId,
	PeerInfo, StoredBlock, Transaction, TxHash, WalletTransaction,
};

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "spv_sync_service=debug".parse().unwrap()),
		)
		.with_test_writer()
		.try_init();
}

/// Let spawned tasks run; with paused time this only advances the clock a little.
pub async fn settle() {
	tokio::time::sleep(Duration::from_millis(10)).await;
}

pub fn peer(address: &str) -> PeerInfo {
	PeerInfo {
		address: address.to_string(),
		best_height: 0,
		user_agent: Some("/Groestlcoin:2.21.0/".to_string()),
		ping: None,
	}
}

pub fn block(height: BlockHeight) -> StoredBlock {
	let mut hash = [0u8; 32];
	hash[..4].copy_from_slice(&height.to_be_bytes());
	StoredBlock {
		hash: BlockHash(hash),
		height,
		time: Utc
			.timestamp_opt(1_600_000_000 + i64::from(height) * 60, 0)
			.unwrap(),
	}
}

/// Ordered record of collaborator calls, shared by all mocks of one harness
#[derive(Default)]
pub struct EventLog(Mutex<Vec<String>>);

impl EventLog {
	pub fn push(&self, event: &str) {
		self.0.lock().push(event.to_string());
	}

	pub fn events(&self) -> Vec<String> {
		self.0.lock().clone()
	}

	pub fn position(&self, event: &str) -> Option<usize> {
		self.0.lock().iter().position(|e| e == event)
	}
}

fn next_listener_id(counter: &AtomicU64) -> ListenerId {
	ListenerId(counter.fetch_add(1, Ordering::SeqCst))
}

pub struct MockWallet {
	log: Arc<EventLog>,
	last_seen: Mutex<Option<BlockHeight>>,
	earliest_key_time: Mutex<Option<DateTime<Utc>>>,
	listeners: Mutex<Vec<(ListenerId, Arc<dyn WalletEventListener>)>>,
	next_id: AtomicU64,
}

impl MockWallet {
	pub fn new(log: Arc<EventLog>) -> Self {
		Self {
			log,
			last_seen: Mutex::new(None),
			earliest_key_time: Mutex::new(None),
			listeners: Mutex::new(Vec::new()),
			next_id: AtomicU64::new(1),
		}
	}

	pub fn set_last_seen_block_height(&self, height: Option<BlockHeight>) {
		*self.last_seen.lock() = height;
	}

	pub fn set_earliest_key_time(&self, time: Option<DateTime<Utc>>) {
		*self.earliest_key_time.lock() = time;
	}

	pub fn listener_count(&self) -> usize {
		self.listeners.lock().len()
	}

	pub fn receive(&self, tx: &WalletTransaction) {
		let listeners: Vec<_> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
		for listener in listeners {
			listener.on_coins_received(tx);
		}
	}

	pub fn send(&self, tx: &WalletTransaction) {
		let listeners: Vec<_> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
		for listener in listeners {
			listener.on_coins_sent(tx);
		}
	}
}

impl Wallet for MockWallet {
	fn last_seen_block_height(&self) -> Option<BlockHeight> {
		*self.last_seen.lock()
	}

	fn balance(&self) -> Amount {
		Amount(1_250_000_000)
	}

	fn transaction_value(&self, _tx: &Transaction) -> Amount {
		Amount(-10_000)
	}

	fn earliest_key_creation_time(&self) -> Option<DateTime<Utc>> {
		*self.earliest_key_time.lock()
	}

	fn add_event_listener(&self, listener: Arc<dyn WalletEventListener>) -> ListenerId {
		let id = next_listener_id(&self.next_id);
		self.listeners.lock().push((id, listener));
		id
	}

	fn remove_event_listener(&self, id: ListenerId) {
		self.listeners.lock().retain(|(listener_id, _)| *listener_id != id);
		self.log.push("wallet listener removed");
	}
}

pub struct MockChainStore {
	log: Arc<EventLog>,
	blocks: Mutex<Vec<StoredBlock>>,
	corrupt: AtomicBool,
	fail_previous_at: Mutex<Option<BlockHeight>>,
	closed: AtomicBool,
}

impl MockChainStore {
	pub fn new(log: Arc<EventLog>) -> Self {
		Self {
			log,
			blocks: Mutex::new(vec![block(1)]),
			corrupt: AtomicBool::new(false),
			fail_previous_at: Mutex::new(None),
			closed: AtomicBool::new(false),
		}
	}

	/// Append blocks until the head is at `height`.
	pub fn extend_to(&self, height: BlockHeight) {
		let mut blocks = self.blocks.lock();
		let mut next = blocks.last().map_or(1, |b| b.height + 1);
		while next <= height {
			blocks.push(block(next));
			next += 1;
		}
	}

	pub fn set_corrupt(&self, corrupt: bool) {
		self.corrupt.store(corrupt, Ordering::SeqCst);
	}

	/// Make `previous` fail for blocks at or below `height`.
	pub fn fail_previous_at_or_below(&self, height: BlockHeight) {
		*self.fail_previous_at.lock() = Some(height);
	}

	fn reopen(&self) {
		self.closed.store(false, Ordering::SeqCst);
	}
}

impl ChainStore for MockChainStore {
	fn head(&self) -> Result<StoredBlock, ChainStoreError> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(ChainStoreError::Closed);
		}
		if self.corrupt.load(Ordering::SeqCst) {
			return Err(ChainStoreError::Corrupt("unreadable head".to_string()));
		}
		self.blocks
			.lock()
			.last()
			.cloned()
			.ok_or_else(|| ChainStoreError::Corrupt("empty store".to_string()))
	}

	fn previous(&self, block: &StoredBlock) -> Result<Option<StoredBlock>, ChainStoreError> {
		if let Some(limit) = *self.fail_previous_at.lock() {
			if block.height <= limit {
				return Err(ChainStoreError::BlockNotFound(block.hash));
			}
		}
		Ok(self
			.blocks
			.lock()
			.iter()
			.find(|b| b.height + 1 == block.height)
			.cloned())
	}

	fn close(&self) -> Result<(), ChainStoreError> {
		self.closed.store(true, Ordering::SeqCst);
		self.log.push("chain closed");
		Ok(())
	}
}

pub struct MockChainStoreProvider {
	log: Arc<EventLog>,
	store: Arc<MockChainStore>,
	exists: AtomicBool,
	opened: AtomicUsize,
	deletions: AtomicUsize,
	checkpoints_loaded: AtomicUsize,
}

impl MockChainStoreProvider {
	pub fn new(log: Arc<EventLog>, store: Arc<MockChainStore>) -> Self {
		Self {
			log,
			store,
			exists: AtomicBool::new(true),
			opened: AtomicUsize::new(0),
			deletions: AtomicUsize::new(0),
			checkpoints_loaded: AtomicUsize::new(0),
		}
	}

	pub fn set_exists(&self, exists: bool) {
		self.exists.store(exists, Ordering::SeqCst);
	}

	pub fn opened(&self) -> usize {
		self.opened.load(Ordering::SeqCst)
	}

	pub fn deletions(&self) -> usize {
		self.deletions.load(Ordering::SeqCst)
	}

	pub fn checkpoints_loaded(&self) -> usize {
		self.checkpoints_loaded.load(Ordering::SeqCst)
	}
}

impl ChainStoreProvider for MockChainStoreProvider {
	fn exists(&self, _path: &Path) -> bool {
		self.exists.load(Ordering::SeqCst)
	}

	fn open(&self, _path: &Path) -> Result<Arc<dyn ChainStore>, ChainStoreError> {
		self.opened.fetch_add(1, Ordering::SeqCst);
		self.exists.store(true, Ordering::SeqCst);
		self.store.reopen();
		let store: Arc<dyn ChainStore> = self.store.clone();
		Ok(store)
	}

	fn load_checkpoints(
		&self,
		_store: &dyn ChainStore,
		_earliest_key_time: DateTime<Utc>,
	) -> Result<(), ChainStoreError> {
		self.checkpoints_loaded.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	fn delete(&self, _path: &Path) -> Result<(), ChainStoreError> {
		self.deletions.fetch_add(1, Ordering::SeqCst);
		self.exists.store(false, Ordering::SeqCst);
		self.log.push("chain deleted");
		Ok(())
	}
}

type ConnectivityListeners = Vec<(ListenerId, Arc<dyn PeerConnectivityListener>)>;

pub struct MockPeerGroup {
	log: Arc<EventLog>,
	config: Mutex<Option<PeerGroupConfig>>,
	wallet_attached: AtomicBool,
	connectivity: Mutex<ConnectivityListeners>,
	last_connectivity: Mutex<Option<Arc<dyn PeerConnectivityListener>>>,
	download: Mutex<Option<(ListenerId, Arc<dyn DownloadListener>)>>,
	peers: Mutex<Vec<PeerInfo>>,
	broadcasts: Mutex<Vec<TxHash>>,
	stop_requested: AtomicBool,
	stop_delay: Arc<Mutex<Duration>>,
	next_id: AtomicU64,
}

impl MockPeerGroup {
	fn new(log: Arc<EventLog>, stop_delay: Arc<Mutex<Duration>>) -> Self {
		Self {
			log,
			config: Mutex::new(None),
			wallet_attached: AtomicBool::new(false),
			connectivity: Mutex::new(Vec::new()),
			last_connectivity: Mutex::new(None),
			download: Mutex::new(None),
			peers: Mutex::new(Vec::new()),
			broadcasts: Mutex::new(Vec::new()),
			stop_requested: AtomicBool::new(false),
			stop_delay,
			next_id: AtomicU64::new(1),
		}
	}

	pub fn config(&self) -> Option<PeerGroupConfig> {
		self.config.lock().clone()
	}

	pub fn wallet_attached(&self) -> bool {
		self.wallet_attached.load(Ordering::SeqCst)
	}

	pub fn stop_requested(&self) -> bool {
		self.stop_requested.load(Ordering::SeqCst)
	}

	pub fn broadcasts(&self) -> Vec<TxHash> {
		self.broadcasts.lock().clone()
	}

	/// The most recently registered connectivity listener, even after removal
	pub fn connectivity_listener(&self) -> Option<Arc<dyn PeerConnectivityListener>> {
		self.last_connectivity.lock().clone()
	}

	fn connectivity_listeners(&self) -> Vec<Arc<dyn PeerConnectivityListener>> {
		self.connectivity.lock().iter().map(|(_, l)| l.clone()).collect()
	}

	pub fn connect(&self, peer: PeerInfo) {
		let count = {
			let mut peers = self.peers.lock();
			peers.push(peer.clone());
			peers.len()
		};
		for listener in self.connectivity_listeners() {
			listener.on_peer_connected(&peer, count);
		}
	}

	pub fn disconnect_all(&self) {
		loop {
			let (peer, count) = {
				let mut peers = self.peers.lock();
				match peers.pop() {
					Some(peer) => (peer, peers.len()),
					None => break,
				}
			};
			for listener in self.connectivity_listeners() {
				listener.on_peer_disconnected(&peer, count);
			}
		}
	}

	fn download_listener(&self) -> Option<Arc<dyn DownloadListener>> {
		self.download.lock().as_ref().map(|(_, l)| l.clone())
	}

	pub fn report_download_started(&self, blocks_left: u64) {
		if let Some(listener) = self.download_listener() {
			listener.on_chain_download_started(&peer("10.0.0.9:1331"), blocks_left);
		}
	}

	pub fn report_blocks_downloaded(&self, blocks_left: u64) {
		if let Some(listener) = self.download_listener() {
			listener.on_blocks_downloaded(&peer("10.0.0.9:1331"), blocks_left);
		}
	}
}

#[async_trait::async_trait]
impl PeerGroup for MockPeerGroup {
	fn configure(&self, config: &PeerGroupConfig) {
		*self.config.lock() = Some(config.clone());
		self.log.push("peer group configured");
	}

	fn add_wallet(&self, _wallet: Arc<dyn Wallet>) {
		self.wallet_attached.store(true, Ordering::SeqCst);
	}

	fn remove_wallet(&self) {
		self.wallet_attached.store(false, Ordering::SeqCst);
		self.log.push("wallet removed from peer group");
	}

	fn add_connectivity_listener(&self, listener: Arc<dyn PeerConnectivityListener>) -> ListenerId {
		let id = next_listener_id(&self.next_id);
		*self.last_connectivity.lock() = Some(listener.clone());
		self.connectivity.lock().push((id, listener));
		id
	}

	fn remove_listener(&self, id: ListenerId) {
		self.connectivity.lock().retain(|(listener_id, _)| *listener_id != id);
		let mut download = self.download.lock();
		if download.as_ref().is_some_and(|(listener_id, _)| *listener_id == id) {
			*download = None;
		}
	}

	fn start_async(&self) {
		self.log.push("peer group start_async");
	}

	fn start_blockchain_download(&self, listener: Arc<dyn DownloadListener>) -> ListenerId {
		let id = next_listener_id(&self.next_id);
		*self.download.lock() = Some((id, listener));
		self.log.push("download started");
		id
	}

	fn stop_async(&self) {
		self.stop_requested.store(true, Ordering::SeqCst);
		self.log.push("peer group stop_async");
	}

	async fn stop(&self) {
		let delay = *self.stop_delay.lock();
		tokio::time::sleep(delay).await;
		self.stop_requested.store(true, Ordering::SeqCst);
		self.log.push("peer group stopped");
	}

	fn connected_peers(&self) -> Vec<PeerInfo> {
		self.peers.lock().clone()
	}

	fn broadcast_transaction(&self, tx: &Transaction) -> BroadcastHandle {
		self.broadcasts.lock().push(tx.hash);
		BroadcastHandle { tx_hash: tx.hash }
	}
}

pub struct MockPeerGroupFactory {
	log: Arc<EventLog>,
	created: Mutex<Vec<Arc<MockPeerGroup>>>,
	stop_delay: Arc<Mutex<Duration>>,
}

impl MockPeerGroupFactory {
	pub fn new(log: Arc<EventLog>) -> Self {
		Self {
			log,
			created: Mutex::new(Vec::new()),
			stop_delay: Arc::new(Mutex::new(Duration::ZERO)),
		}
	}

	/// Make `stop()` of every peer group, existing or future, take `delay`
	pub fn set_stop_delay(&self, delay: Duration) {
		*self.stop_delay.lock() = delay;
	}

	pub fn created(&self) -> usize {
		self.created.lock().len()
	}

	pub fn latest(&self) -> Option<Arc<MockPeerGroup>> {
		self.created.lock().last().cloned()
	}

	/// Peer groups created and not yet asked to stop
	pub fn running(&self) -> usize {
		self.created
			.lock()
			.iter()
			.filter(|group| !group.stop_requested())
			.count()
	}
}

impl PeerGroupFactory for MockPeerGroupFactory {
	fn create(&self, _chain: Arc<dyn ChainStore>) -> Result<Arc<dyn PeerGroup>, String> {
		let group = Arc::new(MockPeerGroup::new(self.log.clone(), Arc::clone(&self.stop_delay)));
		self.created.lock().push(group.clone());
		self.log.push("peer group created");
		let group: Arc<dyn PeerGroup> = group;
		Ok(group)
	}
}

#[derive(Default)]
pub struct MockPresenter {
	shown: Mutex<Vec<CoinsReceivedNotification>>,
	cancellations: AtomicUsize,
	peers_shown: Mutex<Vec<usize>>,
	peer_cancellations: AtomicUsize,
}

impl MockPresenter {
	pub fn shown(&self) -> Vec<CoinsReceivedNotification> {
		self.shown.lock().clone()
	}

	pub fn cancellations(&self) -> usize {
		self.cancellations.load(Ordering::SeqCst)
	}

	pub fn peers_shown(&self) -> Vec<usize> {
		self.peers_shown.lock().clone()
	}

	pub fn peer_cancellations(&self) -> usize {
		self.peer_cancellations.load(Ordering::SeqCst)
	}
}

impl NotificationPresenter for MockPresenter {
	fn show_coins_received(&self, notification: &CoinsReceivedNotification) {
		self.shown.lock().push(notification.clone());
	}

	fn cancel_coins_received(&self) {
		self.cancellations.fetch_add(1, Ordering::SeqCst);
	}

	fn show_peers_connected(&self, peer_count: usize) {
		self.peers_shown.lock().push(peer_count);
	}

	fn cancel_peers_connected(&self) {
		self.peer_cancellations.fetch_add(1, Ordering::SeqCst);
	}
}

#[derive(Default)]
pub struct MockDiagnostics {
	traces: Mutex<Vec<String>>,
}

impl MockDiagnostics {
	pub fn traces(&self) -> Vec<String> {
		self.traces.lock().clone()
	}
}

impl DiagnosticsReporter for MockDiagnostics {
	fn report_background_trace(&self, message: &str) {
		self.traces.lock().push(message.to_string());
	}
}

pub struct MockScheduler {
	log: Arc<EventLog>,
	scheduled: Mutex<Vec<Duration>>,
}

impl MockScheduler {
	pub fn new(log: Arc<EventLog>) -> Self {
		Self {
			log,
			scheduled: Mutex::new(Vec::new()),
		}
	}

	pub fn scheduled(&self) -> Vec<Duration> {
		self.scheduled.lock().clone()
	}
}

impl StartScheduler for MockScheduler {
	fn schedule_start(&self, after: Duration) {
		self.scheduled.lock().push(after);
		self.log.push("start scheduled");
	}
}

#[derive(Default)]
pub struct MockAddressBook {
	labels: Mutex<HashMap<Address, String>>,
}

impl MockAddressBook {
	pub fn insert(&self, address: Address, label: &str) {
		self.labels.lock().insert(address, label.to_string());
	}
}

impl AddressBook for MockAddressBook {
	fn resolve_label(&self, address: &Address) -> Option<String> {
		self.labels.lock().get(address).cloned()
	}
}

/// A controller wired to in-memory collaborators
pub struct TestHarness {
	pub controller: SyncLifecycleController,
	pub log: Arc<EventLog>,
	pub wallet: Arc<MockWallet>,
	pub store: Arc<MockChainStore>,
	pub provider: Arc<MockChainStoreProvider>,
	pub factory: Arc<MockPeerGroupFactory>,
	pub presenter: Arc<MockPresenter>,
	pub diagnostics: Arc<MockDiagnostics>,
	pub scheduler: Arc<MockScheduler>,
	pub state_store: Arc<MemoryServiceStateStore>,
}

impl TestHarness {
	pub fn new(config: ServiceConfig) -> Self {
		let log = Arc::new(EventLog::default());
		let wallet = Arc::new(MockWallet::new(log.clone()));
		let store = Arc::new(MockChainStore::new(log.clone()));
		let provider = Arc::new(MockChainStoreProvider::new(log.clone(), store.clone()));
		let factory = Arc::new(MockPeerGroupFactory::new(log.clone()));
		let presenter = Arc::new(MockPresenter::default());
		let diagnostics = Arc::new(MockDiagnostics::default());
		let scheduler = Arc::new(MockScheduler::new(log.clone()));
		let state_store = Arc::new(MemoryServiceStateStore::default());
		let start_scheduler: Arc<dyn StartScheduler> = scheduler.clone();

		let controller = SyncLifecycleController::new(
			config,
			Collaborators {
				wallet: wallet.clone(),
				chain_stores: provider.clone(),
				peer_groups: factory.clone(),
				presenter: presenter.clone(),
				diagnostics: diagnostics.clone(),
				state_store: state_store.clone(),
				address_book: None,
				scheduler: Some(start_scheduler),
			},
		)
		.expect("valid test configuration");

		Self {
			controller,
			log,
			wallet,
			store,
			provider,
			factory,
			presenter,
			diagnostics,
			scheduler,
			state_store,
		}
	}
}
