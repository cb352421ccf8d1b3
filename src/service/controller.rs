//! Sync lifecycle controller and integration point for all service components.
//!
//! This module defines the `SyncLifecycleController`, which owns the peer group for as long as the
//! environment allows it to run. It subscribes to the impediment tracker and starts the peer group
//! when no impediment is active, stops it as soon as one appears, and tears everything down when
//! the service itself stops.
//!
//! The controller is responsible for:
//! - Opening the chain store and validating it before any sync starts
//! - Checking wallet and chain consistency before constructing the peer group
//! - Wiring the download tracker, connectivity and wallet listeners into the peer group
//! - Driving the activity history tick and stopping itself when idle
//! - Publishing peer count, blockchain state and download progress to subscribers
//! - Tearing down in a fixed order so the chain store is never closed under a running peer group
//!
//! The peer group handle being present is the one source of truth for "running"; the transition
//! marker only exists while a start or stop is in flight.

use crate::service::activity::ActivityHistory;
use crate::service::collaborators::{
    AddressBook, ChainStore, ChainStoreProvider, DiagnosticsReporter, DownloadListener,
    NotificationPresenter, PeerConnectivityListener, PeerGroup, PeerGroupConfig, PeerGroupFactory,
    StartScheduler, Wallet, WalletEventListener,
};
use crate::service::config::ServiceConfig;
use crate::service::download::{DownloadProgress, DownloadProgressTracker};
use crate::service::idle_timer::IdleShutdownTimer;
use crate::service::impediments::ImpedimentTracker;
use crate::service::notification::NotificationCoalescer;
use crate::service::signals::ServiceSignals;
use crate::service::state_store::ServiceStateStore;
use crate::service::tasks::spawn_or_log;
use crate::service::types::{
    BlockchainState, BroadcastHandle, ChainStoreError, ConfidenceType, ImpedimentSet, ListenerId,
    PeerInfo, StoredBlock, SyncServiceError, SyncState, Transaction, TrimMemoryLevel,
    WalletTransaction,
};
use crate::utils::format_coin_amount;

use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);

/// External collaborators the controller orchestrates
pub struct Collaborators {
    pub wallet: Arc<dyn Wallet>,
    pub chain_stores: Arc<dyn ChainStoreProvider>,
    pub peer_groups: Arc<dyn PeerGroupFactory>,
    pub presenter: Arc<dyn NotificationPresenter>,
    pub diagnostics: Arc<dyn DiagnosticsReporter>,
    pub state_store: Arc<dyn ServiceStateStore>,
    pub address_book: Option<Arc<dyn AddressBook>>,
    pub scheduler: Option<Arc<dyn StartScheduler>>,
}

/// Delay before the next background start, derived from how long ago the wallet was used.
pub fn reschedule_delay(last_used_ago: Duration) -> Duration {
    if last_used_ago < HOUR {
        15 * MINUTE
    } else if last_used_ago < 48 * HOUR {
        12 * HOUR
    } else {
        24 * HOUR
    }
}

/// Time from `now` until the next multiple of `interval` on the wall clock.
pub fn next_tick_delay(now: DateTime<Utc>, interval: Duration) -> Duration {
    let interval_ms = interval.as_millis().clamp(1, i64::MAX as u128) as i64;
    let into_interval = now.timestamp_millis().rem_euclid(interval_ms);
    Duration::from_millis((interval_ms - into_interval) as u64)
}

/// A running peer group together with the listeners registered on it
struct ActivePeerGroup {
    handle: Arc<dyn PeerGroup>,
    connectivity: Arc<PeerConnectivityHandler>,
    connectivity_id: ListenerId,
    download_id: ListenerId,
}

impl ActivePeerGroup {
    fn detach(&self) {
        self.handle.remove_listener(self.download_id);
        self.handle.remove_listener(self.connectivity_id);
        self.handle.remove_wallet();
    }
}

#[derive(Default)]
struct LifecycleSlot {
    tasks: Vec<JoinHandle<()>>,
    wallet_listener: Option<ListenerId>,
    started_at: Option<Instant>,
    tearing_down: bool,
}

struct ControllerInner {
    config: ServiceConfig,
    collaborators: Collaborators,

    // Services
    impediments: ImpedimentTracker,
    activity: ActivityHistory,
    download: DownloadProgressTracker,
    coalescer: NotificationCoalescer,
    idle_timer: IdleShutdownTimer,
    signals: ServiceSignals,

    // Lock order: lifecycle, then engine, then transition. Peer-group callbacks never take the
    // engine lock, so collaborator calls may be made while holding it.
    lifecycle: Mutex<LifecycleSlot>,
    engine: Mutex<Option<ActivePeerGroup>>,
    transition: Mutex<Option<SyncState>>,
    chain: Mutex<Option<Arc<dyn ChainStore>>>,

    active: AtomicBool,
    bound_clients: Arc<AtomicUsize>,
    reset_on_shutdown: AtomicBool,
}

/// Impediment-driven lifecycle controller for the sync engine.
///
/// Cheap to clone; all clones drive the same service.
#[derive(Clone)]
pub struct SyncLifecycleController {
    inner: Arc<ControllerInner>,
}

impl SyncLifecycleController {
    /// Create a stopped controller.
    pub fn new(
        config: ServiceConfig,
        collaborators: Collaborators,
    ) -> Result<Self, SyncServiceError> {
        config.validate()?;

        let inner = Arc::new_cyclic(|weak: &Weak<ControllerInner>| {
            let sink = weak.clone();
            let download =
                DownloadProgressTracker::new(config.broadcast_throttle(), move |progress| {
                    if let Some(inner) = sink.upgrade() {
                        inner.on_download_progress(progress);
                    }
                });

            let idle = weak.clone();
            let idle_timer = IdleShutdownTimer::new(config.idle_shutdown_delay(), move || {
                if let Some(inner) = idle.upgrade() {
                    inner.request_self_stop("idle shutdown timer");
                }
            });

            let coalescer = NotificationCoalescer::new(
                &config,
                Arc::clone(&collaborators.presenter),
                collaborators.address_book.clone(),
            );

            ControllerInner {
                impediments: ImpedimentTracker::new(),
                activity: ActivityHistory::new(config.idle),
                download,
                coalescer,
                idle_timer,
                signals: ServiceSignals::new(),
                lifecycle: Mutex::new(LifecycleSlot::default()),
                engine: Mutex::new(None),
                transition: Mutex::new(None),
                chain: Mutex::new(None),
                active: AtomicBool::new(false),
                bound_clients: Arc::new(AtomicUsize::new(0)),
                reset_on_shutdown: AtomicBool::new(false),
                config,
                collaborators,
            }
        });

        Ok(Self { inner })
    }

    /// Start the service; calling it again while running only handles the notification flag.
    ///
    /// Fails hard if the chain store cannot be opened, after deleting it. Rejected with
    /// `ShutdownInProgress` while a teardown is still releasing the previous run.
    pub fn start(&self, cancel_pending_coin_notification: bool) -> Result<(), SyncServiceError> {
        if cancel_pending_coin_notification {
            self.inner.coalescer.acknowledge();
        }

        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.tearing_down {
            info!("Service is still shutting down, not starting");
            return Err(SyncServiceError::ShutdownInProgress);
        }
        if self.inner.active.load(Ordering::SeqCst) {
            debug!("Service already started");
            return Ok(());
        }

        info!("Starting sync service");
        self.inner.open_chain_store()?;
        self.inner.active.store(true, Ordering::SeqCst);

        self.inner.signals.publish_peer_state(0);

        let wallet_listener = Arc::new(WalletActivityHandler {
            inner: Arc::downgrade(&self.inner),
        });
        let wallet = &self.inner.collaborators.wallet;
        lifecycle.wallet_listener = Some(wallet.add_event_listener(wallet_listener));
        info!(
            "Wallet balance {} {}",
            format_coin_amount(wallet.balance().0, self.inner.config.coin_decimals),
            self.inner.config.coin_code
        );

        lifecycle.tasks = [self.spawn_impediment_watch(), self.spawn_tick_loop()]
            .into_iter()
            .flatten()
            .collect();
        lifecycle.started_at = Some(Instant::now());

        self.inner.idle_timer.reset();
        self.inner.collaborators.state_store.touch_last_used();
        self.inner.broadcast_blockchain_state();
        Ok(())
    }

    /// Tear the service down; a no-op if it is not running.
    pub async fn stop(&self) -> Result<(), SyncServiceError> {
        self.inner.teardown().await
    }

    /// Mark the chain store for deletion, then stop.
    ///
    /// The store is deleted only after the peer group is released and the store is closed.
    pub async fn reset_blockchain(&self) -> Result<(), SyncServiceError> {
        info!("Blockchain reset requested");
        self.inner.reset_on_shutdown.store(true, Ordering::SeqCst);
        self.inner.teardown().await
    }

    /// Whether the service is started and not yet torn down
    pub fn is_running(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Lifecycle state of the sync engine
    pub fn state(&self) -> SyncState {
        self.inner.state()
    }

    /// Hand a transaction to the running peer group, `None` if no peer group is running.
    pub fn broadcast_transaction(&self, tx: &Transaction) -> Option<BroadcastHandle> {
        let handle = self.inner.peer_group_handle();
        match handle {
            Some(peer_group) => {
                let value = self.inner.collaborators.wallet.transaction_value(tx);
                info!(
                    "Broadcasting transaction {} ({} {})",
                    tx.hash,
                    format_coin_amount(value.0, self.inner.config.coin_decimals),
                    self.inner.config.coin_code
                );
                Some(peer_group.broadcast_transaction(tx))
            }
            None => {
                info!("Peer group not available, not broadcasting transaction {}", tx.hash);
                None
            }
        }
    }

    pub fn blockchain_state(&self) -> Option<BlockchainState> {
        self.inner.blockchain_state()
    }

    pub fn connected_peers(&self) -> Option<Vec<PeerInfo>> {
        self.inner
            .peer_group_handle()
            .map(|peer_group| peer_group.connected_peers())
    }

    /// Walk back from the chain head, returning at most `max` blocks.
    ///
    /// A read error ends the walk early; whatever was collected is returned.
    pub fn recent_blocks(&self, max: usize) -> Option<Vec<StoredBlock>> {
        let chain = self.inner.chain.lock().clone()?;
        let mut blocks = Vec::new();

        let mut cursor = match chain.head() {
            Ok(head) => Some(head),
            Err(e) => {
                warn!("Cannot read chain head: {}", e);
                None
            }
        };
        while blocks.len() < max {
            let Some(block) = cursor.take() else {
                break;
            };
            if blocks.len() + 1 < max {
                cursor = chain.previous(&block).unwrap_or_else(|e| {
                    warn!("Stopping block walk at height {}: {}", block.height, e);
                    None
                });
            }
            blocks.push(block);
        }

        Some(blocks)
    }

    /// Record one activity interval and stop the service if it has gone idle.
    pub fn tick(&self) {
        self.inner.on_tick();
    }

    /// React to host memory pressure.
    ///
    /// From `Background` upwards the service stops; while UI clients are bound the stop is
    /// retried with exponential backoff.
    pub fn on_trim_memory(&self, level: TrimMemoryLevel) {
        info!("Trim memory requested at level {:?}", level);
        if level < TrimMemoryLevel::Background {
            return;
        }

        let inner = Arc::clone(&self.inner);
        spawn_or_log("low memory stop", async move {
            let policy = ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_secs(1))
                .with_max_interval(MINUTE)
                .with_max_elapsed_time(None)
                .build();

            let controller = &inner;
            let should_stop = backoff::future::retry(policy, || async move {
                if !controller.active.load(Ordering::SeqCst) {
                    return Ok(false);
                }
                let bound = controller.bound_clients.load(Ordering::SeqCst);
                if bound > 0 {
                    debug!("{} clients bound, deferring low memory stop", bound);
                    return Err(backoff::Error::transient("clients bound"));
                }
                Ok::<bool, backoff::Error<&'static str>>(true)
            })
            .await;

            match should_stop {
                Ok(true) => {
                    warn!("Low memory, stopping service");
                    if let Err(e) = inner.teardown().await {
                        error!("Teardown after low memory failed: {}", e);
                    }
                }
                Ok(false) => debug!("Service already stopped"),
                Err(e) => error!("Low memory stop abandoned: {}", e),
            }
        });
    }

    /// Register a bound UI client; self-initiated stops are skipped until the binding drops.
    pub fn bind(&self) -> ClientBinding {
        let bound = self.inner.bound_clients.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Client bound, {} bound", bound);
        ClientBinding {
            bound_clients: Arc::clone(&self.inner.bound_clients),
        }
    }

    pub fn bound_clients(&self) -> usize {
        self.inner.bound_clients.load(Ordering::SeqCst)
    }

    pub fn impediment_tracker(&self) -> &ImpedimentTracker {
        &self.inner.impediments
    }

    pub fn activity_history(&self) -> &ActivityHistory {
        &self.inner.activity
    }

    pub fn coalescer(&self) -> &NotificationCoalescer {
        &self.inner.coalescer
    }

    pub fn download_progress(&self) -> Option<DownloadProgress> {
        self.inner.download.progress()
    }

    pub fn subscribe_peer_state(&self) -> watch::Receiver<usize> {
        self.inner.signals.subscribe_peer_state()
    }

    pub fn subscribe_blockchain_state(&self) -> watch::Receiver<Option<BlockchainState>> {
        self.inner.signals.subscribe_blockchain_state()
    }

    pub fn subscribe_download_progress(&self) -> watch::Receiver<Option<DownloadProgress>> {
        self.inner.signals.subscribe_download_progress()
    }

    fn spawn_impediment_watch(&self) -> Option<JoinHandle<()>> {
        let mut impediments = self.inner.impediments.subscribe();
        let weak = Arc::downgrade(&self.inner);
        spawn_or_log("impediment watch", async move {
            loop {
                // one snapshot per decision
                let current = impediments.borrow_and_update().clone();
                match weak.upgrade() {
                    Some(inner) => inner.on_impediments_changed(current),
                    None => break,
                }
                if impediments.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    fn spawn_tick_loop(&self) -> Option<JoinHandle<()>> {
        let interval = self.inner.config.tick_interval();
        let first_tick = Instant::now() + next_tick_delay(Utc::now(), interval);
        let weak = Arc::downgrade(&self.inner);
        spawn_or_log("activity tick", async move {
            let mut ticker = tokio::time::interval_at(first_tick, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(inner) => inner.on_tick(),
                    None => break,
                }
            }
        })
    }
}

impl ControllerInner {
    fn state(&self) -> SyncState {
        if let Some(transition) = *self.transition.lock() {
            return transition;
        }
        if self.engine.lock().is_some() {
            SyncState::Running
        } else {
            SyncState::Stopped
        }
    }

    fn peer_group_handle(&self) -> Option<Arc<dyn PeerGroup>> {
        self.engine
            .lock()
            .as_ref()
            .map(|active| Arc::clone(&active.handle))
    }

    fn open_chain_store(&self) -> Result<(), SyncServiceError> {
        let path = self.config.chain_store_path();
        let provider = &self.collaborators.chain_stores;
        let is_new = !provider.exists(&path);

        let store = provider
            .open(&path)
            .map_err(|source| self.discard_corrupt_store(&path, source))?;

        if is_new {
            if let Some(earliest_key_time) = self.collaborators.wallet.earliest_key_creation_time() {
                match provider.load_checkpoints(store.as_ref(), earliest_key_time) {
                    Ok(()) => info!("Checkpoints loaded for keys created {}", earliest_key_time),
                    Err(e) => error!("Problem loading checkpoints, continuing without: {}", e),
                }
            }
        }

        match store.head() {
            Ok(head) => info!(
                "Chain store {:?} opened at height {}{}",
                path,
                head.height,
                if is_new { " (created)" } else { "" }
            ),
            Err(source) => {
                if let Err(e) = store.close() {
                    warn!("Closing unreadable chain store failed: {}", e);
                }
                return Err(self.discard_corrupt_store(&path, source));
            }
        }

        *self.chain.lock() = Some(store);
        Ok(())
    }

    fn discard_corrupt_store(&self, path: &Path, source: ChainStoreError) -> SyncServiceError {
        error!("Chain store {:?} cannot be used, deleting: {}", path, source);
        if let Err(e) = self.collaborators.chain_stores.delete(path) {
            error!("Deleting chain store {:?} failed: {}", path, e);
        }
        SyncServiceError::ChainStoreCorrupt {
            path: path.to_path_buf(),
            source,
        }
    }

    fn chain_head(&self) -> Option<StoredBlock> {
        let chain = self.chain.lock().clone()?;
        chain
            .head()
            .map_err(|e| warn!("Cannot read chain head: {}", e))
            .ok()
    }

    fn blockchain_state(&self) -> Option<BlockchainState> {
        let head = self.chain_head()?;
        let best_ever = self.collaborators.state_store.best_chain_height_ever();
        Some(BlockchainState {
            best_chain_date: head.time,
            best_chain_height: head.height,
            replaying: head.height < best_ever,
            impediments: self.impediments.current_impediments(),
        })
    }

    fn broadcast_blockchain_state(&self) {
        if let Some(state) = self.blockchain_state() {
            self.signals.publish_blockchain_state(state);
        }
    }

    fn on_impediments_changed(self: &Arc<Self>, impediments: ImpedimentSet) {
        {
            let mut engine = self.engine.lock();
            if impediments.is_empty() && engine.is_none() {
                if !self.config.blockchain_sync_enabled {
                    debug!("Blockchain sync disabled, not starting peer group");
                } else if self.active.load(Ordering::SeqCst) {
                    *self.transition.lock() = Some(SyncState::Starting);
                    match self.start_peer_group() {
                        Ok(active) => *engine = Some(active),
                        Err(e) => error!("Failed to start peer group: {}", e),
                    }
                    *self.transition.lock() = None;
                }
            } else if !impediments.is_empty() && engine.is_some() {
                info!(
                    "Stopping peer group, impediments: {}",
                    impediments.iter().map(|i| format!("{:?}", i)).join(", ")
                );
                *self.transition.lock() = Some(SyncState::Stopping);
                if let Some(active) = engine.take() {
                    active.detach();
                    active.handle.stop_async();
                    active.connectivity.stop();
                }
                self.signals.publish_peer_state(0);
                *self.transition.lock() = None;
            }
        }

        self.broadcast_blockchain_state();
    }

    fn start_peer_group(self: &Arc<Self>) -> Result<ActivePeerGroup, SyncServiceError> {
        let chain = self
            .chain
            .lock()
            .clone()
            .ok_or(SyncServiceError::ChainStore(ChainStoreError::Closed))?;
        self.check_consistency(chain.as_ref());

        let handle = self
            .collaborators
            .peer_groups
            .create(Arc::clone(&chain))
            .map_err(SyncServiceError::PeerGroup)?;

        let peer_group_config = self.peer_group_config();
        info!(
            "Starting peer group, max {} connections{}",
            peer_group_config.max_connections,
            match &peer_group_config.trusted_peer_host {
                Some(host) if peer_group_config.trusted_peer_only =>
                    format!(", trusted peer {} only", host),
                Some(host) => format!(", trusted peer {}", host),
                None => String::new(),
            }
        );
        handle.configure(&peer_group_config);
        handle.add_wallet(Arc::clone(&self.collaborators.wallet));

        let connectivity = Arc::new(PeerConnectivityHandler {
            inner: Arc::downgrade(self),
            stopped: AtomicBool::new(false),
        });
        let connectivity_id = handle.add_connectivity_listener(connectivity.clone());

        handle.start_async();
        let download_id = handle.start_blockchain_download(Arc::new(DownloadHandler {
            inner: Arc::downgrade(self),
        }));

        Ok(ActivePeerGroup {
            handle,
            connectivity,
            connectivity_id,
            download_id,
        })
    }

    fn peer_group_config(&self) -> PeerGroupConfig {
        PeerGroupConfig {
            max_connections: self.config.max_connections(),
            required_services: self.config.required_services(),
            trusted_peer_host: self
                .config
                .trusted_peer_host
                .as_deref()
                .map(str::trim)
                .filter(|host| !host.is_empty())
                .map(str::to_string),
            trusted_peer_only: self.config.connect_trusted_peer_only(),
            connect_timeout: self.config.peer_connect_timeout(),
            discovery_timeout: self.config.peer_discovery_timeout(),
        }
    }

    /// Report a wallet that has seen a different height than the chain store.
    fn check_consistency(&self, chain: &dyn ChainStore) {
        let Some(wallet_height) = self.collaborators.wallet.last_seen_block_height() else {
            return;
        };
        match chain.head() {
            Ok(head) if head.height != wallet_height => {
                let message = format!(
                    "wallet/blockchain out of sync: {}/{}",
                    wallet_height, head.height
                );
                error!("{}", message);
                self.collaborators
                    .diagnostics
                    .report_background_trace(&message);
            }
            Ok(_) => {}
            Err(e) => warn!("Consistency check skipped, cannot read chain head: {}", e),
        }
    }

    fn on_download_progress(&self, progress: DownloadProgress) {
        if let Some(head) = self.chain_head() {
            if self
                .collaborators
                .state_store
                .maybe_increment_best_chain_height_ever(head.height)
            {
                debug!("Best chain height ever is now {}", head.height);
            }
            self.activity.register_best_chain_height(head.height);
        }
        self.broadcast_blockchain_state();
        self.signals.publish_download_progress(progress);
    }

    fn on_tick(self: &Arc<Self>) {
        if let Some(head) = self.chain_head() {
            self.activity.register_best_chain_height(head.height);
        }
        self.activity.tick();

        if self.activity.is_idle() {
            info!("Idling detected");
            self.request_self_stop("idle activity");
        }
    }

    /// Stop on our own initiative unless a client is bound.
    fn request_self_stop(self: &Arc<Self>, reason: &str) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let bound = self.bound_clients.load(Ordering::SeqCst);
        if bound > 0 {
            info!("{}: {} clients bound, not stopping", reason, bound);
            self.idle_timer.reset();
            return;
        }

        info!("{}: stopping service", reason);
        let inner = Arc::clone(self);
        spawn_or_log("service teardown", async move {
            if let Err(e) = inner.teardown().await {
                error!("Teardown failed: {}", e);
            }
        });
    }

    fn schedule_next_start(&self) {
        let Some(scheduler) = &self.collaborators.scheduler else {
            return;
        };
        let last_used_ago = self.collaborators.state_store.last_used_ago();
        let delay = reschedule_delay(last_used_ago);
        info!(
            "Last used {} minutes ago, rescheduling blockchain sync in roughly {} minutes",
            last_used_ago.as_secs() / 60,
            delay.as_secs() / 60
        );
        scheduler.schedule_start(delay);
    }

    async fn teardown(self: &Arc<Self>) -> Result<(), SyncServiceError> {
        // Starts are rejected from here until the teardown completes
        let (tasks, wallet_listener, started_at) = {
            let mut lifecycle = self.lifecycle.lock();
            if !self.active.swap(false, Ordering::SeqCst) {
                if lifecycle.tearing_down {
                    debug!("Teardown already in progress");
                } else if self.reset_on_shutdown.swap(false, Ordering::SeqCst)
                    && self.chain.lock().is_none()
                {
                    self.delete_chain_store()?;
                }
                return Ok(());
            }
            lifecycle.tearing_down = true;
            (
                std::mem::take(&mut lifecycle.tasks),
                lifecycle.wallet_listener.take(),
                lifecycle.started_at.take(),
            )
        };
        let _teardown = TeardownGuard(&self.lifecycle);
        info!("Tearing down sync service");

        self.schedule_next_start();
        for task in tasks {
            task.abort();
        }
        self.idle_timer.cancel();

        if let Some(id) = wallet_listener {
            self.collaborators.wallet.remove_event_listener(id);
        }

        let active = {
            let mut engine = self.engine.lock();
            let active = engine.take();
            if active.is_some() {
                *self.transition.lock() = Some(SyncState::Stopping);
            }
            active
        };
        // closed below, once the peer group has let go of it
        let chain = self.chain.lock().take();
        if let Some(active) = active {
            active.detach();
            active.handle.stop().await;
            active.connectivity.stop();
            info!("Peer group stopped");
        }
        *self.transition.lock() = None;

        self.download.reset();

        if let Some(chain) = chain {
            match chain.close() {
                Ok(()) => info!("Chain store closed"),
                Err(e) => warn!("Closing chain store failed: {}", e),
            }
        }

        let result = if self.reset_on_shutdown.swap(false, Ordering::SeqCst) {
            self.delete_chain_store()
        } else {
            Ok(())
        };

        self.signals.clear();

        if let Some(started_at) = started_at {
            info!(
                "Service was up for {} minutes",
                started_at.elapsed().as_secs() / 60
            );
        }
        result
    }

    fn delete_chain_store(&self) -> Result<(), SyncServiceError> {
        let path = self.config.chain_store_path();
        info!("Removing chain store {:?}", path);
        self.collaborators.chain_stores.delete(&path)?;
        Ok(())
    }
}

/// Lets starts through again once a teardown finishes or is abandoned
struct TeardownGuard<'a>(&'a Mutex<LifecycleSlot>);

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().tearing_down = false;
    }
}

/// Bound UI client; unbinds on drop
#[must_use = "the client is unbound as soon as the binding is dropped"]
pub struct ClientBinding {
    bound_clients: Arc<AtomicUsize>,
}

impl Drop for ClientBinding {
    fn drop(&mut self) {
        let remaining = self.bound_clients.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!("Client unbound, {} bound", remaining);
    }
}

/// Drives peer count publishing and the connectivity notification
struct PeerConnectivityHandler {
    inner: Weak<ControllerInner>,
    stopped: AtomicBool,
}

impl PeerConnectivityHandler {
    fn changed(&self, peer_count: usize) -> Option<Arc<ControllerInner>> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }
        let inner = self.inner.upgrade()?;

        let presenter = &inner.collaborators.presenter;
        if inner.config.connectivity_notification_enabled && peer_count > 0 {
            presenter.show_peers_connected(peer_count);
        } else {
            presenter.cancel_peers_connected();
        }
        inner.signals.publish_peer_state(peer_count);
        Some(inner)
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.collaborators.presenter.cancel_peers_connected();
        }
    }
}

impl PeerConnectivityListener for PeerConnectivityHandler {
    fn on_peer_connected(&self, peer: &PeerInfo, peer_count: usize) {
        debug!("Peer connected: {} ({} peers)", peer.address, peer_count);
        if let Some(inner) = self.changed(peer_count) {
            inner.idle_timer.reset();
        }
    }

    fn on_peer_disconnected(&self, peer: &PeerInfo, peer_count: usize) {
        debug!("Peer disconnected: {} ({} peers)", peer.address, peer_count);
        self.changed(peer_count);
    }
}

struct DownloadHandler {
    inner: Weak<ControllerInner>,
}

impl DownloadListener for DownloadHandler {
    fn on_chain_download_started(&self, peer: &PeerInfo, blocks_left: u64) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        debug!("Downloading {} blocks from {}", blocks_left, peer.address);
        inner.download.on_download_started(blocks_left);
        inner.idle_timer.reset();
    }

    fn on_blocks_downloaded(&self, _peer: &PeerInfo, blocks_left: u64) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        inner.download.on_block_downloaded(blocks_left);
        inner.idle_timer.reset();
    }
}

struct WalletActivityHandler {
    inner: Weak<ControllerInner>,
}

impl WalletEventListener for WalletActivityHandler {
    fn on_coins_received(&self, tx: &WalletTransaction) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        inner.activity.register_transaction_received();
        inner.idle_timer.reset();

        if !tx.value.is_positive() {
            return;
        }
        let replaying = inner
            .blockchain_state()
            .is_some_and(|state| state.replaying);
        if replaying && tx.confidence == ConfidenceType::Building {
            debug!("Not notifying replayed transaction {}", tx.hash);
            return;
        }

        inner
            .coalescer
            .notify_coins_received(tx.receiving_address.as_ref(), tx.value, tx.hash);
    }

    fn on_coins_sent(&self, _tx: &WalletTransaction) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        inner.activity.register_transaction_sent();
        inner.idle_timer.reset();
    }
}
