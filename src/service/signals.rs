//! Published service signals.
//!
//! This module defines the latest-value channels through which the service publishes its state to
//! UI-side subscribers: the connected peer count, the blockchain state and the download progress.
//! Each channel is a `tokio::sync::watch`, so a slow subscriber only ever sees the most recent
//! value and no history is queued.

use crate::service::download::DownloadProgress;
use crate::service::types::BlockchainState;

use tokio::sync::watch;
use tracing::debug;

/// Publisher side of every service signal
pub struct ServiceSignals {
    peer_state: watch::Sender<usize>,
    blockchain_state: watch::Sender<Option<BlockchainState>>,
    download_progress: watch::Sender<Option<DownloadProgress>>,
}

impl ServiceSignals {
    /// Create the channels with zero peers and no state published yet.
    pub fn new() -> Self {
        Self {
            peer_state: watch::channel(0).0,
            blockchain_state: watch::channel(None).0,
            download_progress: watch::channel(None).0,
        }
    }

    /// Publish the number of connected peers.
    pub fn publish_peer_state(&self, peer_count: usize) {
        debug!("Publishing peer state: {} peers", peer_count);
        self.peer_state.send_replace(peer_count);
    }

    /// Publish a blockchain state snapshot.
    ///
    /// Subscribers are only woken when the snapshot differs from the previous one.
    pub fn publish_blockchain_state(&self, state: BlockchainState) {
        self.blockchain_state.send_if_modified(|current| {
            if current.as_ref() == Some(&state) {
                false
            } else {
                *current = Some(state);
                true
            }
        });
    }

    pub fn publish_download_progress(&self, progress: DownloadProgress) {
        self.download_progress.send_replace(Some(progress));
    }

    /// Reset every signal to its initial value.
    pub fn clear(&self) {
        self.peer_state.send_replace(0);
        self.blockchain_state.send_replace(None);
        self.download_progress.send_replace(None);
    }

    pub fn subscribe_peer_state(&self) -> watch::Receiver<usize> {
        self.peer_state.subscribe()
    }

    pub fn subscribe_blockchain_state(&self) -> watch::Receiver<Option<BlockchainState>> {
        self.blockchain_state.subscribe()
    }

    pub fn subscribe_download_progress(&self) -> watch::Receiver<Option<DownloadProgress>> {
        self.download_progress.subscribe()
    }
}

impl Default for ServiceSignals {
    fn default() -> Self {
        Self::new()
    }
}
