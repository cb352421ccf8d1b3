//! Progress tracking for block chain download.
//!
//! This module provides the `DownloadProgressTracker`, which follows the peer group's download
//! sessions. It records how many blocks a session started with and how many are still left, and
//! hands every update to a `Throttle` so a fast initial sync does not flood subscribers with
//! per-block broadcasts.
//!
//! The controller installs the broadcast sink, which also performs the best-height bookkeeping.

use crate::service::throttle::Throttle;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Snapshot of the current download session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Blocks outstanding when the session started
    pub blocks_to_download: u64,
    /// Blocks still outstanding
    pub blocks_left: u64,
}

impl DownloadProgress {
    pub fn blocks_downloaded(&self) -> u64 {
        self.blocks_to_download.saturating_sub(self.blocks_left)
    }

    pub fn is_complete(&self) -> bool {
        self.blocks_left == 0
    }
}

#[derive(Debug, Default)]
struct DownloadSession {
    progress: Option<DownloadProgress>,
    sessions_started: u64,
    reports_received: u64,
}

/// Service for tracking block download progress
///
/// Within a session `blocks_left` only ever decreases. A report that arrives without a
/// preceding session start adopts the reported value as the session total.
pub struct DownloadProgressTracker {
    session: Mutex<DownloadSession>,
    throttle: Throttle<DownloadProgress>,
}

impl DownloadProgressTracker {
    /// Create a tracker whose broadcasts reach `sink` at most once per `interval`.
    pub fn new<F>(interval: Duration, sink: F) -> Self
    where
        F: Fn(DownloadProgress) + Send + Sync + 'static,
    {
        Self {
            session: Mutex::new(DownloadSession::default()),
            throttle: Throttle::new("download progress broadcast", interval, sink),
        }
    }

    /// Start a new download session with `total_blocks` outstanding.
    pub fn on_download_started(&self, total_blocks: u64) {
        let progress = DownloadProgress {
            blocks_to_download: total_blocks,
            blocks_left: total_blocks,
        };
        {
            let mut session = self.session.lock();
            session.progress = Some(progress);
            session.sessions_started += 1;
        }
        info!("Chain download started, {} blocks to download", total_blocks);
        self.throttle.submit(progress);
    }

    /// Record that `blocks_left` blocks remain in the current session.
    pub fn on_block_downloaded(&self, blocks_left: u64) {
        let progress = {
            let mut session = self.session.lock();
            session.reports_received += 1;
            let progress = match session.progress {
                Some(current) => DownloadProgress {
                    blocks_to_download: current.blocks_to_download,
                    blocks_left: current.blocks_left.min(blocks_left),
                },
                None => DownloadProgress {
                    blocks_to_download: blocks_left,
                    blocks_left,
                },
            };
            session.progress = Some(progress);
            progress
        };

        if progress.is_complete() {
            info!("{}", self.get_stats().summary());
        } else {
            debug!("{} blocks left to download", progress.blocks_left);
        }
        self.throttle.submit(progress);
    }

    pub fn progress(&self) -> Option<DownloadProgress> {
        self.session.lock().progress
    }

    /// Forget the current session and drop any pending broadcast.
    pub fn reset(&self) {
        self.throttle.cancel();
        self.session.lock().progress = None;
    }

    /// Get download statistics as a DownloadStats struct
    pub fn get_stats(&self) -> DownloadStats {
        let session = self.session.lock();
        DownloadStats {
            progress: session.progress.unwrap_or_default(),
            sessions_started: session.sessions_started,
            reports_received: session.reports_received,
        }
    }
}

/// Statistics about block download
#[derive(Debug, Clone)]
pub struct DownloadStats {
    pub progress: DownloadProgress,
    pub sessions_started: u64,
    pub reports_received: u64,
}

impl DownloadStats {
    /// Get a human-readable summary of the download statistics
    pub fn summary(&self) -> String {
        format!(
            "Downloaded {} of {} blocks ({} left) over {} session(s), {} progress reports",
            self.progress.blocks_downloaded(),
            self.progress.blocks_to_download,
            self.progress.blocks_left,
            self.sessions_started,
            self.reports_received
        )
    }
}
