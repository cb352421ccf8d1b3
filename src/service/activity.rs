//! Activity history for idle detection.
//!
//! Network callbacks bump lock-free counters from any thread. Once per tick the history folds
//! those counters into a new entry at the front of a bounded window, and the idle verdict is
//! derived from that window on demand.

use crate::service::config::IdlePolicy;
use crate::service::types::BlockHeight;

use itertools::Itertools;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::Instant;
use tracing::info;

/// Activity recorded for one tick interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityEntry {
	pub recorded_at: Instant,
	pub transactions_received: u32,
	pub blocks_downloaded: u32,
}

impl ActivityEntry {
	fn render(&self, now: Instant) -> String {
		format!(
			"{}/{}/{}",
			now.saturating_duration_since(self.recorded_at).as_secs(),
			self.transactions_received,
			self.blocks_downloaded
		)
	}
}

struct HistoryWindow {
	/// Most recent first
	entries: VecDeque<ActivityEntry>,
	/// Height seen at the previous tick, 0 until a height was observed
	last_chain_height: BlockHeight,
}

/// Rolling window of per-tick transaction and block activity
pub struct ActivityHistory {
	policy: IdlePolicy,
	transactions: AtomicU32,
	best_chain_height: AtomicU32,
	window: Mutex<HistoryWindow>,
}

impl ActivityHistory {
	pub fn new(policy: IdlePolicy) -> Self {
		Self {
			policy,
			transactions: AtomicU32::new(0),
			best_chain_height: AtomicU32::new(0),
			window: Mutex::new(HistoryWindow {
				entries: VecDeque::with_capacity(policy.max_history_size() + 1),
				last_chain_height: 0,
			}),
		}
	}

	pub fn register_transaction_received(&self) {
		self.transactions.fetch_add(1, Ordering::Relaxed);
	}

	pub fn register_transaction_sent(&self) {
		self.transactions.fetch_add(1, Ordering::Relaxed);
	}

	pub fn register_best_chain_height(&self, height: BlockHeight) {
		self.best_chain_height.store(height, Ordering::Relaxed);
	}

	/// Record one interval of activity. Invoke on a fixed period, ideally once a minute.
	pub fn tick(&self) {
		let chain_height = self.best_chain_height.load(Ordering::Relaxed);
		let mut window = self.window.lock();

		if window.last_chain_height > 0 {
			let blocks_downloaded = chain_height.saturating_sub(window.last_chain_height);
			let transactions_received = self.transactions.swap(0, Ordering::Relaxed);

			window.entries.push_front(ActivityEntry {
				recorded_at: Instant::now(),
				transactions_received,
				blocks_downloaded,
			});
			window.entries.truncate(self.policy.max_history_size());

			info!("{}", Self::describe(&window.entries));
		}

		window.last_chain_height = chain_height;
	}

	/// Whether block and transaction activity is idling.
	pub fn is_idle(&self) -> bool {
		let window = self.window.lock();
		if window.entries.len() < self.policy.min_collect_history {
			return false;
		}

		!window.entries.iter().enumerate().any(|(i, entry)| {
			let blocks_active = entry.blocks_downloaded > 0 && i <= self.policy.idle_block_timeout;
			let transactions_active =
				entry.transactions_received > 0 && i <= self.policy.idle_transaction_timeout;
			blocks_active || transactions_active
		})
	}

	/// Snapshot of the window, most recent first.
	pub fn entries(&self) -> Vec<ActivityEntry> {
		self.window.lock().entries.iter().copied().collect()
	}

	pub fn len(&self) -> usize {
		self.window.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn describe(entries: &VecDeque<ActivityEntry>) -> String {
		let now = Instant::now();
		format!(
			"secsAgo/txns/blocks: {}",
			entries.iter().map(|entry| entry.render(now)).join(", ")
		)
	}
}

impl fmt::Display for ActivityHistory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let window = self.window.lock();
		f.write_str(&Self::describe(&window.entries))
	}
}
