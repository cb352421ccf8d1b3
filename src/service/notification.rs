//! Coins-received notification coalescing.
//!
//! Incoming payments are folded into a `NotificationAccumulator` until the user acknowledges
//! them. Every payment re-renders two payloads: a grouped summary covering everything received so
//! far and a child entry for the single transaction. Presentation is delegated to the host's
//! `NotificationPresenter`.

use crate::service::collaborators::{AddressBook, NotificationPresenter};
use crate::service::config::ServiceConfig;
use crate::service::types::{Address, Amount, TxHash};
use crate::utils::format_coin_amount;

use itertools::Itertools;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Payments received since the last acknowledgement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationAccumulator {
	pub count: usize,
	pub total: Amount,
	/// Distinct receiving addresses in first-seen order
	pub addresses: Vec<Address>,
}

impl NotificationAccumulator {
	fn record(&mut self, address: Option<&Address>, amount: Amount) {
		self.count += 1;
		self.total = self.total.saturating_add(amount);
		if let Some(address) = address {
			if !self.addresses.contains(address) {
				self.addresses.push(address.clone());
			}
		}
	}

	pub fn is_empty(&self) -> bool {
		self.count == 0
	}
}

/// Grouped notification covering every unacknowledged payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryNotification {
	pub title: String,
	pub text: Option<String>,
	pub count: usize,
	pub total: Amount,
}

/// Per-transaction notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildNotification {
	pub tag: TxHash,
	pub title: String,
	pub text: Option<String>,
	pub amount: Amount,
	pub audible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinsReceivedNotification {
	pub summary: SummaryNotification,
	pub child: ChildNotification,
}

pub struct NotificationCoalescer {
	presenter: Arc<dyn NotificationPresenter>,
	address_book: Option<Arc<dyn AddressBook>>,
	coin_decimals: u32,
	coin_code: String,
	flavor_suffix: String,
	accumulator: Mutex<NotificationAccumulator>,
}

impl NotificationCoalescer {
	pub fn new(
		config: &ServiceConfig,
		presenter: Arc<dyn NotificationPresenter>,
		address_book: Option<Arc<dyn AddressBook>>,
	) -> Self {
		Self {
			presenter,
			address_book,
			coin_decimals: config.coin_decimals,
			coin_code: config.coin_code.clone(),
			flavor_suffix: config.flavor_suffix(),
			accumulator: Mutex::new(NotificationAccumulator::default()),
		}
	}

	/// Fold a received payment into the accumulator and present the refreshed notification.
	///
	/// Presenting and cancelling both happen under the accumulator lock, so an acknowledgement
	/// never lands between rendering a notification and showing it.
	pub fn notify_coins_received(
		&self,
		address: Option<&Address>,
		amount: Amount,
		tx_hash: TxHash,
	) -> CoinsReceivedNotification {
		let mut accumulator = self.accumulator.lock();
		accumulator.record(address, amount);
		let notification = self.render(&accumulator, address, amount, tx_hash);

		debug!(
			"Coins received notification for {}, {} pending",
			tx_hash, notification.summary.count
		);
		self.presenter.show_coins_received(&notification);
		notification
	}

	/// Clear accumulated payments and cancel the presented notification.
	pub fn acknowledge(&self) {
		let mut accumulator = self.accumulator.lock();
		if accumulator.is_empty() {
			return;
		}
		*accumulator = NotificationAccumulator::default();
		self.presenter.cancel_coins_received();
	}

	pub fn accumulator(&self) -> NotificationAccumulator {
		self.accumulator.lock().clone()
	}

	fn render(
		&self,
		accumulator: &NotificationAccumulator,
		address: Option<&Address>,
		amount: Amount,
		tx_hash: TxHash,
	) -> CoinsReceivedNotification {
		let labels = accumulator
			.addresses
			.iter()
			.map(|address| self.label(address))
			.join(", ");

		CoinsReceivedNotification {
			summary: SummaryNotification {
				title: self.title(accumulator.total),
				text: (!labels.is_empty()).then_some(labels),
				count: accumulator.count,
				total: accumulator.total,
			},
			child: ChildNotification {
				tag: tx_hash,
				title: self.title(amount),
				text: address.map(|address| self.label(address)),
				amount,
				audible: true,
			},
		}
	}

	fn title(&self, amount: Amount) -> String {
		format!(
			"Received {} {}{}",
			format_coin_amount(amount.0, self.coin_decimals),
			self.coin_code,
			self.flavor_suffix
		)
	}

	fn label(&self, address: &Address) -> String {
		self.address_book
			.as_ref()
			.and_then(|book| book.resolve_label(address))
			.unwrap_or_else(|| address.to_string())
	}
}
