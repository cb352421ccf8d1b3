//! Environment impediments.
//!
//! The `ImpedimentTracker` turns connectivity and storage signals from the host into a set of
//! active impediments and publishes membership changes. It never starts or stops the sync engine
//! itself; the controller subscribes and decides.

use crate::service::types::{Impediment, ImpedimentSet};

use tokio::sync::watch;
use tracing::info;

/// Environment signal delivered by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentSignal {
	Connectivity {
		connected: bool,
		/// Free-form description of the active network, for logging
		detail: Option<String>,
	},
	StorageLow,
	StorageOk,
}

/// Tracks which impediments currently forbid running the sync engine
pub struct ImpedimentTracker {
	sender: watch::Sender<ImpedimentSet>,
}

impl ImpedimentTracker {
	/// Create a tracker with no impediments; a missing signal counts as no impediment.
	pub fn new() -> Self {
		let (sender, _) = watch::channel(ImpedimentSet::new());
		Self { sender }
	}

	/// Apply a signal, notifying subscribers only if membership changed.
	pub fn handle_signal(&self, signal: EnvironmentSignal) -> bool {
		match &signal {
			EnvironmentSignal::Connectivity { connected, detail } => {
				info!(
					"active network is {}{}",
					if *connected { "up" } else { "down" },
					detail
						.as_deref()
						.map(|d| format!(", {}", d))
						.unwrap_or_default()
				);
			}
			EnvironmentSignal::StorageLow => info!("device storage low"),
			EnvironmentSignal::StorageOk => info!("device storage ok"),
		}

		self.sender.send_if_modified(|impediments| match signal {
			EnvironmentSignal::Connectivity { connected: true, .. } => {
				impediments.remove(Impediment::Network)
			}
			EnvironmentSignal::Connectivity {
				connected: false, ..
			} => impediments.insert(Impediment::Network),
			EnvironmentSignal::StorageLow => impediments.insert(Impediment::Storage),
			EnvironmentSignal::StorageOk => impediments.remove(Impediment::Storage),
		})
	}

	pub fn current_impediments(&self) -> ImpedimentSet {
		self.sender.borrow().clone()
	}

	pub fn subscribe(&self) -> watch::Receiver<ImpedimentSet> {
		self.sender.subscribe()
	}
}

impl Default for ImpedimentTracker {
	fn default() -> Self {
		Self::new()
	}
}
