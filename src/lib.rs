//! Background block chain synchronization for a lightweight (SPV) wallet.
//!
//! The crate decides when the peer-to-peer sync engine may run, tracks download progress and
//! wallet activity, coalesces payment notifications and shuts the service down once it idles.
//! Wallet model, wire protocol, block storage and UI are supplied by the host through the traits
//! in [`service::collaborators`].

pub mod service;
pub mod utils;

pub use service::config::ServiceConfig;
pub use service::types::{BlockchainState, SyncServiceError, SyncState};
pub use service::{Collaborators, SyncLifecycleController};
