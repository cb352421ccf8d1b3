//! Sync Service Module
//!
//! This module provides the background synchronization service of a lightweight wallet. It is
//! composed of several submodules, each responsible for a specific aspect of the service:
//!
//! - `controller`: The main entry point. Starts and stops the peer group as impediments come and go, and owns teardown.
//! - `impediments`: Turns host connectivity and storage signals into the set of active impediments.
//! - `activity`: Rolling history of block and transaction activity used for idle detection.
//! - `download`: Tracks block download sessions and throttles progress broadcasts.
//! - `throttle`: Last-value-wins throttle shared by throttled broadcasts.
//! - `notification`: Coalesces coins-received events into summary and per-transaction notifications.
//! - `idle_timer`: Reschedulable delayed shutdown.
//! - `signals`: Latest-value channels for peer count, blockchain state and download progress.
//! - `state_store`: Persistent best-height high-water mark and last-used timestamp.
//! - `collaborators`: Traits for the wallet, chain store, peer group and presentation layers.
//! - `config`: Service configuration and idle policy.
//!
//! The controller wires every other component together; all of them can also be used and tested
//! on their own.

/// Activity history and idle verdict
pub mod activity;
/// Interfaces of external collaborators
pub mod collaborators;
/// Service configuration
pub mod config;
/// Lifecycle controller for the sync engine
pub mod controller;
/// Block download progress tracking
pub mod download;
/// Idle shutdown timer
pub mod idle_timer;
/// Environment impediment tracking
pub mod impediments;
/// Coins-received notification coalescing
pub mod notification;
/// Published service signals
pub mod signals;
/// Persistent service state
pub mod state_store;
/// Background task spawning
pub mod tasks;
/// Last-value-wins throttle
pub mod throttle;
/// Core value types and errors
pub mod types;

#[cfg(test)]
mod testutil;

pub use controller::*;
