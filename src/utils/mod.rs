//!
//! Utility module for the sync service.
//!
//! Re-exports formatting helpers used by notification rendering.
/// Amount formatting
pub mod amount;

pub use amount::format_coin_amount;
