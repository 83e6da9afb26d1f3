//! Holdfast: a key-custody engine behind a message-passing boundary.
//!
//! The [`vault`] module holds wallets, accounts and signing keys and only
//! ever exposes a redacted public projection; the [`messenger`] module
//! connects isolated execution contexts with one-way messages, timed
//! requests and a liveness probe; the [`host`] module runs the single actor
//! that owns the vault; and the [`consent`] module gates external-site
//! operations behind a popup approval flow.

#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

pub mod codec;
pub mod config;
pub mod consent;
pub mod errors;
pub mod fsutil;
pub mod hd;
pub mod host;
pub mod messenger;
pub mod paths;
pub mod serve;
pub mod vault;

pub use errors::HoldfastError;
