//! guildwatch: a locally persisted, rate-limited cache of Hypixel guild
//! and player data.
//!
//! The core is the refresh pipeline: inbound player identifiers pass a TTL
//! check ([`scanner`]), stale ones are pushed onto a single-worker
//! rate-limited queue ([`queue`]), the worker fetches from the remote API
//! ([`client`]) and reconciles the result into the SQLite cache
//! ([`store`]). A periodic sweep ([`sweeper`]) refreshes a secondary
//! per-member metric through the same queue, and [`metrics`] counts
//! externally observable events over rolling windows.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod queue;
pub mod scanner;
pub mod store;
pub mod sweeper;
