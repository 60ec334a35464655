//! Core library powering the dashboard result cache.
//!
//! The interesting parts live in the [`caching`] module: a tiered storage
//! abstraction with compression and quota-aware eviction, and the
//! stale-while-revalidate read path used by every dashboard query.

pub mod caching;
pub mod config;
pub mod logging;
