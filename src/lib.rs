//! Versioned storage for re-issuable epidemiological signals.
//!
//! Observations are staged, merged into an append-only history keyed by
//! issue, and projected into a latest table that always holds the newest
//! surviving issue per key. Metadata over the latest table is aggregated by a
//! worker pool and cached as timestamped snapshots.

#![warn(missing_docs)]

pub mod acquisition;
pub mod admin;
pub mod cli;
pub mod meta;
pub mod store;
pub mod types;
