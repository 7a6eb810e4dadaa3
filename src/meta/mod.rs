//! Metadata aggregation over the latest projection and the snapshot cache
//! that query handlers read from.

mod aggregate;
mod cache;

pub use aggregate::{
    aggregate, default_worker_count, AggregateOptions, MetaKey, MetadataSummary,
};
pub use cache::{refresh, retrieve, store_snapshot, MetaSnapshot, RefreshReport};
