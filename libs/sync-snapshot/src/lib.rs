//! Snapshot engine: replays a project's event log into a cached,
//! content-addressed materialized view, and serves a thin filter query over
//! it.

mod applier;
mod engine;
mod error;
mod filter;

pub use applier::{EventApplier, GenericEntityApplier};
pub use engine::{QueryPage, QueryRow, SnapshotEngine, SnapshotMeta};
pub use error::SnapshotError;
pub use filter::{Condition, Filter, Op};
