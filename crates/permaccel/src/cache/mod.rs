//! Two-tier caching for validation results and derived snapshots.
//!
//! - **L1 (DashMap)**: in-process, per instance
//! - **L2 ([`DistributedCache`])**: shared across instances
//!
//! If L2 is unavailable the tier keeps working as L1-only; errors become
//! misses and are logged.

pub mod distributed;
pub mod keys;
pub mod tier;

pub use distributed::{DistributedCache, InMemoryDistributedCache};
pub use tier::{CacheTier, CachedEntry, TierStats};
