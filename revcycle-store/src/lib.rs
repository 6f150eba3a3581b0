//! Persistence and caching for peer review cycles.
//!
//! [`Mapper`] answers filtered reads for one review container from lazily
//! loaded caches. [`ReviewerAllocation`] loads and stores the reviewer set
//! of one phase and author, enforcing the phase quorum. Both go through the
//! [`ReviewRepository`] gateway, which has in-memory and SQLite backends.

pub mod allocation;
pub mod config;
pub mod cycle;
pub mod error;
pub mod mapper;
pub mod record;
pub mod repository;

#[cfg(test)]
mod testing;

pub use allocation::{AllocationState, ReviewerAllocation};
pub use config::Config;
pub use cycle::ReviewCycle;
pub use error::{RepositoryError, ReviewError};
pub use mapper::{Bucket, CacheBucket, Mapper};
pub use record::{CachedRecord, Record};
pub use repository::{InMemoryRepository, ReviewRepository, SqliteRepository};
