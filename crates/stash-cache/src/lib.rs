//! # Stash Cache
//!
//! Memoizing cache with `max-age` and `stale-while-revalidate` semantics over
//! a pluggable async storage backend.
//!
//! ## Features
//!
//! - **Freshness windows**: entries are fresh, stale or expired relative to the
//!   windows resolved when they were written
//! - **Background revalidation**: stale values are served immediately while a
//!   spawned task refreshes them
//! - **Pluggable storage**: any [`CacheStorage`] implementation, with
//!   [`MemoryStorage`] built in
//! - **Injectable clock**: [`ManualClock`] drives freshness in tests
//! - **Performance monitoring**: hit, stale and revalidation counters
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use stash_cache::{Cache, CacheConfig, CacheError, CacheOptions};
//!
//! # async fn run() -> Result<(), CacheError> {
//! let cache: Cache<String, u64> = Cache::in_memory(
//!     CacheConfig::default().with_stale_while_revalidate(Duration::from_secs(30)),
//! );
//!
//! let value = cache
//!     .fetch_with(
//!         "answer".to_string(),
//!         CacheOptions::new().with_max_age(Duration::from_secs(60)),
//!         |_ctx| async { Ok::<_, CacheError>(42) },
//!     )
//!     .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod freshness;
pub mod metrics;
pub mod producer;
pub mod storage;

pub use cache::{Cache, CacheBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, CacheOptions, EntryPolicy};
pub use error::{CacheError, Result};
pub use freshness::Freshness;
pub use metrics::{CacheMetrics, CacheStats};
pub use producer::{AnyProducer, ProduceContext, Producer, SharedProducer};
pub use storage::{CacheEntry, CacheStorage, EntryPredicate, MemoryStorage};
