//! Quota counter caching.
//!
//! The shared tier is pluggable through [`CounterStore`]:
//!
//! - **RedbCounterStore**: persistent, single node (default for the binary)
//! - **MemoryCounterStore**: non-persistent, for tests and embedding
//! - **UnavailableCounterStore**: always fails; the process tier carries on
//!
//! [`QuotaCache`] layers a process-local map over whichever store is used.
//!
//! # Custom Backends
//!
//! ```ignore
//! use filequota::cache::{CounterStore, QuotaCache};
//!
//! struct RedisCounters { /* ... */ }
//! impl CounterStore for RedisCounters { /* ... */ }
//!
//! let cache = QuotaCache::new(Arc::new(RedisCounters::connect(url)?));
//! ```

mod backend;
mod memory;
mod quota_cache;
mod redb;
mod unavailable;

pub use backend::CounterStore;
pub use memory::MemoryCounterStore;
pub use quota_cache::{CounterKey, CounterSlot, QuotaCache};
pub use self::redb::RedbCounterStore;
pub use unavailable::UnavailableCounterStore;
