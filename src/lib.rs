//! Per-tenant storage quota enforcement and file lifecycle management.
//!
//! The crate has two halves:
//!
//! - [`quota`]: tracks usage per tenant and quota kind, gates size-increasing
//!   writes against a ceiling, and periodically recomputes usage from the
//!   metadata repository to correct drift.
//! - [`file`]: creates, updates, versions, publishes and deletes file objects,
//!   asking the quota manager before any byte is written.
//!
//! Collaborators sit behind traits so the engine can run embedded with
//! in-memory backends or on disk:
//!
//! | Concern | Trait | Backends |
//! |---------|-------|----------|
//! | object bytes | [`store::ByteStore`] | memory, filesystem |
//! | shared counters | [`cache::CounterStore`] | memory, redb, unavailable |
//! | file metadata | [`repository::MetadataRepository`] | memory, SQLite |
//! | notifications | [`events::EventSink`] | broadcast, tracing, noop |
//! | derivatives | [`thumbnail::ThumbnailGenerator`] | pluggable |

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod file;
pub mod logging;
mod metrics;
pub mod quota;
pub mod reliability;
pub mod repository;
pub mod store;
pub mod thumbnail;
pub mod utils;

pub use error::{Error, Result};
