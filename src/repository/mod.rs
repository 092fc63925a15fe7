//! File metadata persistence with pluggable backends.
//!
//! - **SqliteRepository**: persistent (default for the binary)
//! - **MemoryRepository**: non-persistent, for tests and embedding
//!
//! Implement [`MetadataRepository`] to plug in another database.

mod backend;
mod memory;
mod sqlite;


pub use backend::MetadataRepository;
pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;
