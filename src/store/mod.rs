//! Byte store for file contents.
//!
//! - [`ByteStore`]: backend trait
//! - [`MemoryByteStore`]: DashMap-backed, for tests and embedding
//! - [`FilesystemByteStore`]: objects under a local directory

mod backend;
mod filesystem;
mod memory;
mod validation;

pub use backend::{BoxReader, ByteStore};
pub use filesystem::FilesystemByteStore;
pub use memory::MemoryByteStore;
pub(crate) use validation::normalize_path;
