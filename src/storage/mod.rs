//! Persistence surface and its backends.

pub mod traits;
pub mod memory;
pub mod sql;

pub use traits::{KvStore, StorageError};
pub use memory::MemoryKvStore;
pub use sql::SqliteKvStore;
