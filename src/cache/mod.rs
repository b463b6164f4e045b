//! Versioned response cache.
//!
//! Responses are stored in named generations. The agent reads and writes
//! only its current generation and deletes all others when it activates.

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource};
