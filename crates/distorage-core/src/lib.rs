pub mod config;
pub mod error;
pub mod types;

pub use error::{DistorageError, DistorageResult};
pub use types::{ChunkDescriptor, ChunkId, FileDescriptor, Operation, Status};
