//! [`ContentRepository`](crate::ContentRepository) implementations and decorators.

pub mod memory;
pub mod retry;

pub use memory::{InMemoryRepository, RepositoryOp};
pub use retry::RetryingRepository;
