//! Persistence layer
//!
//! MongoDB-backed durable store plus the in-memory stand-in used by tests
//! and dev mode.

pub mod memory;
pub mod mongo;
pub mod schemas;
pub mod submissions;

pub use memory::MemoryStore;
pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MutMetadata};
pub use submissions::MongoSubmissionStore;
