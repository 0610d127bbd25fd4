//! Backend tiers and the adapter contract they share.
//!
//! Tier ordering is fixed: remote (0), local persistent (1), in-memory
//! (2). Only the active tier is authoritative for reads.

pub mod local;
pub mod memory;
pub mod remote;
pub mod traits;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use remote::RemoteStore;
pub use traits::{BackendAdapter, KeyPage, StorageError};
