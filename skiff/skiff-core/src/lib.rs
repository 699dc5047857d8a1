//! Core types and abstractions for Skiff.
//!
//! This crate provides the change broker shared by every streaming session,
//! the directory snapshot model, the object store abstraction with its
//! backends, configuration, and error handling used across all Skiff
//! components.

pub mod broker;
pub mod config;
pub mod directory;
pub mod error;
pub mod shutdown;
pub mod storage;

pub use broker::{ChangeBroker, Subscription};
pub use config::{SkiffConfig, StorageBackend};
pub use directory::{Directory, Entry, Listing, ObjectInfo};
pub use error::{Result, SkiffError};
pub use storage::{FsStore, MemoryStore, ObjectStore, SharedStore};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::broker::{ChangeBroker, Subscription};
    pub use crate::config::SkiffConfig;
    pub use crate::directory::{Directory, Entry};
    pub use crate::error::{Result, SkiffError};
    pub use crate::storage::{ObjectStore, SharedStore};
}
