//! Skiff server.
//!
//! Serves an object store to browsers and command-line clients. Browsers open
//! a streaming session over WebSocket, watch a directory and receive a fresh
//! listing whenever it changes; changes made through any Skiff process reach
//! every session through the change broker.

pub mod api;
pub mod extract;
pub mod snapshot;
pub mod thumbnail;

pub use api::SkiffServer;
pub use extract::Extractor;
pub use snapshot::Snapshotter;
pub use thumbnail::Thumbnailer;
