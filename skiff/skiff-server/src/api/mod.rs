//! HTTP and WebSocket API for Skiff
//!
//! Provides file and thumbnail routes, the streaming session endpoint, and
//! the admin health and metrics endpoints.

pub mod error;
pub mod files;
pub mod health;
pub mod middleware;
pub mod server;
pub mod session;
pub mod state;
pub mod thumbnails;
pub mod websocket;

pub use error::{ApiError, ApiResult};
pub use server::SkiffServer;
pub use session::{Command, Session, SessionConfig, SessionContext};
pub use state::AppState;
