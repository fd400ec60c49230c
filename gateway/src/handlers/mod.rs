//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check, connected clients and SIP registration
//! - `ws` - Client WebSocket for the conversation relay

pub mod api;
pub mod ws;

pub use ws::ws_handler;
