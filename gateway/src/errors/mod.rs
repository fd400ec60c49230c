//! Error types shared across the relay.
//!
//! - `app_error` - HTTP-facing errors that render as JSON responses
//! - `relay_error` - recoverable conditions raised by the conversation relay

pub mod app_error;
pub mod relay_error;
