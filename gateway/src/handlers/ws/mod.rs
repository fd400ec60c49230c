//! Client WebSocket handler
//!
//! # Protocol
//!
//! ## Client → Server
//!
//! - **create_conversation**: Start a conversation with key-value input
//! - **interrupt_conversation**: Stop the conversation immediately
//! - **close_conversation**: End the conversation
//! - **debug**: Diagnostics, logged server side
//!
//! ## Server → Client
//!
//! - **connected**: Connection id assigned on upgrade
//! - **conversation_created**: Conversation registered and enqueued
//! - **transcript**: One line of the conversation (ai or human)
//! - **conversation_closed_by_system**: The platform finished the conversation
//! - **error**: Error message with a machine-readable code

mod handler;
pub mod messages;

pub use handler::ws_handler;
