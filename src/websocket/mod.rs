//! WebSocket module for exchange connection management

mod client;
mod manager;

pub use client::{Frame, WebSocketClient};
pub use manager::WebSocketManager;
