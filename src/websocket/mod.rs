//! WebSocket module for market channel connection management

mod client;
mod manager;

pub use client::{SubscribeRequest, WebSocketClient};
pub use manager::WebSocketManager;
