#![cfg(feature = "client")]
pub mod client;

pub use client::{McpClient, NotificationHandler};
