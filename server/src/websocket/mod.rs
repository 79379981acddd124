//! WebSocket support for live table snapshots.
//!
//! Clients connect via WebSocket, `watch` a table and receive a fresh
//! snapshot immediately and after every change to that table.

mod protocol;

pub use protocol::*;
