//! Request handlers for the hosted tables.

mod tables;
mod websocket;

pub use tables::*;
pub use websocket::handle_websocket_connection;
