//! WebSocket progress relay endpoint.

mod handler;

pub use handler::ws_handler;
