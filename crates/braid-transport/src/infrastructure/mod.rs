//! Infrastructure layer: sockets, secure channels, and the async driver tasks.

pub mod channel;
pub mod connection;
pub mod listener;
pub mod stream;
