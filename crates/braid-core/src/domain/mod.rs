//! Domain layer: I/O-free state shared by both ends of a connection.

pub mod connection;
pub mod error_code;
pub mod flow_control;
pub mod stream_state;
