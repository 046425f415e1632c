//! Application layer for braid-transport.
//!
//! # What lives here? (for beginners)
//!
//! The infrastructure layer knows how to move frames over a socket.  This
//! layer answers a different question: *which connections are alive right
//! now, and how do I shut all of them down together?*
//!
//! - **`registry`** – [`ConnectionRegistry`], the per-listener / per-connector
//!   map of live connections used for coordinated shutdown.

pub mod registry;

pub use registry::ConnectionRegistry;
