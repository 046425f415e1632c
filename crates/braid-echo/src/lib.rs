//! braid-echo library entry point.
//!
//! Exposes the stream handlers so that the integration tests in
//! `tests/echo_roundtrip.rs` and the binary entry point in `main.rs` share
//! the same module tree.

pub mod handler;
