//! `reel-gateway`: HTTP surface over the job manager.
//!
//! The binary in `main.rs` wires config, persistence and the manager; the
//! router lives here so it can be driven in tests without a socket.

pub mod app;
pub mod http;
