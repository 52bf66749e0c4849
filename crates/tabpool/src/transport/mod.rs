//! Transport layer for tabpool.
//!
//! Currently provides HTTP transport via axum. Other transports (gRPC,
//! unix socket) would be added as separate submodules.

pub mod http;

pub use http::{ServerConfig, serve};
