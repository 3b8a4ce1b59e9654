//! Byte stream transport for HSMS.
//!
//! HSMS runs over a reliable, ordered byte stream. This crate provides:
//! - TCP listeners and connectors (the standard HSMS transport)
//! - Unix socket pairs for in-process loopback (Unix only)
//!
//! This is the lowest layer of secsprims. Everything else builds on top of
//! the [`HsmsStream`] type provided here.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::HsmsStream;
pub use tcp::TcpTransport;
