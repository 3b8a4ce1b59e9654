//! SECS-II messaging over HSMS with permissive licensing.
//!
//! secsprims encodes SECS-II item trees, frames them as HSMS messages and
//! runs the HSMS session protocol (select, linktest, deselect, separate)
//! with request/reply correlation on top of TCP.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP listener/connector and the `HsmsStream` byte stream
//! - [`item`]: the SECS-II item tree and its binary codec
//! - [`frame`]: HSMS headers, `SecsMessage`, frame reader/writer, buffer pool
//! - [`session`]: the HSMS state machine and transactions (behind `session` feature)

/// Re-export transport types.
pub mod transport {
    pub use secsprims_transport::*;
}

/// Re-export item types.
pub mod item {
    pub use secsprims_item::*;
}

/// Re-export frame types.
pub mod frame {
    pub use secsprims_frame::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use secsprims_session::*;
}

pub use secsprims_frame::SecsMessage;
pub use secsprims_item::{Format, Item};
