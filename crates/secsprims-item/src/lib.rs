//! SECS-II items: the recursive, self-describing value tree carried in the
//! body of every SECS data message.
//!
//! Every item on the wire is:
//! - A 1-byte header: 6-bit format code + 2-bit length-field width
//! - A 1 to 3 byte big-endian length (child count for lists, byte count otherwise)
//! - The payload: child items for lists, big-endian elements otherwise
//!
//! The length field is always the narrowest one that fits.

pub mod codec;
pub mod error;
pub mod format;
pub mod item;

pub use codec::{MAX_ITEM_LENGTH, MAX_NESTING_DEPTH};
pub use error::{DecodeError, ItemError, Result};
pub use format::Format;
pub use item::{Item, SecsValue, DISPLAY_MAX_ELEMENTS};
