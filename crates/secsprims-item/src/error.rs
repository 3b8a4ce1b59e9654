use crate::format::Format;

/// Errors raised when building, accessing or encoding items.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ItemError {
    /// A typed accessor was used against an item of another format.
    #[error("type mismatch: expected {expected}, item is {actual}")]
    TypeMismatch { expected: Format, actual: Format },

    /// An index or slice fell outside the list's children.
    #[error("item count is {count}, but slice(start: {start}, length: {length})")]
    OutOfRange {
        count: usize,
        start: usize,
        length: usize,
    },

    /// The payload does not fit the 3-byte length field.
    #[error("{format} payload of {len} bytes exceeds the 3-byte length field")]
    TooLarge { format: Format, len: usize },

    /// The item bytes could not be decoded.
    #[error("item decode failed: {0}")]
    Decode(#[from] DecodeError),
}

/// Errors raised while decoding item bytes.
///
/// Every variant is fatal to the decode attempt; no partial item is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The buffer ended in the middle of an item.
    #[error("truncated item: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// The header byte carries a format code no SECS-II format uses.
    #[error("unknown item format code 0o{0:02o}")]
    UnknownFormat(u8),

    /// The header byte declares a zero-width length field.
    #[error("invalid length-field width in item header 0x{0:02X}")]
    InvalidLengthWidth(u8),

    /// The byte length is not a whole number of elements.
    #[error("{format} length {len} is not a multiple of its element width")]
    MisalignedLength { format: Format, len: usize },

    /// Lists are nested deeper than the decoder accepts.
    #[error("item lists nested deeper than {0} levels")]
    NestingTooDeep(usize),

    /// A Boolean element byte other than 0x00 or 0x01.
    #[error("invalid boolean byte 0x{0:02X}")]
    InvalidBoolean(u8),

    /// Bytes remained after the root item.
    #[error("{0} trailing bytes after item")]
    TrailingBytes(usize),
}

pub type Result<T> = std::result::Result<T, ItemError>;
