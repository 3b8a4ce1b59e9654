//! SECS-II format codes.
//!
//! The format code occupies the upper six bits of an item header byte.
//! Codes are conventionally written in octal.

use std::fmt;

/// The format of an item, fixed for the item's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    List,
    Binary,
    Boolean,
    Ascii,
    Jis8,
    I8,
    I1,
    I2,
    I4,
    F8,
    F4,
    U8,
    U1,
    U2,
    U4,
}

impl Format {
    /// Every format, in code order.
    pub const ALL: [Format; 15] = [
        Format::List,
        Format::Binary,
        Format::Boolean,
        Format::Ascii,
        Format::Jis8,
        Format::I8,
        Format::I1,
        Format::I2,
        Format::I4,
        Format::F8,
        Format::F4,
        Format::U8,
        Format::U1,
        Format::U2,
        Format::U4,
    ];

    /// The 6-bit format code.
    pub const fn code(self) -> u8 {
        match self {
            Format::List => 0o00,
            Format::Binary => 0o10,
            Format::Boolean => 0o11,
            Format::Ascii => 0o20,
            Format::Jis8 => 0o21,
            Format::I8 => 0o30,
            Format::I1 => 0o31,
            Format::I2 => 0o32,
            Format::I4 => 0o34,
            Format::F8 => 0o40,
            Format::F4 => 0o44,
            Format::U8 => 0o50,
            Format::U1 => 0o51,
            Format::U2 => 0o52,
            Format::U4 => 0o54,
        }
    }

    /// Look up a format by its 6-bit code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|format| format.code() == code)
    }

    /// Bytes per element. Lists count children, so their width is 1.
    pub const fn element_width(self) -> usize {
        match self {
            Format::List
            | Format::Binary
            | Format::Boolean
            | Format::Ascii
            | Format::Jis8
            | Format::I1
            | Format::U1 => 1,
            Format::I2 | Format::U2 => 2,
            Format::I4 | Format::U4 | Format::F4 => 4,
            Format::I8 | Format::U8 | Format::F8 => 8,
        }
    }

    /// SML mnemonic for the format.
    pub const fn sml_name(self) -> &'static str {
        match self {
            Format::List => "L",
            Format::Binary => "B",
            Format::Boolean => "BOOLEAN",
            Format::Ascii => "A",
            Format::Jis8 => "J",
            Format::I8 => "I8",
            Format::I1 => "I1",
            Format::I2 => "I2",
            Format::I4 => "I4",
            Format::F8 => "F8",
            Format::F4 => "F4",
            Format::U8 => "U8",
            Format::U1 => "U1",
            Format::U2 => "U2",
            Format::U4 => "U4",
        }
    }

    /// Look up a format by its SML mnemonic (case-insensitive).
    pub fn from_sml_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.sml_name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sml_name())
    }
}
