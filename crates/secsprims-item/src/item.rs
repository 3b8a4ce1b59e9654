use std::fmt;

use crate::error::{ItemError, Result};
use crate::format::Format;

/// Elements shown per array before `Display` truncates with ` ...`, unless
/// the format string gives a precision.
pub const DISPLAY_MAX_ELEMENTS: usize = 16;

/// One node of a SECS-II item tree.
///
/// Each variant owns its payload. A list owns its children exclusively, so
/// dropping a list drops the whole subtree. The format of an item is the
/// variant and the count is always derived from the payload.
#[derive(Debug, Clone)]
pub enum Item {
    List(Vec<Item>),
    Binary(Vec<u8>),
    Boolean(Vec<bool>),
    /// ASCII text, kept as raw bytes.
    Ascii(Vec<u8>),
    /// JIS-8 text, kept as raw bytes.
    Jis8(Vec<u8>),
    I1(Vec<i8>),
    I2(Vec<i16>),
    I4(Vec<i32>),
    I8(Vec<i64>),
    U1(Vec<u8>),
    U2(Vec<u16>),
    U4(Vec<u32>),
    U8(Vec<u64>),
    F4(Vec<f32>),
    F8(Vec<f64>),
}

impl Item {
    /// Create a list item.
    pub fn list(items: impl Into<Vec<Item>>) -> Self {
        Item::List(items.into())
    }

    /// Create an empty list item.
    pub fn empty_list() -> Self {
        Item::List(Vec::new())
    }

    /// Create an ASCII item from text.
    pub fn ascii(text: impl Into<String>) -> Self {
        Item::Ascii(text.into().into_bytes())
    }

    /// Create a JIS-8 item from raw bytes.
    pub fn jis8(bytes: impl Into<Vec<u8>>) -> Self {
        Item::Jis8(bytes.into())
    }

    /// Create a binary item.
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Item::Binary(bytes.into())
    }

    /// Create an item holding values of a numeric or boolean element type.
    pub fn values<T: SecsValue>(values: impl Into<Vec<T>>) -> Self {
        T::into_item(values.into())
    }

    /// Create a single-element item.
    pub fn value<T: SecsValue>(value: T) -> Self {
        T::into_item(vec![value])
    }

    /// Create an empty item of any format.
    pub fn empty(format: Format) -> Self {
        match format {
            Format::List => Item::List(Vec::new()),
            Format::Binary => Item::Binary(Vec::new()),
            Format::Boolean => Item::Boolean(Vec::new()),
            Format::Ascii => Item::Ascii(Vec::new()),
            Format::Jis8 => Item::Jis8(Vec::new()),
            Format::I1 => Item::I1(Vec::new()),
            Format::I2 => Item::I2(Vec::new()),
            Format::I4 => Item::I4(Vec::new()),
            Format::I8 => Item::I8(Vec::new()),
            Format::U1 => Item::U1(Vec::new()),
            Format::U2 => Item::U2(Vec::new()),
            Format::U4 => Item::U4(Vec::new()),
            Format::U8 => Item::U8(Vec::new()),
            Format::F4 => Item::F4(Vec::new()),
            Format::F8 => Item::F8(Vec::new()),
        }
    }

    /// The item's format.
    pub fn format(&self) -> Format {
        match self {
            Item::List(_) => Format::List,
            Item::Binary(_) => Format::Binary,
            Item::Boolean(_) => Format::Boolean,
            Item::Ascii(_) => Format::Ascii,
            Item::Jis8(_) => Format::Jis8,
            Item::I1(_) => Format::I1,
            Item::I2(_) => Format::I2,
            Item::I4(_) => Format::I4,
            Item::I8(_) => Format::I8,
            Item::U1(_) => Format::U1,
            Item::U2(_) => Format::U2,
            Item::U4(_) => Format::U4,
            Item::U8(_) => Format::U8,
            Item::F4(_) => Format::F4,
            Item::F8(_) => Format::F8,
        }
    }

    /// Child count for lists, element count for arrays, byte length for text.
    pub fn count(&self) -> usize {
        match self {
            Item::List(v) => v.len(),
            Item::Binary(v) | Item::Ascii(v) | Item::Jis8(v) | Item::U1(v) => v.len(),
            Item::Boolean(v) => v.len(),
            Item::I1(v) => v.len(),
            Item::I2(v) => v.len(),
            Item::I4(v) => v.len(),
            Item::I8(v) => v.len(),
            Item::U2(v) => v.len(),
            Item::U4(v) => v.len(),
            Item::U8(v) => v.len(),
            Item::F4(v) => v.len(),
            Item::F8(v) => v.len(),
        }
    }

    /// True when the item holds no children or elements.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    fn mismatch(&self, expected: Format) -> ItemError {
        ItemError::TypeMismatch {
            expected,
            actual: self.format(),
        }
    }

    /// Children of a list item.
    pub fn as_list(&self) -> Result<&[Item]> {
        match self {
            Item::List(items) => Ok(items),
            other => Err(other.mismatch(Format::List)),
        }
    }

    /// Consume a list item into its children.
    pub fn into_list(self) -> Result<Vec<Item>> {
        match self {
            Item::List(items) => Ok(items),
            other => Err(other.mismatch(Format::List)),
        }
    }

    /// Child at `index` of a list item.
    pub fn get(&self, index: usize) -> Result<&Item> {
        let items = self.as_list()?;
        items.get(index).ok_or(ItemError::OutOfRange {
            count: items.len(),
            start: index,
            length: 1,
        })
    }

    /// Replace the child at `index` of a list item, returning the old child.
    pub fn set(&mut self, index: usize, item: Item) -> Result<Item> {
        let actual = self.format();
        let Item::List(items) = self else {
            return Err(ItemError::TypeMismatch {
                expected: Format::List,
                actual,
            });
        };
        let count = items.len();
        let slot = items.get_mut(index).ok_or(ItemError::OutOfRange {
            count,
            start: index,
            length: 1,
        })?;
        Ok(std::mem::replace(slot, item))
    }

    /// `length` consecutive children of a list item starting at `start`.
    ///
    /// Never clamps: a range past the end is an error.
    pub fn slice(&self, start: usize, length: usize) -> Result<&[Item]> {
        let items = self.as_list()?;
        match start.checked_add(length) {
            Some(end) if end <= items.len() => Ok(&items[start..end]),
            _ => Err(ItemError::OutOfRange {
                count: items.len(),
                start,
                length,
            }),
        }
    }

    /// Payload of a binary item.
    pub fn as_binary(&self) -> Result<&[u8]> {
        match self {
            Item::Binary(bytes) => Ok(bytes),
            other => Err(other.mismatch(Format::Binary)),
        }
    }

    /// Raw bytes of an ASCII or JIS-8 item.
    pub fn as_text_bytes(&self) -> Result<&[u8]> {
        match self {
            Item::Ascii(bytes) | Item::Jis8(bytes) => Ok(bytes),
            other => Err(other.mismatch(Format::Ascii)),
        }
    }

    /// Text of an ASCII or JIS-8 item; bytes that are not UTF-8 are replaced.
    pub fn as_str(&self) -> Result<std::borrow::Cow<'_, str>> {
        self.as_text_bytes().map(String::from_utf8_lossy)
    }

    /// All elements of a numeric or boolean item.
    pub fn as_values<T: SecsValue>(&self) -> Result<&[T]> {
        T::slice_of(self).ok_or_else(|| self.mismatch(T::FORMAT))
    }

    /// First element of a numeric or boolean item.
    pub fn first_value<T: SecsValue>(&self) -> Result<T> {
        let values = self.as_values::<T>()?;
        values.first().copied().ok_or(ItemError::OutOfRange {
            count: 0,
            start: 0,
            length: 1,
        })
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Item::List(a), Item::List(b)) => a == b,
            (Item::Binary(a), Item::Binary(b))
            | (Item::Ascii(a), Item::Ascii(b))
            | (Item::Jis8(a), Item::Jis8(b))
            | (Item::U1(a), Item::U1(b)) => a == b,
            (Item::Boolean(a), Item::Boolean(b)) => a == b,
            (Item::I1(a), Item::I1(b)) => a == b,
            (Item::I2(a), Item::I2(b)) => a == b,
            (Item::I4(a), Item::I4(b)) => a == b,
            (Item::I8(a), Item::I8(b)) => a == b,
            (Item::U2(a), Item::U2(b)) => a == b,
            (Item::U4(a), Item::U4(b)) => a == b,
            (Item::U8(a), Item::U8(b)) => a == b,
            // Payload identity: compare the encoded bit patterns, not IEEE equality.
            (Item::F4(a), Item::F4(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Item::F8(a), Item::F8(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            _ => false,
        }
    }
}

/// Element types that map onto exactly one numeric or boolean format.
///
/// `u8` maps to `U1`; binary payloads are reached with [`Item::as_binary`].
pub trait SecsValue: Copy + Sized {
    /// The format holding elements of this type.
    const FORMAT: Format;

    fn into_item(values: Vec<Self>) -> Item;

    fn slice_of(item: &Item) -> Option<&[Self]>;
}

macro_rules! secs_value {
    ($ty:ty, $variant:ident) => {
        impl SecsValue for $ty {
            const FORMAT: Format = Format::$variant;

            fn into_item(values: Vec<Self>) -> Item {
                Item::$variant(values)
            }

            fn slice_of(item: &Item) -> Option<&[Self]> {
                match item {
                    Item::$variant(values) => Some(values),
                    _ => None,
                }
            }
        }

        impl From<Vec<$ty>> for Item {
            fn from(values: Vec<$ty>) -> Self {
                Item::$variant(values)
            }
        }

        impl From<$ty> for Item {
            fn from(value: $ty) -> Self {
                Item::$variant(vec![value])
            }
        }
    };
}

secs_value!(bool, Boolean);
secs_value!(i8, I1);
secs_value!(i16, I2);
secs_value!(i32, I4);
secs_value!(i64, I8);
secs_value!(u8, U1);
secs_value!(u16, U2);
secs_value!(u32, U4);
secs_value!(u64, U8);
secs_value!(f32, F4);
secs_value!(f64, F8);

impl From<&str> for Item {
    fn from(text: &str) -> Self {
        Item::ascii(text)
    }
}

impl From<String> for Item {
    fn from(text: String) -> Self {
        Item::ascii(text)
    }
}

impl From<Vec<Item>> for Item {
    fn from(items: Vec<Item>) -> Self {
        Item::List(items)
    }
}

/// Compact SML rendering, e.g. `<L [2] <U1 5> <A "AB">>`.
///
/// Arrays show at most [`DISPLAY_MAX_ELEMENTS`] elements before ` ...`; a
/// precision overrides that budget at every nesting level, so `{:.4}` shows
/// four and `{:.0}` none.
impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let budget = f.precision().unwrap_or(DISPLAY_MAX_ELEMENTS);
        self.write_sml(f, budget)
    }
}

impl Item {
    fn write_sml(&self, f: &mut fmt::Formatter<'_>, budget: usize) -> fmt::Result {
        match self {
            Item::List(items) => {
                write!(f, "<L [{}]", items.len())?;
                for item in items {
                    f.write_str(" ")?;
                    item.write_sml(f, budget)?;
                }
                f.write_str(">")
            }
            Item::Ascii(bytes) | Item::Jis8(bytes) => {
                write!(
                    f,
                    "<{} {:?}>",
                    self.format(),
                    String::from_utf8_lossy(bytes)
                )
            }
            Item::Binary(bytes) => {
                write!(f, "<B")?;
                write_elements(f, bytes, budget, |f, b| write!(f, "0x{b:02X}"))?;
                f.write_str(">")
            }
            Item::Boolean(v) => write_array(f, Format::Boolean, v, budget),
            Item::I1(v) => write_array(f, Format::I1, v, budget),
            Item::I2(v) => write_array(f, Format::I2, v, budget),
            Item::I4(v) => write_array(f, Format::I4, v, budget),
            Item::I8(v) => write_array(f, Format::I8, v, budget),
            Item::U1(v) => write_array(f, Format::U1, v, budget),
            Item::U2(v) => write_array(f, Format::U2, v, budget),
            Item::U4(v) => write_array(f, Format::U4, v, budget),
            Item::U8(v) => write_array(f, Format::U8, v, budget),
            Item::F4(v) => write_array(f, Format::F4, v, budget),
            Item::F8(v) => write_array(f, Format::F8, v, budget),
        }
    }
}

fn write_array<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    format: Format,
    values: &[T],
    budget: usize,
) -> fmt::Result {
    write!(f, "<{format}")?;
    write_elements(f, values, budget, |f, v| write!(f, "{v}"))?;
    f.write_str(">")
}

fn write_elements<T>(
    f: &mut fmt::Formatter<'_>,
    values: &[T],
    budget: usize,
    mut write_one: impl FnMut(&mut fmt::Formatter<'_>, &T) -> fmt::Result,
) -> fmt::Result {
    for value in values.iter().take(budget) {
        f.write_str(" ")?;
        write_one(f, value)?;
    }
    if values.len() > budget {
        f.write_str(" ...")?;
    }
    Ok(())
}
