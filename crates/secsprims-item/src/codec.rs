use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DecodeError, ItemError, Result};
use crate::format::Format;
use crate::item::Item;

/// Largest length a 3-byte length field can carry.
pub const MAX_ITEM_LENGTH: usize = 0xFF_FFFF;

/// Deepest list nesting accepted by the decoder.
pub const MAX_NESTING_DEPTH: usize = 256;

/// Narrowest length-field width (1, 2 or 3 bytes) that holds `len`.
pub fn length_width(len: usize) -> Option<u8> {
    match len {
        0..=0xFF => Some(1),
        0x100..=0xFFFF => Some(2),
        0x1_0000..=MAX_ITEM_LENGTH => Some(3),
        _ => None,
    }
}

/// Write an item header: format byte followed by the minimal length field.
///
/// `len` is the child count for lists and the payload byte count otherwise.
/// A zero length always produces `[format << 2 | 1, 0x00]`.
pub fn encode_header(format: Format, len: usize, dst: &mut BytesMut) -> Result<()> {
    let width = length_width(len).ok_or(ItemError::TooLarge { format, len })?;
    dst.put_u8(format.code() << 2 | width);
    dst.put_uint(len as u64, usize::from(width));
    Ok(())
}

impl Item {
    /// Length carried in this item's header.
    fn header_length(&self) -> usize {
        self.count() * self.format().element_width()
    }

    /// Number of bytes `encode` writes for this item.
    pub fn encoded_len(&self) -> usize {
        let len = self.header_length();
        let header = 1 + length_width(len).map_or(3, usize::from);
        match self {
            Item::List(items) => header + items.iter().map(Item::encoded_len).sum::<usize>(),
            _ => header + len,
        }
    }

    /// Append the binary form of this item to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        encode_header(self.format(), self.header_length(), dst)?;
        match self {
            Item::List(items) => {
                for item in items {
                    item.encode(dst)?;
                }
            }
            Item::Binary(v) | Item::Ascii(v) | Item::Jis8(v) | Item::U1(v) => dst.put_slice(v),
            Item::Boolean(v) => v.iter().for_each(|&b| dst.put_u8(u8::from(b))),
            Item::I1(v) => v.iter().for_each(|&n| dst.put_i8(n)),
            Item::I2(v) => v.iter().for_each(|&n| dst.put_i16(n)),
            Item::I4(v) => v.iter().for_each(|&n| dst.put_i32(n)),
            Item::I8(v) => v.iter().for_each(|&n| dst.put_i64(n)),
            Item::U2(v) => v.iter().for_each(|&n| dst.put_u16(n)),
            Item::U4(v) => v.iter().for_each(|&n| dst.put_u32(n)),
            Item::U8(v) => v.iter().for_each(|&n| dst.put_u64(n)),
            Item::F4(v) => v.iter().for_each(|&n| dst.put_f32(n)),
            Item::F8(v) => v.iter().for_each(|&n| dst.put_f64(n)),
        }
        Ok(())
    }

    /// Encode this item into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut dst)?;
        Ok(dst.freeze())
    }

    /// Decode one item from the front of `src`, consuming its bytes.
    ///
    /// Declared lengths are checked against the bytes actually available;
    /// an overrun fails the whole decode.
    pub fn decode<B: Buf>(src: &mut B) -> std::result::Result<Item, DecodeError> {
        decode_item(src, 0)
    }

    /// Decode exactly one item spanning all of `bytes`.
    pub fn from_bytes(mut bytes: &[u8]) -> std::result::Result<Item, DecodeError> {
        let item = Item::decode(&mut bytes)?;
        if !bytes.is_empty() {
            return Err(DecodeError::TrailingBytes(bytes.len()));
        }
        Ok(item)
    }
}

fn ensure<B: Buf>(src: &B, needed: usize) -> std::result::Result<(), DecodeError> {
    if src.remaining() < needed {
        return Err(DecodeError::Truncated {
            needed,
            remaining: src.remaining(),
        });
    }
    Ok(())
}

fn decode_item<B: Buf>(src: &mut B, depth: usize) -> std::result::Result<Item, DecodeError> {
    ensure(src, 1)?;
    let header = src.get_u8();
    let code = header >> 2;
    let format = Format::from_code(code).ok_or(DecodeError::UnknownFormat(code))?;

    let width = usize::from(header & 0b11);
    if width == 0 {
        return Err(DecodeError::InvalidLengthWidth(header));
    }
    ensure(src, width)?;
    let len = src.get_uint(width) as usize;

    if format == Format::List {
        if depth >= MAX_NESTING_DEPTH {
            return Err(DecodeError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        // Every child takes at least two bytes; cap the reservation accordingly.
        let mut items = Vec::with_capacity(len.min(src.remaining() / 2));
        for _ in 0..len {
            items.push(decode_item(src, depth + 1)?);
        }
        return Ok(Item::List(items));
    }

    if len % format.element_width() != 0 {
        return Err(DecodeError::MisalignedLength { format, len });
    }
    ensure(src, len)?;
    let count = len / format.element_width();

    let item = match format {
        Format::Binary => Item::Binary(take_bytes(src, len)),
        Format::Ascii => Item::Ascii(take_bytes(src, len)),
        Format::Jis8 => Item::Jis8(take_bytes(src, len)),
        Format::U1 => Item::U1(take_bytes(src, len)),
        Format::Boolean => Item::Boolean(take_booleans(src, count)?),
        Format::I1 => Item::I1(take_elements(src, count, B::get_i8)),
        Format::I2 => Item::I2(take_elements(src, count, B::get_i16)),
        Format::I4 => Item::I4(take_elements(src, count, B::get_i32)),
        Format::I8 => Item::I8(take_elements(src, count, B::get_i64)),
        Format::U2 => Item::U2(take_elements(src, count, B::get_u16)),
        Format::U4 => Item::U4(take_elements(src, count, B::get_u32)),
        Format::U8 => Item::U8(take_elements(src, count, B::get_u64)),
        Format::F4 => Item::F4(take_elements(src, count, B::get_f32)),
        Format::F8 => Item::F8(take_elements(src, count, B::get_f64)),
        Format::List => unreachable!("lists are decoded above"),
    };
    Ok(item)
}

fn take_bytes<B: Buf>(src: &mut B, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    src.copy_to_slice(&mut out);
    out
}

/// Only 0x00 and 0x01 are accepted, so a decoded item re-encodes to the
/// same bytes.
fn take_booleans<B: Buf>(
    src: &mut B,
    count: usize,
) -> std::result::Result<Vec<bool>, DecodeError> {
    (0..count)
        .map(|_| match src.get_u8() {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::InvalidBoolean(other)),
        })
        .collect()
}

/// Read `count` fixed-width big-endian elements; the caller has checked length.
fn take_elements<B: Buf, T>(src: &mut B, count: usize, read: impl Fn(&mut B) -> T) -> Vec<T> {
    (0..count).map(|_| read(src)).collect()
}
