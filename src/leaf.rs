//! CodeView numeric-leaf and length-prefixed-string codec (spec.md §4.2).
//!
//! Numeric leaves are the variable-length integer/float literals embedded
//! inline in type and field-list records (array lengths, enumerator values,
//! bit-field widths, class sizes). They, and the pascal/zero-terminated
//! string flavors that usually follow them, are decoded and encoded here so
//! every translator shares one implementation.

use std::fmt;

use scroll::{Pread, LE};
use thiserror::Error;

use crate::error::ErrorKind;

/// Tag below which a numeric leaf is an inline unsigned 16-bit literal.
pub const LF_NUMERIC: u16 = 0x8000;

const LF_CHAR: u16 = 0x8000;
const LF_SHORT: u16 = 0x8001;
const LF_USHORT: u16 = 0x8002;
const LF_LONG: u16 = 0x8003;
const LF_ULONG: u16 = 0x8004;
const LF_REAL32: u16 = 0x8005;
const LF_REAL64: u16 = 0x8006;
const LF_REAL80: u16 = 0x8007;
const LF_REAL128: u16 = 0x8008;
const LF_QUADWORD: u16 = 0x8009;
const LF_UQUADWORD: u16 = 0x800a;
const LF_REAL48: u16 = 0x800b;
const LF_COMPLEX32: u16 = 0x800c;
const LF_COMPLEX64: u16 = 0x800d;
const LF_COMPLEX80: u16 = 0x800e;
const LF_COMPLEX128: u16 = 0x800f;
const LF_VARSTRING: u16 = 0x8010;

/// Error produced by the leaf codec.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct LeafError {
    kind: ErrorKind,
}

impl LeafError {
    fn new(kind: ErrorKind) -> Self {
        LeafError { kind }
    }

    /// The [`ErrorKind`] discriminant for this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// A decoded numeric leaf value.
///
/// Integers are widened to `i128`/`u128` so every representable width fits;
/// floats keep their native width since re-widening would lose the
/// minimal-encoding round-trip property (spec.md §8 property 1).
#[derive(Debug, Clone, PartialEq)]
pub enum NumericLeaf {
    /// Inline unsigned 16-bit literal (tag itself is the value).
    U16(u16),
    /// Signed integer of the given byte width (1, 2, 4, or 8).
    Signed(i64, u8),
    /// Unsigned integer of the given byte width (1, 2, 4, or 8).
    Unsigned(u64, u8),
    /// 32-bit IEEE float.
    F32(f32),
    /// 64-bit IEEE float.
    F64(f64),
    /// 80-bit extended float, kept as raw bytes (no native Rust type).
    F80([u8; 10]),
    /// 128-bit float, kept as raw bytes.
    F128([u8; 16]),
    /// 48-bit "real48" float, kept as raw bytes.
    F48([u8; 6]),
    /// Complex number of the given component width in bytes (4, 8, 10, 16),
    /// real part followed by imaginary part.
    Complex { width: u8, re: Vec<u8>, im: Vec<u8> },
    /// Length-prefixed string leaf (`LF_VARSTRING`).
    VarString(Vec<u8>),
}

impl NumericLeaf {
    /// Widens an integer-shaped leaf to `i128`; returns `None` for
    /// floats and `LF_VARSTRING`.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            NumericLeaf::U16(v) => Some(*v as i128),
            NumericLeaf::Signed(v, _) => Some(*v as i128),
            NumericLeaf::Unsigned(v, _) => Some(*v as i128),
            _ => None,
        }
    }
}

/// Decodes one numeric leaf starting at `bytes[0]`.
///
/// Returns the decoded value and the number of bytes consumed. A leading
/// little-endian `u16` below [`LF_NUMERIC`] is the value itself (2 bytes
/// consumed, no further tag). Tags `0x8000..=0x8010` select a fixed-width
/// payload that follows the tag.
pub fn numeric_leaf(bytes: &[u8]) -> Result<(NumericLeaf, usize), LeafError> {
    let tag: u16 = bytes
        .pread_with(0, LE)
        .map_err(|_| LeafError::new(ErrorKind::HeaderTruncated))?;

    if tag < LF_NUMERIC {
        return Ok((NumericLeaf::U16(tag), 2));
    }

    let rest = &bytes[2..];
    let trunc = || LeafError::new(ErrorKind::HeaderTruncated);

    match tag {
        LF_CHAR => Ok((
            NumericLeaf::Signed(rest.pread::<i8>(0).map_err(|_| trunc())? as i64, 1),
            3,
        )),
        LF_SHORT => Ok((
            NumericLeaf::Signed(rest.pread_with::<i16>(0, LE).map_err(|_| trunc())? as i64, 2),
            4,
        )),
        LF_USHORT => Ok((
            NumericLeaf::Unsigned(rest.pread_with::<u16>(0, LE).map_err(|_| trunc())? as u64, 2),
            4,
        )),
        LF_LONG => Ok((
            NumericLeaf::Signed(rest.pread_with::<i32>(0, LE).map_err(|_| trunc())? as i64, 4),
            6,
        )),
        LF_ULONG => Ok((
            NumericLeaf::Unsigned(rest.pread_with::<u32>(0, LE).map_err(|_| trunc())? as u64, 4),
            6,
        )),
        LF_QUADWORD => Ok((
            NumericLeaf::Signed(rest.pread_with::<i64>(0, LE).map_err(|_| trunc())?, 8),
            10,
        )),
        LF_UQUADWORD => Ok((
            NumericLeaf::Unsigned(rest.pread_with::<u64>(0, LE).map_err(|_| trunc())?, 8),
            10,
        )),
        LF_REAL32 => Ok((
            NumericLeaf::F32(f32::from_bits(
                rest.pread_with::<u32>(0, LE).map_err(|_| trunc())?,
            )),
            6,
        )),
        LF_REAL64 => Ok((
            NumericLeaf::F64(f64::from_bits(
                rest.pread_with::<u64>(0, LE).map_err(|_| trunc())?,
            )),
            10,
        )),
        LF_REAL80 => Ok((NumericLeaf::F80(read_array(rest, &trunc)?), 12)),
        LF_REAL128 => Ok((NumericLeaf::F128(read_array(rest, &trunc)?), 18)),
        LF_REAL48 => Ok((NumericLeaf::F48(read_array(rest, &trunc)?), 8)),
        LF_COMPLEX32 | LF_COMPLEX64 | LF_COMPLEX80 | LF_COMPLEX128 => {
            let width: u8 = match tag {
                LF_COMPLEX32 => 4,
                LF_COMPLEX64 => 8,
                LF_COMPLEX80 => 10,
                _ => 16,
            };
            let w = width as usize;
            if rest.len() < 2 * w {
                return Err(trunc());
            }
            let re = rest[..w].to_vec();
            let im = rest[w..2 * w].to_vec();
            Ok((NumericLeaf::Complex { width, re, im }, 2 + 2 * w))
        }
        LF_VARSTRING => {
            let len: u16 = rest.pread_with(0, LE).map_err(|_| trunc())?;
            let start = 2usize;
            let end = start + len as usize;
            let data = rest.get(start..end).ok_or_else(trunc)?.to_vec();
            Ok((NumericLeaf::VarString(data), 2 + end))
        }
        _ => Err(LeafError::new(ErrorKind::UnsupportedLeaf)),
    }
}

fn read_array<const N: usize>(
    rest: &[u8],
    trunc: &dyn Fn() -> LeafError,
) -> Result<[u8; N], LeafError> {
    let slice = rest.get(..N).ok_or_else(trunc)?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

/// Encodes `value` as the smallest numeric leaf that represents it.
///
/// Inverse of [`numeric_leaf`] for the integer domain: values in
/// `0..LF_NUMERIC` are written inline (2 bytes); otherwise the smallest of
/// signed/unsigned 16/32/64-bit is chosen, preferring unsigned only when the
/// value does not fit in the signed range of the same width (this matches
/// how the original encoder picks widths: unsigned is a size class, not a
/// sign preference).
pub fn write_numeric_leaf(value: i128, buf: &mut Vec<u8>) {
    if (0..LF_NUMERIC as i128).contains(&value) {
        buf.extend_from_slice(&(value as u16).to_le_bytes());
        return;
    }
    if let Ok(v) = i16::try_from(value) {
        buf.extend_from_slice(&LF_SHORT.to_le_bytes());
        buf.extend_from_slice(&v.to_le_bytes());
        return;
    }
    if let Ok(v) = u16::try_from(value) {
        buf.extend_from_slice(&LF_USHORT.to_le_bytes());
        buf.extend_from_slice(&v.to_le_bytes());
        return;
    }
    if let Ok(v) = i32::try_from(value) {
        buf.extend_from_slice(&LF_LONG.to_le_bytes());
        buf.extend_from_slice(&v.to_le_bytes());
        return;
    }
    if let Ok(v) = u32::try_from(value) {
        buf.extend_from_slice(&LF_ULONG.to_le_bytes());
        buf.extend_from_slice(&v.to_le_bytes());
        return;
    }
    if let Ok(v) = i64::try_from(value) {
        buf.extend_from_slice(&LF_QUADWORD.to_le_bytes());
        buf.extend_from_slice(&v.to_le_bytes());
        return;
    }
    let v = value as u64;
    buf.extend_from_slice(&LF_UQUADWORD.to_le_bytes());
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Returns the length, in bytes, of a pascal-style string at `bytes[0]`,
/// plus the offset at which the string body starts.
///
/// A first byte of `0xFF` followed by a zero byte means "read a 16-bit
/// length from the next two bytes" instead of the usual one-byte length.
pub fn pascal_string_length(bytes: &[u8]) -> Result<(usize, usize), LeafError> {
    let trunc = || LeafError::new(ErrorKind::HeaderTruncated);
    let first = *bytes.first().ok_or_else(trunc)?;
    if first == 0xFF {
        if bytes.get(1) != Some(&0u8) {
            return Err(LeafError::new(ErrorKind::UnsupportedLeaf));
        }
        let len: u16 = bytes.pread_with(2, LE).map_err(|_| trunc())?;
        Ok((len as usize, 4))
    } else {
        Ok((first as usize, 1))
    }
}

/// How a copied name is framed in the output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameStyle {
    /// Pascal-style: one or more length bytes followed by the raw bytes.
    Pascal,
    /// Zero-terminated C string.
    ZeroTerminated,
}

/// Copies `source` into `buf` in the given style, applying the configured
/// dot-replacement.
///
/// Per spec.md §9 "Two dialects of names", the style is always passed in
/// explicitly; this function never infers it from the bytes.
pub fn name_copy(buf: &mut Vec<u8>, source: &str, style: NameStyle, dot_replacement: char) {
    let cleaned = if source.contains('.') {
        source.replace('.', &dot_replacement.to_string())
    } else {
        source.to_owned()
    };
    match style {
        NameStyle::ZeroTerminated => {
            buf.extend_from_slice(cleaned.as_bytes());
            buf.push(0);
        }
        NameStyle::Pascal => {
            let bytes = cleaned.as_bytes();
            if bytes.len() < 0xFF {
                buf.push(bytes.len() as u8);
            } else {
                buf.push(0xFF);
                buf.push(0);
                buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            }
            buf.extend_from_slice(bytes);
        }
    }
}

/// Compares two pascal-length-tagged names for equality after applying the
/// dot-replacement to both sides.
pub fn pascal_compare(p: &[u8], q: &[u8], dot_replacement: char) -> Result<bool, LeafError> {
    let (plen, poff) = pascal_string_length(p)?;
    let (qlen, qoff) = pascal_string_length(q)?;
    let pbytes = p.get(poff..poff + plen).ok_or_else(|| LeafError::new(ErrorKind::HeaderTruncated))?;
    let qbytes = q.get(qoff..qoff + qlen).ok_or_else(|| LeafError::new(ErrorKind::HeaderTruncated))?;
    let pstr = String::from_utf8_lossy(pbytes).replace('.', &dot_replacement.to_string());
    let qstr = String::from_utf8_lossy(qbytes).replace('.', &dot_replacement.to_string());
    Ok(pstr == qstr)
}

impl fmt::Display for NumericLeaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericLeaf::U16(v) => write!(f, "{v}"),
            NumericLeaf::Signed(v, _) => write!(f, "{v}"),
            NumericLeaf::Unsigned(v, _) => write!(f, "{v}"),
            NumericLeaf::F32(v) => write!(f, "{v}"),
            NumericLeaf::F64(v) => write!(f, "{v}"),
            NumericLeaf::F80(_) => f.write_str("<real80>"),
            NumericLeaf::F128(_) => f.write_str("<real128>"),
            NumericLeaf::F48(_) => f.write_str("<real48>"),
            NumericLeaf::Complex { .. } => f.write_str("<complex>"),
            NumericLeaf::VarString(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_u16_round_trips() {
        for v in [0u16, 1, 0x1234, 0x7fff] {
            let mut buf = Vec::new();
            write_numeric_leaf(v as i128, &mut buf);
            let (decoded, len) = numeric_leaf(&buf).unwrap();
            assert_eq!(len, buf.len());
            assert_eq!(decoded.as_i128(), Some(v as i128));
        }
    }

    #[test]
    fn negative_short_round_trips() {
        let mut buf = Vec::new();
        write_numeric_leaf(-100, &mut buf);
        let (decoded, len) = numeric_leaf(&buf).unwrap();
        assert_eq!(len, 4);
        assert_eq!(decoded.as_i128(), Some(-100));
    }

    #[test]
    fn minimal_width_rule_prefers_smallest() {
        let mut buf = Vec::new();
        write_numeric_leaf(70_000, &mut buf);
        // Doesn't fit in i16/u16, fits in i32 -> LF_LONG (tag + 4 bytes = 6).
        assert_eq!(buf.len(), 6);
        let (decoded, _) = numeric_leaf(&buf).unwrap();
        assert_eq!(decoded.as_i128(), Some(70_000));
    }

    #[test]
    fn large_unsigned_round_trips() {
        let value = u64::MAX as i128;
        let mut buf = Vec::new();
        write_numeric_leaf(value, &mut buf);
        let (decoded, _) = numeric_leaf(&buf).unwrap();
        assert_eq!(decoded.as_i128(), Some(value));
    }

    #[test]
    fn unsupported_tag_is_reported() {
        let bytes = 0x9001u16.to_le_bytes();
        let err = numeric_leaf(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedLeaf);
    }

    #[test]
    fn pascal_sentinel_reads_16_bit_length() {
        let mut bytes = vec![0xFFu8, 0x00];
        bytes.extend_from_slice(&300u16.to_le_bytes());
        bytes.extend(std::iter::repeat(b'x').take(300));
        let (len, offset) = pascal_string_length(&bytes).unwrap();
        assert_eq!(len, 300);
        assert_eq!(offset, 4);
    }

    #[test]
    fn name_copy_replaces_dots_in_both_styles() {
        let mut buf = Vec::new();
        name_copy(&mut buf, "a.b.c", NameStyle::ZeroTerminated, '@');
        assert_eq!(buf, b"a@b@c\0");

        let mut buf = Vec::new();
        name_copy(&mut buf, "a.b", NameStyle::Pascal, '_');
        assert_eq!(buf, b"\x03a_b");
    }

    #[test]
    fn pascal_compare_applies_dot_replacement_both_sides() {
        let mut a = Vec::new();
        name_copy(&mut a, "foo.bar", NameStyle::Pascal, '@');
        let mut b = Vec::new();
        b.push(7u8);
        b.extend_from_slice(b"foo@bar");
        assert!(pascal_compare(&a, &b, '@').unwrap());
    }
}
