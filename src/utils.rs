//! Internal module providing handy function

use byteorder::{ByteOrder, LittleEndian};

macro_rules! from_err {
    ($from:ty, $to:tt, $var:tt) => {
        impl From<$from> for $to {
            fn from(e: $from) -> $to {
                $to::$var(e)
            }
        }
    };
}

/// Reads a little endian `u16` from the start of `s`
///
/// Panics if `s` is shorter than 2 bytes, callers check lengths beforehand
#[inline]
pub fn read_u16(s: &[u8]) -> u16 {
    LittleEndian::read_u16(s)
}

/// Reads a little endian `u32` from the start of `s`
#[inline]
pub fn read_u32(s: &[u8]) -> u32 {
    LittleEndian::read_u32(s)
}

/// Reads a little endian `i32` from the start of `s`
#[inline]
pub fn read_i32(s: &[u8]) -> i32 {
    LittleEndian::read_i32(s)
}

/// Reads a little endian `u64` from the start of `s`
#[inline]
pub fn read_u64(s: &[u8]) -> u64 {
    LittleEndian::read_u64(s)
}

/// Reads a little endian `f64` from the start of `s`
#[inline]
pub fn read_f64(s: &[u8]) -> f64 {
    LittleEndian::read_f64(s)
}

/// Bounds checked variant of [`read_u16`]
#[inline]
pub fn get_u16(s: &[u8], pos: usize) -> Option<u16> {
    s.get(pos..pos.checked_add(2)?).map(read_u16)
}

/// Bounds checked variant of [`read_u32`]
#[inline]
pub fn get_u32(s: &[u8], pos: usize) -> Option<u32> {
    s.get(pos..pos.checked_add(4)?).map(read_u32)
}

/// Iterates over the little endian `u32`s of a sector
///
/// Trailing bytes which do not form a complete `u32` are ignored.
pub fn to_u32(s: &[u8]) -> impl Iterator<Item = u32> + '_ {
    s.chunks_exact(4).map(read_u32)
}
