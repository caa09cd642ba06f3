//! Fixed-width little-endian field access over page buffers.
//!
//! Callers bounds-check the surrounding region first; these helpers panic on a
//! short slice the same way slice indexing does.

/// Reads a `u16` stored at `offset`.
#[inline]
pub fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

/// Writes `value` as a `u16` at `offset`.
#[inline]
pub fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Reads a `u32` stored at `offset`.
#[inline]
pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Writes `value` as a `u32` at `offset`.
#[inline]
pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
