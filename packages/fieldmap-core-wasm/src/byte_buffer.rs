//! Typed field access at an explicit cursor over a byte buffer.
//!
//! The shapefile formats mix big- and little-endian fields at fixed
//! offsets, so every write and read names its width and byte order.

use crate::error::{GeoError, Result};

/// Growable buffer written at a movable cursor. Writing past the end
/// extends the buffer; any gap left by a forward `seek` is zero-filled.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
    cursor: usize,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ByteWriter {
            buf: Vec::with_capacity(capacity),
            cursor: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn seek(&mut self, offset: usize) -> &mut Self {
        self.cursor = offset;
        self
    }

    /// Moves the cursor to the end of the written data
    pub fn seek_end(&mut self) -> &mut Self {
        self.cursor = self.buf.len();
        self
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        let end = self.cursor + bytes.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
        self
    }

    /// Writes `bytes` into a field of exactly `width` bytes, truncating or
    /// filling the remainder with `pad`.
    pub fn put_padded(&mut self, bytes: &[u8], width: usize, pad: u8) -> &mut Self {
        let take = bytes.len().min(width);
        self.put_bytes(&bytes[..take]);
        for _ in take..width {
            self.put_u8(pad);
        }
        self
    }

    pub fn put_zeros(&mut self, count: usize) -> &mut Self {
        for _ in 0..count {
            self.put_u8(0);
        }
        self
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.put_bytes(&[value])
    }

    pub fn put_u16_le(&mut self, value: u16) -> &mut Self {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_u32_le(&mut self, value: u32) -> &mut Self {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_i32_le(&mut self, value: i32) -> &mut Self {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_i32_be(&mut self, value: i32) -> &mut Self {
        self.put_bytes(&value.to_be_bytes())
    }

    pub fn put_f64_le(&mut self, value: f64) -> &mut Self {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked reader over a borrowed buffer
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteReader { data, cursor: 0 }
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.cursor)
    }

    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.data.len() {
            return Err(GeoError::MalformedShapefile(format!(
                "offset {} is past the end of {} bytes",
                offset,
                self.data.len()
            )));
        }
        self.cursor = offset;
        Ok(())
    }

    pub fn bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self
            .cursor
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                GeoError::MalformedShapefile(format!(
                    "needed {} bytes at offset {}, only {} left",
                    count,
                    self.cursor,
                    self.remaining()
                ))
            })?;
        let slice = &self.data[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32_le(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn i32_be(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub fn f64_le(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }
}
