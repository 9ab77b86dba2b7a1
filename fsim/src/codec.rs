//! Sequential typed writer/reader over byte buffers.
//!
//! Every multi-byte value is big-endian; that byte order is part of the
//! on-disk and on-wire contracts and is shared by the database container
//! and the query protocol. The codec itself knows nothing about either
//! format, it only moves typed fields in and out of flat buffers.

use byteorder::{BigEndian, ByteOrder};

use crate::error::Error;

/// Appends typed fields to a growable buffer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u32(&mut self, value: u32) {
        let mut arr = [0u8; 4];
        BigEndian::write_u32(&mut arr, value);
        self.buf.extend_from_slice(&arr);
    }

    pub fn write_u64(&mut self, value: u64) {
        let mut arr = [0u8; 8];
        BigEndian::write_u64(&mut arr, value);
        self.buf.extend_from_slice(&arr);
    }

    pub fn write_f32(&mut self, value: f32) {
        let mut arr = [0u8; 4];
        BigEndian::write_f32(&mut arr, value);
        self.buf.extend_from_slice(&arr);
    }

    /// Length prefix followed by the raw bytes. No text encoding is applied;
    /// callers hand in bytes that are already in their final form.
    pub fn write_string(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    /// Same framing as [`write_string`](Self::write_string), used when the
    /// payload is itself a serialized sub-buffer such as a database shard.
    pub fn write_block(&mut self, bytes: &[u8]) {
        self.write_string(bytes);
    }

    /// Unframed bytes, for fixed-width payloads the reader sizes itself.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

/// Consumes typed fields from a fixed buffer, front to back.
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if n > self.remaining() {
            return Err(Error::TruncatedData);
        }
        let slice = &self.data[self.cursor..self.cursor + n];
        self.cursor += n;
        Ok(slice)
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64, Error> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    pub fn read_f32(&mut self) -> Result<f32, Error> {
        Ok(BigEndian::read_f32(self.take(4)?))
    }

    pub fn read_string(&mut self) -> Result<&'a [u8], Error> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Counterpart of [`ByteWriter::write_block`]. Nested blocks are read by
    /// constructing a fresh reader over the returned slice.
    pub fn read_block(&mut self) -> Result<&'a [u8], Error> {
        self.read_string()
    }

    pub fn read_raw(&mut self, n: usize) -> Result<&'a [u8], Error> {
        self.take(n)
    }
}
