// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Fixed-offset byte buffers used by the serializers.
//!
//! [`SketchBytes`] is the owned output buffer. Its length is fixed when it is
//! allocated and every write is range checked, so a serializer that computed
//! the wrong size panics instead of emitting truncated bytes.
//!
//! [`Memory`] is a borrowed, read-only region holding a serialized sketch image.

use byteorder::{ByteOrder, LittleEndian};

/// An owned, zero-filled byte buffer of fixed length with offset-addressed writes.
pub(crate) struct SketchBytes {
    bytes: Vec<u8>,
}

impl SketchBytes {
    /// Allocates `len` zero bytes.
    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len],
        }
    }

    /// Takes ownership of an existing image, e.g. a verbatim copy of a source region.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn put_u8(&mut self, offset: usize, n: u8) {
        self.bytes[offset] = n;
    }

    pub fn put_u32_le(&mut self, offset: usize, n: u32) {
        LittleEndian::write_u32(&mut self.bytes[offset..offset + 4], n);
    }

    pub fn put_f64_le(&mut self, offset: usize, n: f64) {
        LittleEndian::write_f64(&mut self.bytes[offset..offset + 8], n);
    }

    pub fn put_bytes(&mut self, offset: usize, buf: &[u8]) {
        self.bytes[offset..offset + buf.len()].copy_from_slice(buf);
    }

    /// Writes `ints` contiguously starting at `offset`, 4 little-endian bytes each.
    pub fn put_u32_array_le(&mut self, offset: usize, ints: &[u32]) {
        let end = offset + (ints.len() << 2);
        LittleEndian::write_u32_into(ints, &mut self.bytes[offset..end]);
    }
}

/// A borrowed, read-only memory region.
///
/// Reads past the end of the region panic; callers validate the region length
/// against the preamble before handing it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Memory<'a> {
    bytes: &'a [u8],
}

impl<'a> Memory<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_slice(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn get_u8(&self, offset: usize) -> u8 {
        self.bytes[offset]
    }

    pub fn get_u32_le(&self, offset: usize) -> u32 {
        LittleEndian::read_u32(&self.bytes[offset..offset + 4])
    }

    pub fn get_f64_le(&self, offset: usize) -> f64 {
        LittleEndian::read_f64(&self.bytes[offset..offset + 8])
    }

    /// Bulk copy of `dst.len()` bytes starting at `offset`.
    pub fn get_byte_array(&self, offset: usize, dst: &mut [u8]) {
        dst.copy_from_slice(&self.bytes[offset..offset + dst.len()]);
    }

    /// Bulk read of `dst.len()` little-endian ints starting at `offset`.
    pub fn get_u32_array_le(&self, offset: usize, dst: &mut [u32]) {
        let end = offset + (dst.len() << 2);
        LittleEndian::read_u32_into(&self.bytes[offset..end], dst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get_at_offsets() {
        let mut out = SketchBytes::zeroed(24);
        out.put_u8(0, 7);
        out.put_u32_le(4, 0xDEAD_BEEF);
        out.put_f64_le(8, 1.5);
        out.put_u32_array_le(16, &[1, 2]);

        let bytes = out.into_bytes();
        let mem = Memory::new(&bytes);
        assert_eq!(mem.get_u8(0), 7);
        assert_eq!(mem.get_u32_le(4), 0xDEAD_BEEF);
        assert_eq!(mem.get_f64_le(8), 1.5);

        let mut ints = [0u32; 2];
        mem.get_u32_array_le(16, &mut ints);
        assert_eq!(ints, [1, 2]);
        assert_eq!(&bytes[16..20], &[1, 0, 0, 0]);
    }

    #[test]
    #[should_panic]
    fn test_write_past_end_panics() {
        let mut out = SketchBytes::zeroed(4);
        out.put_u32_le(2, 1);
    }
}
