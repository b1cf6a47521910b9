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

//! Iteration over int arrays of pairs, wherever they are stored

use std::iter::FusedIterator;

use crate::codec::{Memory, SketchBytes};
use crate::hll::COUPON_EMPTY;

/// A borrowed array of 32-bit pairs, on the heap or inside a memory region.
#[derive(Debug, Clone, Copy)]
pub(crate) enum IntArray<'a> {
    Heap(&'a [u32]),
    Memory {
        mem: Memory<'a>,
        offset: usize,
        len: usize,
    },
}

impl IntArray<'_> {
    pub fn len(&self) -> usize {
        match self {
            IntArray::Heap(ints) => ints.len(),
            IntArray::Memory { len, .. } => *len,
        }
    }

    #[inline]
    pub fn get(&self, index: usize) -> u32 {
        match self {
            IntArray::Heap(ints) => ints[index],
            IntArray::Memory { mem, offset, .. } => mem.get_u32_le(offset + (index << 2)),
        }
    }

    /// Copies the whole array, empty slots included, to `out` at `dst_offset`.
    pub fn copy_to(&self, out: &mut SketchBytes, dst_offset: usize) {
        match self {
            IntArray::Heap(ints) => out.put_u32_array_le(dst_offset, ints),
            IntArray::Memory { mem, offset, len } => {
                out.put_bytes(dst_offset, &mem.as_slice()[*offset..*offset + (*len << 2)])
            }
        }
    }
}

/// Iterator over the valid (non-empty) pairs of a coupon array or aux table.
///
/// It works the same whether the underlying array is compact or updatable;
/// empty slots are skipped. Ask the owner for a fresh iterator to start over.
#[derive(Debug, Clone)]
pub struct PairIter<'a> {
    ints: IntArray<'a>,
    index: usize,
}

impl<'a> PairIter<'a> {
    pub(crate) fn new(ints: IntArray<'a>) -> Self {
        Self { ints, index: 0 }
    }
}

impl Iterator for PairIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        while self.index < self.ints.len() {
            let pair = self.ints.get(self.index);
            self.index += 1;
            if pair != COUPON_EMPTY {
                return Some(pair);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.ints.len() - self.index))
    }
}

impl FusedIterator for PairIter<'_> {}
