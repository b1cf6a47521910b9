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

use crate::codec::Memory;
use crate::error::Error;
use crate::hll::preamble::Preamble;
use crate::hll::{CouponList, CurMode, HllArray, HllType};

#[derive(Debug, Clone, PartialEq)]
enum Mode<'a> {
    Coupons(CouponList<'a>),
    Array(HllArray),
}

/// A HyperLogLog sketch in any mode, ready to be serialized.
///
/// Sketches read with [`HllSketch::wrap`] borrow the coupons of the source
/// image; all others own their data.
#[derive(Debug, Clone, PartialEq)]
pub struct HllSketch<'a> {
    mode: Mode<'a>,
}

impl<'a> From<CouponList<'a>> for HllSketch<'a> {
    fn from(list: CouponList<'a>) -> Self {
        Self {
            mode: Mode::Coupons(list),
        }
    }
}

impl From<HllArray> for HllSketch<'_> {
    fn from(array: HllArray) -> Self {
        Self {
            mode: Mode::Array(array),
        }
    }
}

impl HllSketch<'_> {
    /// Reads a sketch image into heap storage.
    ///
    /// LIST and SET coupons keep the layout of the image; a compact image stays
    /// compact until it is modified.
    pub fn heapify(bytes: &[u8]) -> Result<HllSketch<'static>, Error> {
        let preamble = Preamble::read_from(bytes)?;
        let mode = match preamble.cur_mode {
            CurMode::List | CurMode::Set => Mode::Coupons(CouponList::heapify(&preamble, bytes)?),
            CurMode::Hll => Mode::Array(HllArray::heapify(&preamble, bytes)?),
        };
        Ok(HllSketch { mode })
    }
}

impl<'a> HllSketch<'a> {
    /// Reads a sketch image, borrowing the coupons of LIST and SET images in
    /// place. HLL images are copied to the heap.
    pub fn wrap(bytes: &'a [u8]) -> Result<Self, Error> {
        let preamble = Preamble::read_from(bytes)?;
        let mode = match preamble.cur_mode {
            CurMode::List | CurMode::Set => {
                Mode::Coupons(CouponList::wrap(&preamble, Memory::new(bytes))?)
            }
            CurMode::Hll => Mode::Array(HllArray::heapify(&preamble, bytes)?),
        };
        Ok(Self { mode })
    }

    /// Serializes in the compact layout: live entries only, not updatable in place.
    pub fn to_compact_bytes(&self) -> Result<Vec<u8>, Error> {
        self.to_bytes(true)
    }

    /// Serializes in the updatable layout: full capacity, empty slots included.
    pub fn to_updatable_bytes(&self) -> Result<Vec<u8>, Error> {
        self.to_bytes(false)
    }

    pub fn to_bytes(&self, compact: bool) -> Result<Vec<u8>, Error> {
        match &self.mode {
            Mode::Coupons(list) => list.to_bytes(compact),
            Mode::Array(array) => array.to_bytes(compact),
        }
    }

    pub fn lg_config_k(&self) -> u8 {
        match &self.mode {
            Mode::Coupons(list) => list.lg_config_k(),
            Mode::Array(array) => array.lg_config_k(),
        }
    }

    pub fn cur_mode(&self) -> CurMode {
        match &self.mode {
            Mode::Coupons(list) => list.cur_mode(),
            Mode::Array(_) => CurMode::Hll,
        }
    }

    pub fn tgt_hll_type(&self) -> HllType {
        match &self.mode {
            Mode::Coupons(list) => list.tgt_hll_type(),
            Mode::Array(array) => array.tgt_hll_type(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.mode {
            Mode::Coupons(list) => list.is_empty(),
            Mode::Array(array) => array.is_empty(),
        }
    }

    pub fn is_out_of_order(&self) -> bool {
        match &self.mode {
            Mode::Coupons(list) => list.is_out_of_order(),
            Mode::Array(array) => array.is_out_of_order(),
        }
    }

    /// Whether the coupons (or the HLL4 aux table) are held in compact layout.
    pub fn is_compact(&self) -> bool {
        match &self.mode {
            Mode::Coupons(list) => list.is_compact(),
            Mode::Array(array) => array.aux_map().is_some_and(|aux| aux.is_compact()),
        }
    }

    pub fn is_memory(&self) -> bool {
        match &self.mode {
            Mode::Coupons(list) => list.is_memory(),
            Mode::Array(_) => false,
        }
    }

    pub fn as_coupons(&self) -> Option<&CouponList<'a>> {
        match &self.mode {
            Mode::Coupons(list) => Some(list),
            Mode::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&HllArray> {
        match &self.mode {
            Mode::Coupons(_) => None,
            Mode::Array(array) => Some(array),
        }
    }

    /// The (slot, value) pairs recoverable from this sketch, sorted.
    ///
    /// For HLL mode these are the non-zero registers.
    pub fn pairs(&self) -> Vec<u32> {
        let mut pairs = match &self.mode {
            Mode::Coupons(list) => list.iter().collect(),
            Mode::Array(array) => array.pairs(),
        };
        pairs.sort_unstable();
        pairs
    }
}
