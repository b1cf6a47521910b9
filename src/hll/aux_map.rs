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

//! Auxiliary exception table for Array4
//!
//! When a register value does not fit into 4 bits after the `cur_min` offset,
//! Array4 stores the nibble `15` and keeps the real value here, as a pair of
//! (slot, value) keyed on the slot number.
//!
//! The table is backed either by an open-addressed array of
//! `1 << lg_aux_arr_ints` ints (updatable) or by the live pairs packed
//! back-to-back (compact). Both serialize to either layout.

use crate::codec::SketchBytes;
use crate::error::{Error, ErrorKind};
use crate::hll::pairs::{IntArray, PairIter};
use crate::hll::{
    COUPON_EMPTY, LG_AUX_ARR_INTS, Probe, RESIZE_DENOMINATOR, RESIZE_NUMERATOR, find, get_slot,
    get_value, pack_coupon, rebuild_updatable,
};

/// Exception table mapping slot numbers to full-width register values.
#[derive(Debug, Clone)]
pub struct AuxMap {
    lg_config_k: u8,
    lg_aux_arr_ints: u8,
    count: u32,
    ints: Box<[u32]>,
    compact: bool,
}

impl PartialEq for AuxMap {
    fn eq(&self, other: &Self) -> bool {
        self.lg_config_k == other.lg_config_k && self.sorted_pairs() == other.sorted_pairs()
    }
}

impl AuxMap {
    /// An empty, updatable table at the default size for `lg_config_k`.
    pub fn new(lg_config_k: u8) -> Self {
        let lg_aux_arr_ints = default_lg_aux_arr_ints(lg_config_k);
        Self {
            lg_config_k,
            lg_aux_arr_ints,
            count: 0,
            ints: vec![COUPON_EMPTY; 1 << lg_aux_arr_ints].into_boxed_slice(),
            compact: false,
        }
    }

    /// Wraps packed pairs read from a compact image.
    pub(crate) fn from_compact(lg_config_k: u8, lg_aux_arr_ints: u8, pairs: Box<[u32]>) -> Self {
        Self {
            lg_config_k,
            lg_aux_arr_ints,
            count: pairs.len() as u32,
            ints: pairs,
            compact: true,
        }
    }

    /// Wraps an open-addressed array read from an updatable image.
    pub(crate) fn from_updatable(
        lg_config_k: u8,
        lg_aux_arr_ints: u8,
        ints: Box<[u32]>,
        count: u32,
    ) -> Result<Self, Error> {
        debug_assert_eq!(ints.len(), 1 << lg_aux_arr_ints);
        let aux = Self {
            lg_config_k,
            lg_aux_arr_ints,
            count,
            ints,
            compact: false,
        };
        let live = aux.iter().count();
        if live != count as usize {
            return Err(Error::new(
                ErrorKind::MalformedDeserializeData,
                format!("aux count {count} does not match {live} stored entries"),
            ));
        }
        Ok(aux)
    }

    /// Number of live entries.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn lg_aux_arr_ints(&self) -> u8 {
        self.lg_aux_arr_ints
    }

    pub fn is_compact(&self) -> bool {
        self.compact
    }

    /// Valid (slot, value) pairs, packed as coupons.
    pub fn iter(&self) -> PairIter<'_> {
        PairIter::new(IntArray::Heap(&self.ints))
    }

    pub fn get(&self, slot: u32) -> Option<u8> {
        if self.compact {
            return self
                .iter()
                .find(|pair| get_slot(*pair) == slot)
                .map(get_value);
        }
        match find(&self.ints, self.lg_aux_arr_ints, self.key_mask(), slot).ok()? {
            Probe::Match(index) => Some(get_value(self.ints[index])),
            Probe::Empty(_) => None,
        }
    }

    /// Adds a slot that must not be present yet.
    pub fn insert(&mut self, slot: u32, value: u8) -> Result<(), Error> {
        let pair = self.pair_of(slot, value)?;
        self.make_updatable()?;
        match find(&self.ints, self.lg_aux_arr_ints, self.key_mask(), pair)? {
            Probe::Empty(index) => {
                self.ints[index] = pair;
                self.count += 1;
                self.check_grow()
            }
            Probe::Match(_) => Err(Error::duplicate_slot(slot)),
        }
    }

    /// Overwrites the value of a slot that must already be present.
    pub fn replace(&mut self, slot: u32, value: u8) -> Result<(), Error> {
        let pair = self.pair_of(slot, value)?;
        self.make_updatable()?;
        match find(&self.ints, self.lg_aux_arr_ints, self.key_mask(), pair)? {
            Probe::Match(index) => {
                self.ints[index] = pair;
                Ok(())
            }
            Probe::Empty(_) => Err(Error::new(ErrorKind::InvalidState, "slot not in aux map")
                .with_context("slot", slot)),
        }
    }

    /// Bytes this table occupies in a compact image.
    pub fn compact_size_bytes(&self) -> usize {
        (self.count as usize) << 2
    }

    /// Bytes this table occupies in an updatable image.
    pub fn updatable_size_bytes(&self) -> usize {
        4 << self.lg_aux_arr_ints
    }

    /// Writes the aux region starting at `aux_start`.
    ///
    /// The caller has already put `count()` and `lg_aux_arr_ints()` into the
    /// preamble.
    pub(crate) fn write_payload(
        &self,
        out: &mut SketchBytes,
        aux_start: usize,
        dst_compact: bool,
    ) -> Result<(), Error> {
        if dst_compact {
            let mut written = 0u32;
            for pair in self.iter() {
                out.put_u32_le(aux_start + ((written as usize) << 2), pair);
                written += 1;
            }
            if written != self.count {
                return Err(Error::new(
                    ErrorKind::InvalidState,
                    "aux iterator disagrees with aux count",
                )
                .with_context("count", self.count)
                .with_context("written", written));
            }
        } else if self.compact {
            tracing::debug!(
                count = self.count,
                lg_aux_arr_ints = self.lg_aux_arr_ints,
                "rebuilding compact aux map into updatable layout"
            );
            let ints = rebuild_updatable(self.iter(), self.lg_aux_arr_ints, self.key_mask())?;
            out.put_u32_array_le(aux_start, &ints);
        } else {
            IntArray::Heap(&self.ints).copy_to(out, aux_start);
        }
        Ok(())
    }

    fn pair_of(&self, slot: u32, value: u8) -> Result<u32, Error> {
        if slot > self.key_mask() || value > 63 {
            return Err(Error::new(ErrorKind::ConfigInvalid, "aux entry out of range")
                .with_context("slot", slot)
                .with_context("value", value));
        }
        Ok(pack_coupon(slot, value))
    }

    fn key_mask(&self) -> u32 {
        (1 << self.lg_config_k) - 1
    }

    fn make_updatable(&mut self) -> Result<(), Error> {
        if self.compact {
            self.ints = rebuild_updatable(self.iter(), self.lg_aux_arr_ints, self.key_mask())?;
            self.compact = false;
        }
        Ok(())
    }

    fn check_grow(&mut self) -> Result<(), Error> {
        if RESIZE_DENOMINATOR * self.count > RESIZE_NUMERATOR * (1 << self.lg_aux_arr_ints) {
            let lg_aux_arr_ints = self.lg_aux_arr_ints + 1;
            self.ints = rebuild_updatable(self.iter(), lg_aux_arr_ints, self.key_mask())?;
            self.lg_aux_arr_ints = lg_aux_arr_ints;
        }
        Ok(())
    }

    fn sorted_pairs(&self) -> Vec<u32> {
        let mut pairs: Vec<u32> = self.iter().collect();
        pairs.sort_unstable();
        pairs
    }
}

pub(crate) fn default_lg_aux_arr_ints(lg_config_k: u8) -> u8 {
    LG_AUX_ARR_INTS[lg_config_k as usize]
}
