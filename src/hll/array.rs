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

//! HLL mode - dense register array
//!
//! Registers are packed by target type:
//!
//! - HLL4: 2 registers per byte, even slots in the low nibble. A nibble of
//!   `15` (AUX_TOKEN) means the value lives in the [`AuxMap`]; other nibbles
//!   are stored relative to `cur_min`.
//! - HLL6: 6 bits per register, read through a 16-bit little-endian window.
//! - HLL8: one byte per register.
//!
//! The register bytes are written verbatim in both layouts. Compactness only
//! changes the aux region of HLL4.

use crate::codec::{Memory, SketchBytes};
use crate::error::{Error, ErrorKind};
use crate::hll::aux_map::default_lg_aux_arr_ints;
use crate::hll::preamble::{Flags, HLL_BYTE_ARR_START, Preamble};
use crate::hll::{AuxMap, CurMode, HllType, check_lg_config_k, get_slot, get_value, pack_coupon};

const AUX_TOKEN: u8 = 15;
const VAL_MASK_6: u16 = 0x3F;
// register values share the 6-bit value field of a coupon
const MAX_REGISTER_VALUE: u8 = 63;

/// Dense HLL sketch state: register bytes, `cur_min` bookkeeping, opaque
/// estimator registers and, for HLL4, the aux exception table.
#[derive(Debug, Clone, PartialEq)]
pub struct HllArray {
    lg_config_k: u8,
    tgt_hll_type: HllType,
    bytes: Box<[u8]>,
    cur_min: u8,
    num_at_cur_min: u32,
    hip_accum: f64,
    kxq0: f64,
    kxq1: f64,
    out_of_order: bool,
    aux_map: Option<AuxMap>,
}

impl HllArray {
    /// All registers zero, as a sketch looks right after entering HLL mode
    /// with nothing carried over.
    pub fn new(lg_config_k: u8, tgt_hll_type: HllType) -> Result<Self, Error> {
        check_lg_config_k(lg_config_k)?;
        let k = 1u32 << lg_config_k;
        Ok(Self {
            lg_config_k,
            tgt_hll_type,
            bytes: vec![0u8; tgt_hll_type.dense_bytes(lg_config_k)].into_boxed_slice(),
            cur_min: 0,
            num_at_cur_min: k,
            hip_accum: 0.0,
            kxq0: k as f64,
            kxq1: 0.0,
            out_of_order: false,
            aux_map: None,
        })
    }

    pub fn lg_config_k(&self) -> u8 {
        self.lg_config_k
    }

    pub fn tgt_hll_type(&self) -> HllType {
        self.tgt_hll_type
    }

    pub fn cur_min(&self) -> u8 {
        self.cur_min
    }

    pub fn num_at_cur_min(&self) -> u32 {
        self.num_at_cur_min
    }

    pub fn hip_accum(&self) -> f64 {
        self.hip_accum
    }

    pub fn kxq0(&self) -> f64 {
        self.kxq0
    }

    pub fn kxq1(&self) -> f64 {
        self.kxq1
    }

    pub fn is_out_of_order(&self) -> bool {
        self.out_of_order
    }

    pub fn is_empty(&self) -> bool {
        self.cur_min == 0 && self.num_at_cur_min == 1 << self.lg_config_k
    }

    /// The packed register bytes, exactly as serialized.
    pub fn register_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn aux_map(&self) -> Option<&AuxMap> {
        self.aux_map.as_ref()
    }

    /// Restores the estimator registers. They are carried through
    /// serialization unchanged.
    pub fn set_estimator_state(&mut self, hip_accum: f64, kxq0: f64, kxq1: f64) {
        self.hip_accum = hip_accum;
        self.kxq0 = kxq0;
        self.kxq1 = kxq1;
    }

    pub fn set_out_of_order(&mut self, out_of_order: bool) {
        self.out_of_order = out_of_order;
    }

    /// Register value of `slot`, with `cur_min` and the aux map applied.
    pub fn get_register(&self, slot: u32) -> u8 {
        match self.tgt_hll_type {
            HllType::Hll4 => {
                let raw = get_raw4(&self.bytes, slot);
                if raw < AUX_TOKEN {
                    raw + self.cur_min
                } else {
                    // a nibble of AUX_TOKEN without an aux entry reads as the token
                    self.aux_map
                        .as_ref()
                        .and_then(|aux| aux.get(slot))
                        .unwrap_or(AUX_TOKEN + self.cur_min)
                }
            }
            HllType::Hll6 => get_raw6(&self.bytes, slot),
            HllType::Hll8 => self.bytes[slot as usize],
        }
    }

    /// Stores an absolute register value for `slot`.
    ///
    /// This places values; it does not feed the estimator or shift `cur_min`.
    /// `num_at_cur_min` is kept consistent with the stored values.
    pub fn set_register(&mut self, slot: u32, value: u8) -> Result<(), Error> {
        let k = 1u32 << self.lg_config_k;
        if slot >= k {
            return Err(Error::new(ErrorKind::ConfigInvalid, "slot out of range")
                .with_context("slot", slot)
                .with_context("k", k));
        }
        if value > MAX_REGISTER_VALUE {
            return Err(Error::new(ErrorKind::ConfigInvalid, "value exceeds 6 bits")
                .with_context("value", value));
        }
        if value < self.cur_min {
            return Err(Error::new(ErrorKind::InvalidState, "value below cur_min")
                .with_context("value", value)
                .with_context("cur_min", self.cur_min));
        }

        let old_value = self.get_register(slot);
        match self.tgt_hll_type {
            HllType::Hll4 => self.put4(slot, value)?,
            HllType::Hll6 => put_raw6(&mut self.bytes, slot, value),
            HllType::Hll8 => self.bytes[slot as usize] = value,
        }

        if old_value == self.cur_min && value != self.cur_min {
            self.num_at_cur_min -= 1;
        } else if old_value != self.cur_min && value == self.cur_min {
            self.num_at_cur_min += 1;
        }
        Ok(())
    }

    fn put4(&mut self, slot: u32, value: u8) -> Result<(), Error> {
        let shifted = value - self.cur_min;
        let raw = get_raw4(&self.bytes, slot);
        match (raw, shifted) {
            (AUX_TOKEN, shifted) if shifted >= AUX_TOKEN => {
                let lg_config_k = self.lg_config_k;
                let aux = self.aux_map.get_or_insert_with(|| AuxMap::new(lg_config_k));
                match aux.get(slot) {
                    Some(_) => aux.replace(slot, value),
                    None => aux.insert(slot, value),
                }
            }
            (AUX_TOKEN, _) => Err(Error::new(
                ErrorKind::InvalidState,
                "cannot move a register out of the aux map",
            )
            .with_context("slot", slot)),
            (_, shifted) if shifted >= AUX_TOKEN => {
                put_raw4(&mut self.bytes, slot, AUX_TOKEN);
                let lg_config_k = self.lg_config_k;
                self.aux_map
                    .get_or_insert_with(|| AuxMap::new(lg_config_k))
                    .insert(slot, value)
            }
            _ => {
                put_raw4(&mut self.bytes, slot, shifted);
                Ok(())
            }
        }
    }

    /// Every non-zero register as a (slot, value) pair, in slot order.
    pub fn pairs(&self) -> Vec<u32> {
        (0..1u32 << self.lg_config_k)
            .filter_map(|slot| match self.get_register(slot) {
                0 => None,
                value => Some(pack_coupon(slot, value)),
            })
            .collect()
    }

    /// Serializes the sketch in the compact or updatable layout.
    ///
    /// The image is the 40-byte preamble, the register bytes, and for HLL4 the
    /// aux region:
    ///
    /// | source aux | compact | updatable |
    /// |------------|---------|-----------|
    /// | none | nothing | empty array at the default size |
    /// | present | live pairs, packed | full open-addressed array |
    pub fn to_bytes(&self, compact: bool) -> Result<Vec<u8>, Error> {
        let aux = match self.tgt_hll_type {
            HllType::Hll4 => self.aux_map.as_ref(),
            HllType::Hll6 | HllType::Hll8 => None,
        };
        let (aux_bytes, aux_count, lg_arr) = match (self.tgt_hll_type, aux, compact) {
            (_, Some(aux), true) => (aux.compact_size_bytes(), aux.count(), aux.lg_aux_arr_ints()),
            (_, Some(aux), false) => (
                aux.updatable_size_bytes(),
                aux.count(),
                aux.lg_aux_arr_ints(),
            ),
            (HllType::Hll4, None, false) => {
                let lg_arr = default_lg_aux_arr_ints(self.lg_config_k);
                (4usize << lg_arr, 0, lg_arr)
            }
            (_, None, _) => (0, 0, 0),
        };

        let total_bytes = HLL_BYTE_ARR_START + self.bytes.len() + aux_bytes;
        let mut out = SketchBytes::zeroed(total_bytes);

        let preamble = Preamble {
            lg_config_k: self.lg_config_k,
            lg_arr,
            flags: Flags {
                empty: self.is_empty(),
                compact,
                out_of_order: self.out_of_order,
            },
            cur_mode: CurMode::Hll,
            tgt_hll_type: self.tgt_hll_type,
            count: aux_count,
            cur_min: self.cur_min,
            num_at_cur_min: self.num_at_cur_min,
            hip_accum: self.hip_accum,
            kxq0: self.kxq0,
            kxq1: self.kxq1,
        };
        preamble.write_to(&mut out);
        out.put_bytes(HLL_BYTE_ARR_START, &self.bytes);

        // with no aux map the count field stays zero and the reserved region empty
        if let Some(aux) = aux {
            aux.write_payload(&mut out, HLL_BYTE_ARR_START + self.bytes.len(), compact)?;
        }

        debug_assert_eq!(out.len(), total_bytes);
        Ok(out.into_bytes())
    }

    /// Reads an HLL mode image whose preamble has already been parsed.
    pub(crate) fn heapify(preamble: &Preamble, bytes: &[u8]) -> Result<Self, Error> {
        let lg_config_k = preamble.lg_config_k;
        let tgt_hll_type = preamble.tgt_hll_type;
        let compact = preamble.flags.compact;

        let num_bytes = tgt_hll_type.dense_bytes(lg_config_k);
        let aux_start = HLL_BYTE_ARR_START + num_bytes;
        let aux_count = preamble.count;

        let has_aux_region = tgt_hll_type == HllType::Hll4 && (!compact || aux_count > 0);
        // a full table of k entries grows once past lg_config_k at 3/4 load
        if has_aux_region && preamble.lg_arr > lg_config_k + 1 {
            return Err(Error::new(
                ErrorKind::MalformedDeserializeData,
                format!("invalid aux lg_arr: {}", preamble.lg_arr),
            ));
        }
        if aux_count > 1 << lg_config_k {
            return Err(Error::new(
                ErrorKind::MalformedDeserializeData,
                format!("aux count {aux_count} exceeds register count"),
            )
            .with_context("lg_config_k", lg_config_k));
        }
        let aux_bytes = match (has_aux_region, compact) {
            (false, _) => 0,
            (true, true) => (aux_count as usize) << 2,
            (true, false) => 4usize << preamble.lg_arr,
        };
        let expected_len = aux_start + aux_bytes;
        if bytes.len() < expected_len {
            return Err(Error::insufficient_data(format!(
                "HLL data needs {expected_len} bytes, got {}",
                bytes.len()
            )));
        }

        let mem = Memory::new(bytes);
        let mut data = vec![0u8; num_bytes].into_boxed_slice();
        mem.get_byte_array(HLL_BYTE_ARR_START, &mut data);

        let aux_map = match (has_aux_region, compact) {
            (true, true) => {
                let mut pairs = vec![0u32; aux_count as usize].into_boxed_slice();
                mem.get_u32_array_le(aux_start, &mut pairs);
                let lg_aux_arr_ints = fitting_lg_aux_arr_ints(lg_config_k, preamble.lg_arr, aux_count);
                Some(AuxMap::from_compact(lg_config_k, lg_aux_arr_ints, pairs))
            }
            (true, false) if aux_count > 0 => {
                let mut ints = vec![0u32; 1 << preamble.lg_arr].into_boxed_slice();
                mem.get_u32_array_le(aux_start, &mut ints);
                Some(AuxMap::from_updatable(
                    lg_config_k,
                    preamble.lg_arr,
                    ints,
                    aux_count,
                )?)
            }
            _ => None,
        };

        if let Some(aux) = &aux_map {
            for pair in aux.iter() {
                let slot = get_slot(pair);
                if slot >= 1 << lg_config_k || get_raw4(&data, slot) != AUX_TOKEN {
                    return Err(Error::new(
                        ErrorKind::MalformedDeserializeData,
                        "aux entry without AUX_TOKEN in register array",
                    )
                    .with_context("slot", slot)
                    .with_context("value", get_value(pair)));
                }
            }
        }

        Ok(Self {
            lg_config_k,
            tgt_hll_type,
            bytes: data,
            cur_min: preamble.cur_min,
            num_at_cur_min: preamble.num_at_cur_min,
            hip_accum: preamble.hip_accum,
            kxq0: preamble.kxq0,
            kxq1: preamble.kxq1,
            out_of_order: preamble.flags.out_of_order,
            aux_map,
        })
    }
}

/// Smallest table size at or above `lg_arr` that holds `count` entries below
/// the resize threshold.
fn fitting_lg_aux_arr_ints(lg_config_k: u8, lg_arr: u8, count: u32) -> u8 {
    let mut lg = lg_arr.max(default_lg_aux_arr_ints(lg_config_k));
    while 4 * count as u64 > 3 * (1u64 << lg) {
        lg += 1;
    }
    lg
}

/// Raw 4-bit value of a slot (not adjusted for cur_min)
#[inline]
fn get_raw4(bytes: &[u8], slot: u32) -> u8 {
    let byte = bytes[(slot >> 1) as usize];
    if slot & 1 == 0 {
        byte & 15 // low nibble for even slots
    } else {
        byte >> 4 // high nibble for odd slots
    }
}

#[inline]
fn put_raw4(bytes: &mut [u8], slot: u32, value: u8) {
    debug_assert!(value <= AUX_TOKEN);

    let byte_idx = (slot >> 1) as usize;
    let old_byte = bytes[byte_idx];
    bytes[byte_idx] = if slot & 1 == 0 {
        (old_byte & 0xF0) | (value & 0x0F)
    } else {
        (old_byte & 0x0F) | (value << 4)
    };
}

/// 6-bit value of a slot, which may cross a byte boundary.
#[inline]
fn get_raw6(bytes: &[u8], slot: u32) -> u8 {
    let start_bit = slot * 6;
    let byte_idx = (start_bit >> 3) as usize;
    let shift = (start_bit & 7) as u8;

    let two_bytes = u16::from_le_bytes([bytes[byte_idx], bytes[byte_idx + 1]]);
    ((two_bytes >> shift) & VAL_MASK_6) as u8
}

#[inline]
fn put_raw6(bytes: &mut [u8], slot: u32, value: u8) {
    let start_bit = slot * 6;
    let byte_idx = (start_bit >> 3) as usize;
    let shift = (start_bit & 7) as u8;

    let mut two_bytes = u16::from_le_bytes([bytes[byte_idx], bytes[byte_idx + 1]]);
    two_bytes &= !(VAL_MASK_6 << shift);
    two_bytes |= ((value as u16) & VAL_MASK_6) << shift;

    let bytes_out = two_bytes.to_le_bytes();
    bytes[byte_idx] = bytes_out[0];
    bytes[byte_idx + 1] = bytes_out[1];
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hll4_with_exceptions() -> HllArray {
        let mut arr = HllArray::new(10, HllType::Hll4).unwrap();
        arr.set_register(0, 5).unwrap();
        arr.set_register(1, 7).unwrap();
        arr.set_register(2, 20).unwrap();
        arr.set_register(513, 33).unwrap();
        arr.set_estimator_state(42.5, 1000.25, 0.0);
        arr
    }

    #[test]
    fn test_nibble_packing() {
        let mut arr = HllArray::new(4, HllType::Hll4).unwrap();
        arr.set_register(0, 5).unwrap();
        arr.set_register(1, 7).unwrap();
        assert_eq!(arr.register_bytes()[0], 0x75);
        assert_eq!(arr.num_at_cur_min(), 14);
        assert!(!arr.is_empty());
    }

    #[test]
    fn test_six_bit_packing_round_trip() {
        let mut arr = HllArray::new(4, HllType::Hll6).unwrap();
        for slot in 0..16 {
            arr.set_register(slot, (slot * 4 + 3) as u8).unwrap();
        }
        for slot in 0..16 {
            assert_eq!(arr.get_register(slot), (slot * 4 + 3) as u8);
        }
        let err = arr.set_register(0, 64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_rejects_values_wider_than_six_bits() {
        for tgt_hll_type in [HllType::Hll4, HllType::Hll6, HllType::Hll8] {
            let mut arr = HllArray::new(4, tgt_hll_type).unwrap();
            let err = arr.set_register(3, 70).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
            assert_eq!(arr.get_register(3), 0);
            assert!(arr.aux_map().is_none());

            arr.set_register(3, 63).unwrap();
            assert_eq!(arr.get_register(3), 63);
        }
    }

    #[test]
    fn test_heapify_rejects_aux_count_above_k() {
        let arr = hll4_with_exceptions();
        let mut bytes = arr.to_bytes(false).unwrap();
        bytes[36..40].copy_from_slice(&2000u32.to_le_bytes());
        let preamble = Preamble::read_from(&bytes).unwrap();
        let err = HllArray::heapify(&preamble, &bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDeserializeData);
    }

    #[test]
    fn test_exceptions_go_to_aux_map() {
        let arr = hll4_with_exceptions();
        assert_eq!(get_raw4(arr.register_bytes(), 2), AUX_TOKEN);
        assert_eq!(arr.get_register(2), 20);
        assert_eq!(arr.get_register(513), 33);
        assert_eq!(arr.aux_map().unwrap().count(), 2);
    }

    #[test]
    fn test_compact_size() {
        let arr = hll4_with_exceptions();
        let bytes = arr.to_bytes(true).unwrap();
        assert_eq!(bytes.len(), 40 + 512 + 2 * 4);
        assert_eq!(&bytes[36..40], &2u32.to_le_bytes());
        assert_eq!(bytes[5] & 8, 8);
    }

    #[test]
    fn test_updatable_size_reserves_default_aux_region() {
        let arr = HllArray::new(10, HllType::Hll4).unwrap();
        let bytes = arr.to_bytes(false).unwrap();
        // LG_AUX_ARR_INTS[10] == 4
        assert_eq!(bytes.len(), 40 + 512 + (4 << 4));
        assert_eq!(bytes[4], 4);
        assert_eq!(&bytes[36..40], &0u32.to_le_bytes());
        assert!(bytes[40 + 512..].iter().all(|b| *b == 0));

        let bytes = arr.to_bytes(true).unwrap();
        assert_eq!(bytes.len(), 40 + 512);
    }

    #[test]
    fn test_hll6_and_hll8_have_no_aux_region() {
        let arr = HllArray::new(10, HllType::Hll6).unwrap();
        assert_eq!(arr.to_bytes(false).unwrap().len(), 40 + 769);
        let arr = HllArray::new(10, HllType::Hll8).unwrap();
        assert_eq!(arr.to_bytes(false).unwrap().len(), 40 + 1024);
        assert_eq!(arr.to_bytes(true).unwrap().len(), 40 + 1024);
    }

    #[test]
    fn test_heapify_round_trip_both_layouts() {
        let arr = hll4_with_exceptions();
        for compact in [true, false] {
            let bytes = arr.to_bytes(compact).unwrap();
            let preamble = Preamble::read_from(&bytes).unwrap();
            let restored = HllArray::heapify(&preamble, &bytes).unwrap();
            assert_eq!(restored, arr);
            assert_eq!(restored.pairs(), arr.pairs());
            assert_eq!(restored.aux_map().unwrap().is_compact(), compact);
        }
    }

    #[test]
    fn test_compact_output_independent_of_aux_layout() {
        let arr = hll4_with_exceptions();
        let compact = arr.to_bytes(true).unwrap();
        let preamble = Preamble::read_from(&compact).unwrap();
        let from_compact = HllArray::heapify(&preamble, &compact).unwrap();

        assert_eq!(from_compact.to_bytes(true).unwrap(), compact);
        assert_eq!(
            from_compact.to_bytes(false).unwrap(),
            arr.to_bytes(false).unwrap()
        );
    }

    #[test]
    fn test_heapify_rejects_aux_entry_without_token() {
        let arr = hll4_with_exceptions();
        let mut bytes = arr.to_bytes(true).unwrap();
        // clear the nibble of slot 2
        bytes[40 + 1] &= 0xF0;
        let preamble = Preamble::read_from(&bytes).unwrap();
        let err = HllArray::heapify(&preamble, &bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDeserializeData);
    }

    #[test]
    fn test_heapify_rejects_truncated_data() {
        let arr = hll4_with_exceptions();
        let bytes = arr.to_bytes(false).unwrap();
        let preamble = Preamble::read_from(&bytes).unwrap();
        let err = HllArray::heapify(&preamble, &bytes[..bytes.len() - 1]).unwrap_err();
        assert!(err.message().contains("insufficient data"));
    }
}
