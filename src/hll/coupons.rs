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

//! LIST and SET mode coupon storage and its serialization
//!
//! Both modes keep an int array of coupons; they differ only in the preamble
//! size and in where the live count is written. The array lives on the heap or
//! in a borrowed memory image, and is laid out either compact (exactly `count`
//! ints) or updatable (`1 << lg_arr` ints with empty slots). Serialization
//! handles every combination of source storage, source layout and destination
//! layout:
//!
//! | source | destination | strategy |
//! |--------|-------------|----------|
//! | same layout | same layout | verbatim copy |
//! | compact | updatable | re-insert every pair by probing, duplicates fail |
//! | updatable | compact | pack valid pairs in iteration order |

use crate::codec::{Memory, SketchBytes};
use crate::error::{Error, ErrorKind};
use crate::hll::pairs::{IntArray, PairIter};
use crate::hll::preamble::{Flags, Preamble, data_start_for};
use crate::hll::{
    COUPON_EMPTY, CurMode, HllType, KEY_MASK_26, Probe, RESIZE_DENOMINATOR, RESIZE_NUMERATOR,
    check_lg_config_k, find, get_value, rebuild_updatable,
};

const LG_INIT_LIST_SIZE: u8 = 3;
const LG_INIT_SET_SIZE: u8 = 5;

const MIN_LG_ARR: u8 = 2;
// the LIST count is a single byte in the preamble
const MAX_LG_LIST_ARR: u8 = 7;
const MAX_LG_SET_ARR: u8 = 26;

#[derive(Debug, Clone)]
enum Store<'a> {
    /// `count` ints when compact, `1 << lg_arr` ints when updatable.
    Heap(Box<[u32]>),
    /// A complete sketch image; the coupons start after the preamble.
    Memory(Memory<'a>),
}

/// Coupons of a sketch in LIST or SET mode.
#[derive(Debug, Clone)]
pub struct CouponList<'a> {
    lg_config_k: u8,
    tgt_hll_type: HllType,
    cur_mode: CurMode,
    lg_arr: u8,
    count: u32,
    compact: bool,
    out_of_order: bool,
    store: Store<'a>,
}

impl PartialEq for CouponList<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.lg_config_k == other.lg_config_k
            && self.tgt_hll_type == other.tgt_hll_type
            && self.cur_mode == other.cur_mode
            && self.out_of_order == other.out_of_order
            && self.sorted_pairs() == other.sorted_pairs()
    }
}

impl<'a> CouponList<'a> {
    /// An empty, updatable heap list at the initial size for `cur_mode`.
    pub fn new(lg_config_k: u8, tgt_hll_type: HllType, cur_mode: CurMode) -> Result<Self, Error> {
        let lg_arr = match cur_mode {
            CurMode::Set => LG_INIT_SET_SIZE,
            _ => LG_INIT_LIST_SIZE,
        };
        Self::with_lg_arr(lg_config_k, tgt_hll_type, cur_mode, lg_arr)
    }

    /// An empty, updatable heap list with `1 << lg_arr` slots.
    pub fn with_lg_arr(
        lg_config_k: u8,
        tgt_hll_type: HllType,
        cur_mode: CurMode,
        lg_arr: u8,
    ) -> Result<Self, Error> {
        check_lg_config_k(lg_config_k)?;
        check_lg_arr(cur_mode, lg_arr).map_err(|msg| Error::new(ErrorKind::ConfigInvalid, msg))?;
        Ok(Self {
            lg_config_k,
            tgt_hll_type,
            cur_mode,
            lg_arr,
            count: 0,
            compact: false,
            out_of_order: false,
            store: Store::Heap(vec![COUPON_EMPTY; 1 << lg_arr].into_boxed_slice()),
        })
    }

    /// Views a LIST or SET image in place, without copying the coupons.
    pub(crate) fn wrap(preamble: &Preamble, mem: Memory<'a>) -> Result<Self, Error> {
        let (lg_arr, count, compact) = check_image(preamble, mem.len())?;
        Ok(Self {
            lg_config_k: preamble.lg_config_k,
            tgt_hll_type: preamble.tgt_hll_type,
            cur_mode: preamble.cur_mode,
            lg_arr,
            count,
            compact,
            out_of_order: preamble.flags.out_of_order,
            store: Store::Memory(mem),
        })
    }

    /// Copies the coupons of a LIST or SET image to the heap, keeping its layout.
    pub(crate) fn heapify(preamble: &Preamble, bytes: &[u8]) -> Result<CouponList<'static>, Error> {
        let (lg_arr, count, compact) = check_image(preamble, bytes.len())?;
        let len = if compact { count as usize } else { 1 << lg_arr };
        let mut ints = vec![COUPON_EMPTY; len].into_boxed_slice();
        Memory::new(bytes).get_u32_array_le(preamble.data_start(), &mut ints);

        let list = CouponList {
            lg_config_k: preamble.lg_config_k,
            tgt_hll_type: preamble.tgt_hll_type,
            cur_mode: preamble.cur_mode,
            lg_arr,
            count,
            compact,
            out_of_order: preamble.flags.out_of_order,
            store: Store::Heap(ints),
        };
        if !compact && list.iter().count() != count as usize {
            return Err(Error::new(
                ErrorKind::MalformedDeserializeData,
                "coupon count does not match stored coupons",
            )
            .with_context("count", count));
        }
        Ok(list)
    }

    pub fn lg_config_k(&self) -> u8 {
        self.lg_config_k
    }

    pub fn tgt_hll_type(&self) -> HllType {
        self.tgt_hll_type
    }

    pub fn cur_mode(&self) -> CurMode {
        self.cur_mode
    }

    /// Log2 of the updatable array size.
    pub fn lg_arr(&self) -> u8 {
        self.lg_arr
    }

    /// Number of live coupons.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_compact(&self) -> bool {
        self.compact
    }

    /// Whether the coupons are read from a borrowed memory region.
    pub fn is_memory(&self) -> bool {
        matches!(self.store, Store::Memory(_))
    }

    pub fn is_out_of_order(&self) -> bool {
        self.out_of_order
    }

    pub fn set_out_of_order(&mut self, out_of_order: bool) {
        self.out_of_order = out_of_order;
    }

    /// Valid coupons, whatever the storage and layout.
    pub fn iter(&self) -> PairIter<'_> {
        PairIter::new(self.int_array())
    }

    /// Adds a coupon. A coupon whose slot is already present keeps the larger
    /// value.
    ///
    /// LIST mode fails once every slot is used; moving to SET mode is up to the
    /// caller. SET mode grows at 3/4 load.
    pub fn insert(&mut self, coupon: u32) -> Result<(), Error> {
        if get_value(coupon) == 0 {
            return Err(Error::new(ErrorKind::ConfigInvalid, "coupon value must be non-zero")
                .with_context("coupon", coupon));
        }
        let lg_arr = self.lg_arr;
        let cur_mode = self.cur_mode;
        let ints = self.updatable_ints()?;
        let index = match find(ints, lg_arr, KEY_MASK_26, coupon) {
            Ok(Probe::Match(index)) => {
                if get_value(coupon) > get_value(ints[index]) {
                    ints[index] = coupon;
                }
                return Ok(());
            }
            Ok(Probe::Empty(index)) => index,
            Err(err) => return Err(err.with_context("cur_mode", format!("{cur_mode:?}"))),
        };
        ints[index] = coupon;
        self.count += 1;

        if self.cur_mode == CurMode::Set
            && RESIZE_DENOMINATOR * self.count > RESIZE_NUMERATOR * (1 << self.lg_arr)
        {
            self.grow()?;
        }
        Ok(())
    }

    /// Serializes the coupons in the compact or updatable layout.
    pub fn to_bytes(&self, dst_compact: bool) -> Result<Vec<u8>, Error> {
        let data_start = data_start_for(self.cur_mode);
        let capacity = 1usize << self.lg_arr;
        let count = self.count as usize;
        tracing::trace!(
            cur_mode = ?self.cur_mode,
            memory = self.is_memory(),
            src_compact = self.compact,
            dst_compact,
            count,
            "serializing coupons"
        );

        let out = match (&self.store, self.compact, dst_compact) {
            // no re-layout: the source image is trusted as is
            (Store::Memory(mem), true, true) | (Store::Memory(mem), false, false) => {
                let ints = if dst_compact { count } else { capacity };
                let bytes_out = data_start + (ints << 2);
                let mut bytes = vec![0u8; bytes_out];
                mem.get_byte_array(0, &mut bytes);
                SketchBytes::from_vec(bytes)
            }
            (Store::Heap(ints), true, true) | (Store::Heap(ints), false, false) => {
                let mut out = SketchBytes::zeroed(data_start + (ints.len() << 2));
                self.preamble(dst_compact).write_to(&mut out);
                IntArray::Heap(ints).copy_to(&mut out, data_start);
                out
            }
            (_, true, false) => {
                tracing::debug!(
                    count,
                    lg_arr = self.lg_arr,
                    "rebuilding compact coupons into updatable layout"
                );
                let ints = rebuild_updatable(self.iter(), self.lg_arr, KEY_MASK_26)?;
                let mut out = SketchBytes::zeroed(data_start + (capacity << 2));
                self.preamble(dst_compact).write_to(&mut out);
                out.put_u32_array_le(data_start, &ints);
                out
            }
            (_, false, true) => {
                let mut out = SketchBytes::zeroed(data_start + (count << 2));
                self.preamble(dst_compact).write_to(&mut out);
                let mut written = 0usize;
                for coupon in self.iter() {
                    if written == count {
                        break;
                    }
                    out.put_u32_le(data_start + (written << 2), coupon);
                    written += 1;
                }
                if written != count || self.iter().nth(count).is_some() {
                    return Err(Error::new(
                        ErrorKind::InvalidState,
                        "coupon iterator disagrees with coupon count",
                    )
                    .with_context("count", count));
                }
                out
            }
        };
        Ok(out.into_bytes())
    }

    fn preamble(&self, dst_compact: bool) -> Preamble {
        Preamble::coupons(
            self.lg_config_k,
            self.lg_arr,
            Flags {
                empty: self.is_empty(),
                compact: dst_compact,
                out_of_order: self.out_of_order,
            },
            self.cur_mode,
            self.tgt_hll_type,
            self.count,
        )
    }

    fn int_array(&self) -> IntArray<'_> {
        match &self.store {
            Store::Heap(ints) => IntArray::Heap(ints),
            Store::Memory(mem) => IntArray::Memory {
                mem: *mem,
                offset: data_start_for(self.cur_mode),
                len: if self.compact {
                    self.count as usize
                } else {
                    1 << self.lg_arr
                },
            },
        }
    }

    /// Heap ints in updatable layout, converting a compact array first.
    fn updatable_ints(&mut self) -> Result<&mut Box<[u32]>, Error> {
        if self.compact && !self.is_memory() {
            let ints = rebuild_updatable(self.iter(), self.lg_arr, KEY_MASK_26)?;
            self.store = Store::Heap(ints);
            self.compact = false;
        }
        match &mut self.store {
            Store::Heap(ints) => Ok(ints),
            Store::Memory(_) => Err(Error::new(
                ErrorKind::InvalidState,
                "coupons in a memory region are read-only",
            )),
        }
    }

    fn grow(&mut self) -> Result<(), Error> {
        let lg_arr = self.lg_arr + 1;
        let ints = rebuild_updatable(self.iter(), lg_arr, KEY_MASK_26)?;
        self.store = Store::Heap(ints);
        self.lg_arr = lg_arr;
        Ok(())
    }

    fn sorted_pairs(&self) -> Vec<u32> {
        let mut pairs: Vec<u32> = self.iter().collect();
        pairs.sort_unstable();
        pairs
    }
}

fn check_lg_arr(cur_mode: CurMode, lg_arr: u8) -> Result<(), String> {
    let max = match cur_mode {
        CurMode::List => MAX_LG_LIST_ARR,
        CurMode::Set => MAX_LG_SET_ARR,
        CurMode::Hll => return Err("coupon storage requires LIST or SET mode".to_string()),
    };
    if (MIN_LG_ARR..=max).contains(&lg_arr) {
        Ok(())
    } else {
        Err(format!(
            "lg_arr for {cur_mode:?} mode must be in [{MIN_LG_ARR}; {max}], got {lg_arr}"
        ))
    }
}

/// Validates a coupon image against its length, returning (lg_arr, count, compact).
fn check_image(preamble: &Preamble, len: usize) -> Result<(u8, u32, bool), Error> {
    let lg_arr = preamble.lg_arr;
    check_lg_arr(preamble.cur_mode, lg_arr)
        .map_err(|msg| Error::new(ErrorKind::MalformedDeserializeData, msg))?;

    let count = preamble.count;
    let capacity = 1usize << lg_arr;
    if count as usize > capacity {
        return Err(Error::new(
            ErrorKind::MalformedDeserializeData,
            format!("coupon count {count} exceeds capacity {capacity}"),
        ));
    }

    let compact = preamble.flags.compact;
    let ints = if compact { count as usize } else { capacity };
    let expected_len = preamble.data_start() + (ints << 2);
    if len < expected_len {
        return Err(Error::insufficient_data(format!(
            "{:?} data needs {expected_len} bytes, got {len}",
            preamble.cur_mode
        )));
    }
    Ok((lg_arr, count, compact))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hll::pack_coupon;

    fn list_of(slots: &[u32], lg_arr: u8) -> CouponList<'static> {
        let mut list = CouponList::with_lg_arr(12, HllType::Hll8, CurMode::List, lg_arr).unwrap();
        for slot in slots {
            list.insert(pack_coupon(*slot, 1)).unwrap();
        }
        list
    }

    #[test]
    fn test_insert_keeps_larger_value() {
        let mut list = list_of(&[3], 3);
        list.insert(pack_coupon(3, 9)).unwrap();
        list.insert(pack_coupon(3, 4)).unwrap();
        assert_eq!(list.count(), 1);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![pack_coupon(3, 9)]);
    }

    #[test]
    fn test_list_full() {
        let mut list = list_of(&[0, 1, 2, 3], 2);
        let err = list.insert(pack_coupon(4, 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_set_grows() {
        let mut set = CouponList::with_lg_arr(12, HllType::Hll4, CurMode::Set, 2).unwrap();
        for slot in 0..4 {
            set.insert(pack_coupon(slot * 7, 2)).unwrap();
        }
        assert_eq!(set.lg_arr(), 3);
        assert_eq!(set.count(), 4);
    }

    #[test]
    fn test_rejects_bad_config() {
        let err = CouponList::new(12, HllType::Hll8, CurMode::Hll).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        let err = CouponList::with_lg_arr(12, HllType::Hll8, CurMode::List, 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        let err = CouponList::new(2, HllType::Hll8, CurMode::List).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_sizes() {
        let list = list_of(&[3, 17, 255], 3);
        assert_eq!(list.to_bytes(true).unwrap().len(), 8 + 3 * 4);
        assert_eq!(list.to_bytes(false).unwrap().len(), 8 + 8 * 4);

        let mut set = CouponList::new(12, HllType::Hll8, CurMode::Set).unwrap();
        set.insert(pack_coupon(1, 1)).unwrap();
        assert_eq!(set.to_bytes(true).unwrap().len(), 12 + 4);
        assert_eq!(set.to_bytes(false).unwrap().len(), 12 + 32 * 4);
    }

    /// A compact LIST image holding `coupons` in exactly this order.
    fn compact_image(coupons: &[u32], lg_arr: u8) -> Vec<u8> {
        let flags = Flags {
            empty: coupons.is_empty(),
            compact: true,
            out_of_order: false,
        };
        let preamble = Preamble::coupons(
            12,
            lg_arr,
            flags,
            CurMode::List,
            HllType::Hll8,
            coupons.len() as u32,
        );
        let mut out = SketchBytes::zeroed(8 + coupons.len() * 4);
        preamble.write_to(&mut out);
        out.put_u32_array_le(8, coupons);
        out.into_bytes()
    }

    #[test]
    fn test_heap_compact_to_updatable_probes() {
        let compact = compact_image(&[pack_coupon(3, 1), pack_coupon(17, 1), pack_coupon(255, 1)], 2);
        let preamble = Preamble::read_from(&compact).unwrap();
        let heap_compact = CouponList::heapify(&preamble, &compact).unwrap();
        assert!(heap_compact.is_compact());
        assert!(!heap_compact.is_memory());

        let bytes = heap_compact.to_bytes(false).unwrap();
        assert_eq!(bytes.len(), 8 + 4 * 4);
        let slot_at =
            |i: usize| u32::from_le_bytes(bytes[8 + 4 * i..12 + 4 * i].try_into().unwrap());
        assert_eq!(slot_at(0), COUPON_EMPTY);
        assert_eq!(slot_at(1), pack_coupon(17, 1));
        assert_eq!(slot_at(2), pack_coupon(255, 1));
        assert_eq!(slot_at(3), pack_coupon(3, 1));
        assert_eq!(bytes[6], 3);
        assert_eq!(bytes[5] & 8, 0);
    }

    #[test]
    fn test_compact_to_updatable_duplicate_fails() {
        let compact = compact_image(&[pack_coupon(9, 1), pack_coupon(9, 4)], 3);
        let preamble = Preamble::read_from(&compact).unwrap();
        let heap_compact = CouponList::heapify(&preamble, &compact).unwrap();
        let err = heap_compact.to_bytes(false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        // no re-layout, no check
        assert_eq!(heap_compact.to_bytes(true).unwrap(), compact);
    }

    #[test]
    fn test_memory_source_is_read_only() {
        let bytes = list_of(&[1], 3).to_bytes(false).unwrap();
        let preamble = Preamble::read_from(&bytes).unwrap();
        let mut wrapped = CouponList::wrap(&preamble, Memory::new(&bytes)).unwrap();
        let err = wrapped.insert(pack_coupon(2, 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_check_image_rejects_bad_count() {
        let mut bytes = list_of(&[1, 2], 2).to_bytes(true).unwrap();
        bytes[6] = 9;
        let preamble = Preamble::read_from(&bytes).unwrap();
        let err = CouponList::wrap(&preamble, Memory::new(&bytes)).unwrap_err();
        assert!(err.message().contains("exceeds capacity"));
    }
}
