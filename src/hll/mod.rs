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

//! Binary serialization for HyperLogLog sketches.
//!
//! # Overview
//!
//! An HLL sketch keeps its evidence in one of three modes:
//!
//! - **List mode**: a short array of coupons
//! - **Set mode**: an open-addressed hash set of coupons
//! - **HLL mode**: a dense array with one register per bucket
//!
//! Each mode can be written in two layouts. The **compact** layout stores exactly
//! the live entries and is the smallest image. The **updatable** layout stores
//! the full power-of-two capacity, empty slots included, so that the image can be
//! mutated in place without reallocation.
//!
//! A sketch's coupons may live on the heap or in a borrowed image (see
//! [`HllSketch::wrap`]), in either layout; [`HllSketch::to_compact_bytes`] and
//! [`HllSketch::to_updatable_bytes`] produce a fresh image from any of them.
//!
//! # HLL Types
//!
//! - [`HllType::Hll4`]: 4 bits per bucket, plus an auxiliary table for values
//!   that do not fit
//! - [`HllType::Hll6`]: 6 bits per bucket
//! - [`HllType::Hll8`]: 8 bits per bucket
//!
//! # Coupons
//!
//! A coupon is a 32-bit value encoding both a slot number (26 bits) and a value (6 bits).
//! The slot identifies which bucket to update, and the value represents the number of
//! leading zeros in the hash plus one. The value `0` never occurs in a valid coupon
//! and marks an empty slot.
//!
//! # Usage
//!
//! ```rust
//! # use datasketches_hll::hll::{coupon, CouponList, CurMode, HllSketch, HllType};
//! let mut list = CouponList::new(12, HllType::Hll8, CurMode::List).unwrap();
//! list.insert(coupon("apple")).unwrap();
//! list.insert(coupon("banana")).unwrap();
//!
//! let sketch = HllSketch::from(list);
//! let bytes = sketch.to_compact_bytes().unwrap();
//! let restored = HllSketch::heapify(&bytes).unwrap();
//! assert_eq!(restored.pairs(), sketch.pairs());
//! ```

use std::hash::Hash;

use crate::error::{Error, ErrorKind};

mod array;
mod aux_map;
mod coupons;
mod pairs;
mod preamble;
mod sketch;

pub use self::array::HllArray;
pub use self::aux_map::AuxMap;
pub use self::coupons::CouponList;
pub use self::pairs::PairIter;
pub use self::preamble::{Flags, Preamble};
pub use self::sketch::HllSketch;

/// Target HLL type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HllType {
    /// 4 bits per bucket; values that overflow the nibble go to an [`AuxMap`].
    Hll4 = 0,
    /// 6 bits per bucket.
    Hll6 = 1,
    /// 8 bits per bucket.
    Hll8 = 2,
}

impl HllType {
    pub(crate) fn from_id(id: u8) -> Result<Self, Error> {
        match id {
            0 => Ok(HllType::Hll4),
            1 => Ok(HllType::Hll6),
            2 => Ok(HllType::Hll8),
            _ => Err(Error::new(
                ErrorKind::MalformedDeserializeData,
                format!("invalid target HLL type: {id}"),
            )),
        }
    }

    /// Bytes of the dense register array for `2^lg_config_k` buckets.
    pub fn dense_bytes(self, lg_config_k: u8) -> usize {
        let k = 1usize << lg_config_k;
        match self {
            HllType::Hll4 => k >> 1,
            HllType::Hll6 => ((k * 3) >> 2) + 1,
            HllType::Hll8 => k,
        }
    }
}

/// Current representation of a sketch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CurMode {
    List = 0,
    Set = 1,
    Hll = 2,
}

impl CurMode {
    pub(crate) fn from_id(id: u8) -> Result<Self, Error> {
        match id {
            0 => Ok(CurMode::List),
            1 => Ok(CurMode::Set),
            2 => Ok(CurMode::Hll),
            _ => Err(Error::new(
                ErrorKind::MalformedDeserializeData,
                format!("invalid current mode: {id}"),
            )),
        }
    }
}

pub(crate) const MIN_LG_K: u8 = 4;
pub(crate) const MAX_LG_K: u8 = 21;

const KEY_BITS_26: u32 = 26;
const KEY_MASK_26: u32 = (1 << KEY_BITS_26) - 1;

/// Sentinel value indicating an empty coupon slot
pub(crate) const COUPON_EMPTY: u32 = 0;

// Resize at 3/4 = 75% load factor
const RESIZE_NUMERATOR: u32 = 3;
const RESIZE_DENOMINATOR: u32 = 4;

/// Default log2 size of the aux table, indexed by lg_config_k.
const LG_AUX_ARR_INTS: [u8; 22] = [
    0, 2, 2, 2, 2, 2, 2, 3, 3, 3, // 0 - 9
    4, 4, 5, 5, 6, 7, 8, 9, 10, 11, // 10 - 19
    12, 13, // 20 - 21
];

pub(crate) fn check_lg_config_k(lg_config_k: u8) -> Result<(), Error> {
    if (MIN_LG_K..=MAX_LG_K).contains(&lg_config_k) {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::ConfigInvalid,
            format!("lg_config_k must be in [{MIN_LG_K}; {MAX_LG_K}], got {lg_config_k}"),
        ))
    }
}

/// Extract slot number (low 26 bits) from coupon
#[inline]
pub fn get_slot(coupon: u32) -> u32 {
    coupon & KEY_MASK_26
}

/// Extract value (upper 6 bits) from coupon
#[inline]
pub fn get_value(coupon: u32) -> u8 {
    (coupon >> KEY_BITS_26) as u8
}

/// Pack slot number and value into a coupon
///
/// Format: [value (6 bits) << 26] | [slot (26 bits)]
#[inline]
pub fn pack_coupon(slot: u32, value: u8) -> u32 {
    ((value as u32) << KEY_BITS_26) | (slot & KEY_MASK_26)
}

/// Generate a coupon from a hashable value.
pub fn coupon<H: Hash>(v: H) -> u32 {
    const DEFAULT_SEED: u32 = 9001;

    let mut hasher = mur3::Hasher128::with_seed(DEFAULT_SEED);
    v.hash(&mut hasher);
    let (lo, hi) = hasher.finish128();

    let addr26 = lo as u32 & KEY_MASK_26;
    let lz = hi.leading_zeros();
    let capped = lz.min(62);
    let value = capped + 1;

    (value << KEY_BITS_26) | addr26
}

/// Outcome of probing an open-addressed int array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    /// The key is absent; this index is the empty slot where it belongs.
    Empty(usize),
    /// An entry with the same key already sits at this index.
    Match(usize),
}

/// Probes `arr` (of length `1 << lg_arr`) for the key `pair & key_mask`.
///
/// Coupon arrays key on the 26-bit slot; the aux table keys on the
/// `lg_config_k` bucket mask. Both use the same odd stride so every index is
/// visited before the probe wraps.
pub(crate) fn find(arr: &[u32], lg_arr: u8, key_mask: u32, pair: u32) -> Result<Probe, Error> {
    debug_assert_eq!(arr.len(), 1 << lg_arr);

    let arr_mask = arr.len() - 1;
    let key = pair & key_mask;
    let mut probe = key as usize & arr_mask;
    let loop_index = probe;
    loop {
        let stored = arr[probe];
        if stored == COUPON_EMPTY {
            return Ok(Probe::Empty(probe));
        } else if stored & key_mask == key {
            return Ok(Probe::Match(probe));
        }

        let stride = ((key >> lg_arr) | 1) as usize;
        probe = (probe + stride) & arr_mask;
        if probe == loop_index {
            return Err(Error::new(
                ErrorKind::InvalidState,
                "key not found and no empty slots",
            )
            .with_context("lg_arr", lg_arr));
        }
    }
}

/// Rebuilds an updatable array of `1 << lg_arr` ints from a stream of valid pairs.
///
/// Every compact-to-updatable conversion goes through here. A key seen twice
/// means the source is corrupt and nothing is returned.
pub(crate) fn rebuild_updatable(
    pairs: impl Iterator<Item = u32>,
    lg_arr: u8,
    key_mask: u32,
) -> Result<Box<[u32]>, Error> {
    let mut arr = vec![COUPON_EMPTY; 1 << lg_arr].into_boxed_slice();
    for pair in pairs {
        match find(&arr, lg_arr, key_mask, pair)? {
            Probe::Empty(index) => arr[index] = pair,
            Probe::Match(_) => {
                tracing::warn!(pair, lg_arr, "duplicate key while rebuilding updatable array");
                return Err(Error::duplicate_slot(pair & key_mask));
            }
        }
    }
    Ok(arr)
}
