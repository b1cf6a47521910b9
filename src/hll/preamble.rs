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

//! Preamble of a serialized HLL sketch
//!
//! Every image starts with a preamble of `pre_ints` 4-byte words. Coupon modes
//! use a short preamble; HLL mode adds the estimator state.
//!
//! ## Preamble Layout (Little Endian)
//!
//! | Byte | Field | Description |
//! |------|-------|-------------|
//! | 0 | pre_ints | Preamble size in ints: 2 (LIST), 3 (SET) or 10 (HLL) |
//! | 1 | serial_version | Serialization version (currently 1) |
//! | 2 | family_id | Family ID (7 for HLL) |
//! | 3 | lg_config_k | Log2 of the number of buckets |
//! | 4 | lg_arr | Log2 of the coupon array (LIST/SET) or aux array (HLL) |
//! | 5 | flags | Bit flags (see below) |
//! | 6 | list_count / cur_min | LIST: coupon count; HLL: current minimum register |
//! | 7 | mode | Bits 0-1: current mode; bits 2-3: target HLL type |
//!
//! SET mode:
//! | Byte 8-11 | hash_set_count | Number of coupons stored |
//!
//! HLL mode:
//! | Byte 8-15 | hip_accum | HIP accumulator (f64) |
//! | Byte 16-23 | kxq0 | KxQ register for values < 32 (f64) |
//! | Byte 24-31 | kxq1 | KxQ register for values >= 32 (f64) |
//! | Byte 32-35 | num_at_cur_min | Registers equal to cur_min |
//! | Byte 36-39 | aux_count | Entries in the aux table |
//!
//! ## Flags (Byte 5)
//!
//! | Bit | Name | Description |
//! |-----|------|-------------|
//! | 2 | EMPTY | Sketch has seen no values |
//! | 3 | COMPACT | Payload holds live entries only |
//! | 4 | OUT_OF_ORDER | HIP accumulator is not valid |

use crate::codec::{Memory, SketchBytes};
use crate::error::{Error, ErrorKind};
use crate::hll::{CurMode, HllType, check_lg_config_k};

pub(crate) const HLL_FAMILY_ID: u8 = 7;
pub(crate) const SERIAL_VERSION: u8 = 1;

const PREAMBLE_INTS_BYTE: usize = 0;
const SER_VER_BYTE: usize = 1;
const FAMILY_BYTE: usize = 2;
const LG_K_BYTE: usize = 3;
const LG_ARR_BYTE: usize = 4;
const FLAGS_BYTE: usize = 5;
const LIST_COUNT_BYTE: usize = 6;
const HLL_CUR_MIN_BYTE: usize = 6;
const MODE_BYTE: usize = 7;
const HASH_SET_COUNT_INT: usize = 8;
const HIP_ACCUM_DOUBLE: usize = 8;
const KXQ0_DOUBLE: usize = 16;
const KXQ1_DOUBLE: usize = 24;
const CUR_MIN_COUNT_INT: usize = 32;
const AUX_COUNT_INT: usize = 36;

const EMPTY_FLAG_MASK: u8 = 4;
const COMPACT_FLAG_MASK: u8 = 8;
const OUT_OF_ORDER_FLAG_MASK: u8 = 16;

const LIST_PREINTS: u8 = 2;
const HASH_SET_PREINTS: u8 = 3;
const HLL_PREINTS: u8 = 10;

/// Start of the coupon array in LIST mode.
pub(crate) const LIST_INT_ARR_START: usize = 8;
/// Start of the coupon array in SET mode.
pub(crate) const HASH_SET_INT_ARR_START: usize = 12;
/// Start of the register array in HLL mode.
pub(crate) const HLL_BYTE_ARR_START: usize = 40;

/// Flag bits stored in byte 5.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub empty: bool,
    pub compact: bool,
    pub out_of_order: bool,
}

impl Flags {
    fn to_byte(self) -> u8 {
        let mut flags = 0u8;
        if self.empty {
            flags |= EMPTY_FLAG_MASK;
        }
        if self.compact {
            flags |= COMPACT_FLAG_MASK;
        }
        if self.out_of_order {
            flags |= OUT_OF_ORDER_FLAG_MASK;
        }
        flags
    }

    fn from_byte(flags: u8) -> Self {
        Self {
            empty: flags & EMPTY_FLAG_MASK != 0,
            compact: flags & COMPACT_FLAG_MASK != 0,
            out_of_order: flags & OUT_OF_ORDER_FLAG_MASK != 0,
        }
    }
}

/// Decoded preamble of an HLL sketch image.
///
/// `count` is the list count, hash set count or aux count depending on
/// `cur_mode`. The estimator fields are only written for [`CurMode::Hll`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preamble {
    pub lg_config_k: u8,
    pub lg_arr: u8,
    pub flags: Flags,
    pub cur_mode: CurMode,
    pub tgt_hll_type: HllType,
    pub count: u32,
    pub cur_min: u8,
    pub num_at_cur_min: u32,
    pub hip_accum: f64,
    pub kxq0: f64,
    pub kxq1: f64,
}

impl Preamble {
    /// A coupon-mode preamble; estimator fields are zero.
    pub(crate) fn coupons(
        lg_config_k: u8,
        lg_arr: u8,
        flags: Flags,
        cur_mode: CurMode,
        tgt_hll_type: HllType,
        count: u32,
    ) -> Self {
        debug_assert_ne!(cur_mode, CurMode::Hll);
        Self {
            lg_config_k,
            lg_arr,
            flags,
            cur_mode,
            tgt_hll_type,
            count,
            cur_min: 0,
            num_at_cur_min: 0,
            hip_accum: 0.0,
            kxq0: 0.0,
            kxq1: 0.0,
        }
    }

    /// Preamble size in 4-byte ints.
    pub fn pre_ints(&self) -> u8 {
        pre_ints_for(self.cur_mode)
    }

    /// Byte offset where the payload starts.
    pub fn data_start(&self) -> usize {
        data_start_for(self.cur_mode)
    }

    /// Writes the preamble at offset 0. Payload bytes are left untouched.
    pub(crate) fn write_to(&self, out: &mut SketchBytes) {
        out.put_u8(PREAMBLE_INTS_BYTE, self.pre_ints());
        out.put_u8(SER_VER_BYTE, SERIAL_VERSION);
        out.put_u8(FAMILY_BYTE, HLL_FAMILY_ID);
        out.put_u8(LG_K_BYTE, self.lg_config_k);
        out.put_u8(LG_ARR_BYTE, self.lg_arr);
        out.put_u8(FLAGS_BYTE, self.flags.to_byte());
        out.put_u8(
            MODE_BYTE,
            (self.cur_mode as u8 & 0x3) | ((self.tgt_hll_type as u8 & 0x3) << 2),
        );

        match self.cur_mode {
            CurMode::List => {
                debug_assert!(self.count <= u8::MAX as u32);
                out.put_u8(LIST_COUNT_BYTE, self.count as u8);
            }
            CurMode::Set => out.put_u32_le(HASH_SET_COUNT_INT, self.count),
            CurMode::Hll => {
                out.put_u8(HLL_CUR_MIN_BYTE, self.cur_min);
                out.put_f64_le(HIP_ACCUM_DOUBLE, self.hip_accum);
                out.put_f64_le(KXQ0_DOUBLE, self.kxq0);
                out.put_f64_le(KXQ1_DOUBLE, self.kxq1);
                out.put_u32_le(CUR_MIN_COUNT_INT, self.num_at_cur_min);
                out.put_u32_le(AUX_COUNT_INT, self.count);
            }
        }
    }

    /// Reads and validates a preamble.
    ///
    /// Only the preamble itself is checked; payload length is validated by the
    /// mode that owns it.
    pub fn read_from(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < LIST_INT_ARR_START {
            return Err(Error::insufficient_data(format!(
                "expected at least {LIST_INT_ARR_START} bytes, got {}",
                bytes.len()
            )));
        }
        let mem = Memory::new(bytes);

        let family_id = mem.get_u8(FAMILY_BYTE);
        if family_id != HLL_FAMILY_ID {
            return Err(Error::invalid_family(HLL_FAMILY_ID, family_id, "HLL"));
        }
        let ser_ver = mem.get_u8(SER_VER_BYTE);
        if ser_ver != SERIAL_VERSION {
            return Err(Error::unsupported_serial_version(SERIAL_VERSION, ser_ver));
        }
        let lg_config_k = mem.get_u8(LG_K_BYTE);
        check_lg_config_k(lg_config_k).map_err(|err| {
            Error::new(ErrorKind::MalformedDeserializeData, err.message())
                .with_context("lg_config_k", lg_config_k)
        })?;

        let mode_byte = mem.get_u8(MODE_BYTE);
        let cur_mode = CurMode::from_id(mode_byte & 0x3)?;
        let tgt_hll_type = HllType::from_id((mode_byte >> 2) & 0x3)?;

        let pre_ints = mem.get_u8(PREAMBLE_INTS_BYTE);
        let expected_pre_ints = pre_ints_for(cur_mode);
        if pre_ints != expected_pre_ints {
            return Err(Error::new(
                ErrorKind::MalformedDeserializeData,
                format!(
                    "invalid preamble ints for {cur_mode:?} mode: expected {expected_pre_ints}, got {pre_ints}"
                ),
            ));
        }
        let data_start = data_start_for(cur_mode);
        if bytes.len() < data_start {
            return Err(Error::insufficient_data(format!(
                "{cur_mode:?} preamble needs {data_start} bytes, got {}",
                bytes.len()
            )));
        }

        let mut preamble = Preamble {
            lg_config_k,
            lg_arr: mem.get_u8(LG_ARR_BYTE),
            flags: Flags::from_byte(mem.get_u8(FLAGS_BYTE)),
            cur_mode,
            tgt_hll_type,
            count: 0,
            cur_min: 0,
            num_at_cur_min: 0,
            hip_accum: 0.0,
            kxq0: 0.0,
            kxq1: 0.0,
        };
        match cur_mode {
            CurMode::List => preamble.count = mem.get_u8(LIST_COUNT_BYTE) as u32,
            CurMode::Set => preamble.count = mem.get_u32_le(HASH_SET_COUNT_INT),
            CurMode::Hll => {
                preamble.cur_min = mem.get_u8(HLL_CUR_MIN_BYTE);
                preamble.hip_accum = mem.get_f64_le(HIP_ACCUM_DOUBLE);
                preamble.kxq0 = mem.get_f64_le(KXQ0_DOUBLE);
                preamble.kxq1 = mem.get_f64_le(KXQ1_DOUBLE);
                preamble.num_at_cur_min = mem.get_u32_le(CUR_MIN_COUNT_INT);
                preamble.count = mem.get_u32_le(AUX_COUNT_INT);
            }
        }
        Ok(preamble)
    }
}

fn pre_ints_for(cur_mode: CurMode) -> u8 {
    match cur_mode {
        CurMode::List => LIST_PREINTS,
        CurMode::Set => HASH_SET_PREINTS,
        CurMode::Hll => HLL_PREINTS,
    }
}

pub(crate) fn data_start_for(cur_mode: CurMode) -> usize {
    match cur_mode {
        CurMode::List => LIST_INT_ARR_START,
        CurMode::Set => HASH_SET_INT_ARR_START,
        CurMode::Hll => HLL_BYTE_ARR_START,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hll_preamble() -> Preamble {
        Preamble {
            lg_config_k: 12,
            lg_arr: 4,
            flags: Flags {
                empty: false,
                compact: true,
                out_of_order: true,
            },
            cur_mode: CurMode::Hll,
            tgt_hll_type: HllType::Hll4,
            count: 3,
            cur_min: 2,
            num_at_cur_min: 4000,
            hip_accum: 1234.5,
            kxq0: 17.25,
            kxq1: 1e-12,
        }
    }

    #[test]
    fn test_hll_preamble_layout() {
        let mut out = SketchBytes::zeroed(HLL_BYTE_ARR_START);
        hll_preamble().write_to(&mut out);
        let bytes = out.into_bytes();

        assert_eq!(bytes[0], 10);
        assert_eq!(bytes[1], 1);
        assert_eq!(bytes[2], 7);
        assert_eq!(bytes[3], 12);
        assert_eq!(bytes[4], 4);
        assert_eq!(bytes[5], COMPACT_FLAG_MASK | OUT_OF_ORDER_FLAG_MASK);
        assert_eq!(bytes[6], 2);
        assert_eq!(bytes[7], 2);
        assert_eq!(&bytes[8..16], &1234.5f64.to_le_bytes());
        assert_eq!(&bytes[32..36], &4000u32.to_le_bytes());
        assert_eq!(&bytes[36..40], &3u32.to_le_bytes());

        assert_eq!(Preamble::read_from(&bytes).unwrap(), hll_preamble());
    }

    #[test]
    fn test_list_and_set_count_fields() {
        let flags = Flags {
            empty: false,
            compact: false,
            out_of_order: false,
        };

        let mut out = SketchBytes::zeroed(LIST_INT_ARR_START);
        Preamble::coupons(12, 3, flags, CurMode::List, HllType::Hll6, 5).write_to(&mut out);
        let bytes = out.into_bytes();
        assert_eq!(bytes[0], 2);
        assert_eq!(bytes[6], 5);
        assert_eq!(bytes[7], 1 << 2);

        let mut out = SketchBytes::zeroed(HASH_SET_INT_ARR_START);
        Preamble::coupons(12, 5, flags, CurMode::Set, HllType::Hll8, 300).write_to(&mut out);
        let bytes = out.into_bytes();
        assert_eq!(bytes[0], 3);
        assert_eq!(bytes[6], 0);
        assert_eq!(bytes[7], 1 | (2 << 2));
        assert_eq!(&bytes[8..12], &300u32.to_le_bytes());

        let read = Preamble::read_from(&bytes).unwrap();
        assert_eq!(read.count, 300);
        assert_eq!(read.cur_mode, CurMode::Set);
        assert_eq!(read.data_start(), HASH_SET_INT_ARR_START);
    }

    #[test]
    fn test_read_rejects_bad_headers() {
        let mut out = SketchBytes::zeroed(HLL_BYTE_ARR_START);
        hll_preamble().write_to(&mut out);
        let good = out.into_bytes();

        let mut bytes = good.clone();
        bytes[FAMILY_BYTE] = 3;
        let err = Preamble::read_from(&bytes).unwrap_err();
        assert!(err.message().contains("invalid family"));

        let mut bytes = good.clone();
        bytes[SER_VER_BYTE] = 2;
        let err = Preamble::read_from(&bytes).unwrap_err();
        assert!(err.message().contains("unsupported serial version"));

        let mut bytes = good.clone();
        bytes[LG_K_BYTE] = 30;
        let err = Preamble::read_from(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDeserializeData);

        let mut bytes = good.clone();
        bytes[PREAMBLE_INTS_BYTE] = 2;
        let err = Preamble::read_from(&bytes).unwrap_err();
        assert!(err.message().contains("invalid preamble ints"));

        let err = Preamble::read_from(&good[..20]).unwrap_err();
        assert!(err.message().contains("insufficient data"));
    }
}
