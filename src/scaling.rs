//! Quantization scaling lists
//!
//! Per-(size, list, QP-remainder) forward and inverse scaling matrices.
//! Lists are built once per slice, either from the HEVC flat default (all
//! entries 16) or from an explicitly supplied set, and are immutable
//! afterwards; workers share one instance behind an `Arc`.
//!
//! Forward matrices hold `(QUANT_SCALES[rem] << 4) / entry`, inverse
//! matrices hold `INV_QUANT_SCALES[rem] * entry`. With the flat default
//! this reduces to `QUANT_SCALES[rem]` / `INV_QUANT_SCALES[rem] << 4`, and
//! the dequant path may use the plain 6-entry scale table instead.

use crate::error::{Error, Result};

/// Transform sizes covered by scaling lists (4x4 .. 32x32)
pub const NUM_SCALING_SIZES: usize = 4;

/// List ids: (intra, inter) x (Y, Cb, Cr)
pub const NUM_SCALING_LISTS: usize = 6;

/// QP remainder classes
pub const NUM_SCALING_REM: usize = 6;

/// Forward quantizer scales by QP % 6
pub const QUANT_SCALES: [i32; 6] = [26214, 23302, 20560, 18396, 16384, 14564];

/// Inverse quantizer scales by QP % 6
pub const INV_QUANT_SCALES: [i32; 6] = [40, 45, 51, 57, 64, 72];

/// Flat default list entry
const FLAT_ENTRY: i32 = 16;

/// Raw scaling-list entries in the signalled layout: 16 entries for 4x4,
/// 64 sub-sampled entries for the larger sizes, with an explicit DC
/// replacement coefficient for 16x16 and 32x32.
#[derive(Debug, Clone)]
pub struct ScalingListData {
    /// Entries per (size, list id)
    pub lists: [[Vec<i32>; NUM_SCALING_LISTS]; NUM_SCALING_SIZES],
    /// DC coefficients for 16x16 and 32x32, indexed `size_idx - 2`
    pub dc: [[i32; NUM_SCALING_LISTS]; 2],
}

impl ScalingListData {
    /// Flat default: every entry 16
    pub fn flat() -> Self {
        let lists = std::array::from_fn(|size_idx| {
            let n = if size_idx == 0 { 16 } else { 64 };
            std::array::from_fn(|_| vec![FLAT_ENTRY; n])
        });
        ScalingListData {
            lists,
            dc: [[FLAT_ENTRY; NUM_SCALING_LISTS]; 2],
        }
    }
}

/// Immutable store of forward/inverse quantization matrices
pub struct ScalingList {
    enabled: bool,
    quant_coef: [[[Box<[i32]>; NUM_SCALING_REM]; NUM_SCALING_LISTS]; NUM_SCALING_SIZES],
    dequant_coef: [[[Box<[i32]>; NUM_SCALING_REM]; NUM_SCALING_LISTS]; NUM_SCALING_SIZES],
}

impl ScalingList {
    /// Build the flat default store. The dequant path then uses the plain
    /// `INV_QUANT_SCALES` table (`enabled()` is false).
    pub fn flat() -> Self {
        let mut list = Self::build(&ScalingListData::flat());
        list.enabled = false;
        list
    }

    /// Build from an explicitly supplied set; the dequant path uses the
    /// per-coefficient matrices.
    pub fn from_data(data: &ScalingListData) -> Result<Self> {
        for size_idx in 0..NUM_SCALING_SIZES {
            let expect = if size_idx == 0 { 16 } else { 64 };
            for list_id in 0..NUM_SCALING_LISTS {
                let entries = &data.lists[size_idx][list_id];
                if entries.len() != expect {
                    return Err(Error::invalid_input(format!(
                        "scaling list {}x{} id {} has {} entries, expected {}",
                        4 << size_idx,
                        4 << size_idx,
                        list_id,
                        entries.len(),
                        expect
                    )));
                }
                if entries.iter().any(|&c| !(1..=255).contains(&c)) {
                    return Err(Error::invalid_input(format!(
                        "scaling list {}x{} id {} entry out of 1..=255",
                        4 << size_idx,
                        4 << size_idx,
                        list_id
                    )));
                }
            }
        }
        for dc_row in &data.dc {
            if dc_row.iter().any(|&c| !(1..=255).contains(&c)) {
                return Err(Error::invalid_input("scaling list DC out of 1..=255"));
            }
        }
        Ok(Self::build(data))
    }

    fn build(data: &ScalingListData) -> Self {
        let quant_coef = std::array::from_fn(|size_idx| {
            std::array::from_fn(|list_id| {
                std::array::from_fn(|rem| {
                    Self::expand(data, size_idx, list_id, |entry| {
                        (QUANT_SCALES[rem] << 4) / entry
                    })
                })
            })
        });
        let dequant_coef = std::array::from_fn(|size_idx| {
            std::array::from_fn(|list_id| {
                std::array::from_fn(|rem| {
                    Self::expand(data, size_idx, list_id, |entry| {
                        INV_QUANT_SCALES[rem] * entry
                    })
                })
            })
        });
        tracing::debug!("scaling lists built");
        ScalingList {
            enabled: true,
            quant_coef,
            dequant_coef,
        }
    }

    /// Up-sample one signalled list to the full transform size and map each
    /// entry through `f`, applying the DC replacement for 16x16/32x32.
    fn expand<F: Fn(i32) -> i32>(
        data: &ScalingListData,
        size_idx: usize,
        list_id: usize,
        f: F,
    ) -> Box<[i32]> {
        let size = 4usize << size_idx;
        let entries = &data.lists[size_idx][list_id];
        let (src_side, ratio) = if size_idx == 0 { (4, 1) } else { (8, size / 8) };
        let mut out = vec![0i32; size * size];
        for y in 0..size {
            for x in 0..size {
                out[y * size + x] = f(entries[(y / ratio) * src_side + x / ratio]);
            }
        }
        if size_idx >= 2 {
            out[0] = f(data.dc[size_idx - 2][list_id]);
        }
        out.into_boxed_slice()
    }

    /// True when explicit lists are in use and the dequant path must apply
    /// the per-coefficient matrices.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Forward matrix for (size index, list id, QP % 6)
    pub fn quant_coef(&self, size_idx: usize, list_id: usize, rem: usize) -> &[i32] {
        &self.quant_coef[size_idx][list_id][rem]
    }

    /// Inverse matrix for (size index, list id, QP % 6)
    pub fn dequant_coef(&self, size_idx: usize, list_id: usize, rem: usize) -> &[i32] {
        &self.dequant_coef[size_idx][list_id][rem]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_quant_coef_equals_scale() {
        let list = ScalingList::flat();
        assert!(!list.enabled());
        for size_idx in 0..NUM_SCALING_SIZES {
            for rem in 0..NUM_SCALING_REM {
                let q = list.quant_coef(size_idx, 0, rem);
                assert_eq!(q.len(), (4 << size_idx) * (4 << size_idx));
                assert!(q.iter().all(|&v| v == QUANT_SCALES[rem]));
                let d = list.dequant_coef(size_idx, 0, rem);
                assert!(d.iter().all(|&v| v == INV_QUANT_SCALES[rem] << 4));
            }
        }
    }

    #[test]
    fn test_custom_list_upsampling() {
        let mut data = ScalingListData::flat();
        // mark the signalled top-left entry of the 16x16 intra luma list
        data.lists[2][0][0] = 32;
        data.dc[0][0] = 8;
        let list = ScalingList::from_data(&data).unwrap();
        assert!(list.enabled());

        let d = list.dequant_coef(2, 0, 0);
        // DC replaced
        assert_eq!(d[0], INV_QUANT_SCALES[0] * 8);
        // the rest of the 2x2 up-sampled region keeps the signalled value
        assert_eq!(d[1], INV_QUANT_SCALES[0] * 32);
        assert_eq!(d[16], INV_QUANT_SCALES[0] * 32);
        assert_eq!(d[17], INV_QUANT_SCALES[0] * 32);
        // outside the region, flat
        assert_eq!(d[2], INV_QUANT_SCALES[0] * 16);
    }

    #[test]
    fn test_invalid_entries_rejected() {
        let mut data = ScalingListData::flat();
        data.lists[0][0][3] = 0;
        assert!(ScalingList::from_data(&data).is_err());

        let mut data = ScalingListData::flat();
        data.lists[1][2] = vec![16; 16];
        assert!(ScalingList::from_data(&data).is_err());

        let mut data = ScalingListData::flat();
        data.dc[1][5] = 300;
        assert!(ScalingList::from_data(&data).is_err());
    }

    #[test]
    fn test_quant_dequant_scale_pairing() {
        // forward and inverse scales invert each other at 2^20
        for rem in 0..6 {
            let product = QUANT_SCALES[rem] as i64 * INV_QUANT_SCALES[rem] as i64;
            assert!((product - (1 << 20)).abs() <= 64, "rem {}", rem);
        }
    }
}
