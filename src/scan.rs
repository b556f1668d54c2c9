//! Coefficient scanning for H.265/HEVC
//!
//! Scan-order tables mapping scan position to raster block position, for
//! the three HEVC patterns (up-right diagonal, horizontal, vertical), at
//! both the coefficient level and the 4x4 coefficient-group level. The
//! tables are built once per process and shared read-only.
//!
//! `TuCodingParams` bundles the entropy-coding geometry of one transform
//! unit: the coefficient and group scans, the scan type, and the first
//! significance-map context for the size.

use std::sync::OnceLock;

/// Coefficient scanning pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    /// Up-right diagonal scan (default)
    Diag = 0,
    /// Horizontal scan
    Hor = 1,
    /// Vertical scan
    Ver = 2,
}

/// Coefficients per 4x4 coefficient group
pub const SCAN_SET_SIZE: usize = 16;

/// log2 of [`SCAN_SET_SIZE`]
pub const LOG2_SCAN_SET_SIZE: u32 = 4;

impl ScanType {
    /// Mode-dependent scan selection for intra transform units. Modes near
    /// vertical (22..=30) scan horizontally, modes near horizontal (6..=14)
    /// scan vertically; everything else scans diagonally. Applies to luma
    /// up to 8x8 and chroma up to 4x4; larger blocks always scan
    /// diagonally.
    pub fn for_intra(dir_mode: u32, log2_tr_size: u32, is_luma: bool) -> ScanType {
        let max_log2 = if is_luma { 3 } else { 2 };
        if log2_tr_size > max_log2 {
            return ScanType::Diag;
        }
        match dir_mode {
            22..=30 => ScanType::Hor,
            6..=14 => ScanType::Ver,
            _ => ScanType::Diag,
        }
    }
}

/// Entropy-coding geometry of one transform unit
#[derive(Debug, Clone, Copy)]
pub struct TuCodingParams {
    /// log2 of the coefficient-group grid side
    pub log2_tr_size_cg: u32,
    /// Scan position -> raster block position
    pub scan: &'static [u16],
    /// CG scan position -> CG raster position
    pub scan_cg: &'static [u16],
    /// Scan pattern in use
    pub scan_type: ScanType,
    /// Base context of the significance map for this size
    pub first_significance_map_context: u32,
}

impl TuCodingParams {
    /// Look up the coding geometry for a transform size and scan type.
    pub fn new(log2_tr_size: u32, is_luma: bool, scan_type: ScanType) -> TuCodingParams {
        debug_assert!((2..=5).contains(&log2_tr_size));
        let size_idx = (log2_tr_size - 2) as usize;
        let tables = tables();
        let first_significance_map_context = match log2_tr_size {
            2 => 0,
            3 => {
                if scan_type != ScanType::Diag && is_luma {
                    15
                } else {
                    9
                }
            }
            _ => {
                if is_luma {
                    21
                } else {
                    12
                }
            }
        };
        TuCodingParams {
            log2_tr_size_cg: log2_tr_size - 2,
            scan: &tables.scan[scan_type as usize][size_idx],
            scan_cg: &tables.scan_cg[scan_type as usize][size_idx],
            scan_type,
            first_significance_map_context,
        }
    }
}

struct ScanTables {
    /// [scan type][size index] -> coefficient scan
    scan: [[Vec<u16>; 4]; 3],
    /// [scan type][size index] -> coefficient-group scan
    scan_cg: [[Vec<u16>; 4]; 3],
}

static TABLES: OnceLock<ScanTables> = OnceLock::new();

fn tables() -> &'static ScanTables {
    TABLES.get_or_init(|| {
        let types = [ScanType::Diag, ScanType::Hor, ScanType::Ver];
        let scan = std::array::from_fn(|t| {
            std::array::from_fn(|size_idx| build_coef_scan(types[t], size_idx as u32 + 2))
        });
        let scan_cg = std::array::from_fn(|t| {
            std::array::from_fn(|size_idx| grid_order(types[t], 1 << size_idx))
        });
        ScanTables { scan, scan_cg }
    })
}

/// Raster positions of an n x n grid in the given scan pattern, starting at
/// the DC corner. The diagonal pattern walks each anti-diagonal from its
/// bottom-left end up-right.
fn grid_order(scan_type: ScanType, n: usize) -> Vec<u16> {
    let mut order = Vec::with_capacity(n * n);
    match scan_type {
        ScanType::Diag => {
            for d in 0..2 * n - 1 {
                let y_hi = d.min(n - 1);
                let y_lo = d.saturating_sub(n - 1);
                for y in (y_lo..=y_hi).rev() {
                    let x = d - y;
                    order.push((y * n + x) as u16);
                }
            }
        }
        ScanType::Hor => {
            for y in 0..n {
                for x in 0..n {
                    order.push((y * n + x) as u16);
                }
            }
        }
        ScanType::Ver => {
            for x in 0..n {
                for y in 0..n {
                    order.push((y * n + x) as u16);
                }
            }
        }
    }
    order
}

/// Full coefficient scan for one transform size: groups in CG scan order,
/// the 4x4 pattern repeated inside each group.
fn build_coef_scan(scan_type: ScanType, log2_tr_size: u32) -> Vec<u16> {
    let size = 1usize << log2_tr_size;
    let cg_side = size / 4;
    let cg_order = grid_order(scan_type, cg_side);
    let in_cg = grid_order(scan_type, 4);
    let mut scan = Vec::with_capacity(size * size);
    for &cg_pos in &cg_order {
        let cg_y = (cg_pos as usize / cg_side) * 4;
        let cg_x = (cg_pos as usize % cg_side) * 4;
        for &pos in &in_cg {
            let y = cg_y + pos as usize / 4;
            let x = cg_x + pos as usize % 4;
            scan.push((y * size + x) as u16);
        }
    }
    scan
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diag_scan_4x4() {
        let params = TuCodingParams::new(2, true, ScanType::Diag);
        assert_eq!(
            params.scan,
            &[0, 4, 1, 8, 5, 2, 12, 9, 6, 3, 13, 10, 7, 14, 11, 15]
        );
        assert_eq!(params.scan_cg, &[0]);
        assert_eq!(params.log2_tr_size_cg, 0);
    }

    #[test]
    fn test_hor_ver_scan_4x4() {
        let hor = TuCodingParams::new(2, true, ScanType::Hor);
        assert_eq!(hor.scan[..4], [0, 1, 2, 3]);
        let ver = TuCodingParams::new(2, true, ScanType::Ver);
        assert_eq!(ver.scan[..4], [0, 4, 8, 12]);
    }

    #[test]
    fn test_scan_is_permutation() {
        for log2 in 2..=5u32 {
            for scan_type in [ScanType::Diag, ScanType::Hor, ScanType::Ver] {
                let params = TuCodingParams::new(log2, true, scan_type);
                let n = 1usize << (2 * log2);
                assert_eq!(params.scan.len(), n);
                let mut seen = vec![false; n];
                for &p in params.scan {
                    assert!(!seen[p as usize]);
                    seen[p as usize] = true;
                }
                assert!(seen.iter().all(|&s| s));
            }
        }
    }

    #[test]
    fn test_cg_scan_8x8_diag() {
        // 2x2 coefficient-group grid in diagonal order
        let params = TuCodingParams::new(3, true, ScanType::Diag);
        assert_eq!(params.scan_cg, &[0, 2, 1, 3]);
    }

    #[test]
    fn test_scan_groups_are_contiguous() {
        // every run of 16 scan positions stays inside a single 4x4 CG
        let params = TuCodingParams::new(4, true, ScanType::Diag);
        for (i, chunk) in params.scan.chunks(SCAN_SET_SIZE).enumerate() {
            let cg = params.scan_cg[i] as usize;
            let (cg_y, cg_x) = (cg / 4, cg % 4);
            for &p in chunk {
                let (y, x) = (p as usize / 16, p as usize % 16);
                assert_eq!(y / 4, cg_y);
                assert_eq!(x / 4, cg_x);
            }
        }
    }

    #[test]
    fn test_first_significance_map_context() {
        assert_eq!(
            TuCodingParams::new(2, true, ScanType::Diag).first_significance_map_context,
            0
        );
        assert_eq!(
            TuCodingParams::new(3, true, ScanType::Diag).first_significance_map_context,
            9
        );
        assert_eq!(
            TuCodingParams::new(3, true, ScanType::Hor).first_significance_map_context,
            15
        );
        assert_eq!(
            TuCodingParams::new(3, false, ScanType::Hor).first_significance_map_context,
            9
        );
        assert_eq!(
            TuCodingParams::new(4, true, ScanType::Diag).first_significance_map_context,
            21
        );
        assert_eq!(
            TuCodingParams::new(5, false, ScanType::Diag).first_significance_map_context,
            12
        );
    }

    #[test]
    fn test_intra_scan_selection() {
        // near-vertical modes scan horizontally, near-horizontal vertically
        assert_eq!(ScanType::for_intra(26, 2, true), ScanType::Hor);
        assert_eq!(ScanType::for_intra(10, 3, true), ScanType::Ver);
        assert_eq!(ScanType::for_intra(0, 2, true), ScanType::Diag);
        assert_eq!(ScanType::for_intra(18, 3, true), ScanType::Diag);
        // large blocks always diagonal
        assert_eq!(ScanType::for_intra(26, 4, true), ScanType::Diag);
        // chroma limited to 4x4
        assert_eq!(ScanType::for_intra(26, 3, false), ScanType::Diag);
        assert_eq!(ScanType::for_intra(26, 2, false), ScanType::Hor);
    }
}
