//! H.265/HEVC intra prediction
//!
//! Predicts a square block from the reconstructed samples of its top/left
//! neighbours. The 35 modes are planar (0), DC (1) and 33 angular
//! directions (2..=34).
//!
//! All predictors consume a single packed reference array of length 4N+1
//! laid out as `[topLeft, top(0..2N-1), left(0..2N-1)]`. Horizontal
//! angular modes swap the top/left halves of the reference up front and
//! transpose the finished block, so one projection loop serves both
//! orientations.

use crate::error::{Error, Result};

/// Number of intra prediction modes
pub const NUM_INTRA_MODE: usize = 35;

/// Planar mode index
pub const PLANAR_IDX: u32 = 0;

/// DC mode index
pub const DC_IDX: u32 = 1;

/// Pure horizontal angular mode
pub const HOR_IDX: u32 = 10;

/// Pure vertical angular mode
pub const VER_IDX: u32 = 26;

/// Per-mode mask of block sides (4/8/16/32) that use the smoothed
/// reference array. Pure horizontal/vertical never smooth; the diagonal
/// modes (2, 18, 34) and planar smooth from 8x8 up; modes one step off
/// horizontal/vertical smooth only at 32x32.
pub const INTRA_FILTER_FLAGS: [u8; NUM_INTRA_MODE] = [
    0x38, 0x00, //
    0x38, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x20, 0x00, 0x20, 0x30, 0x30, 0x30, 0x30, 0x30,
    0x30, //
    0x38, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x20, 0x00, 0x20, 0x30, 0x30, 0x30, 0x30, 0x30,
    0x30, //
    0x38,
];

/// Projection angles for the 17 distinct directions; horizontal and
/// vertical mode groups index it symmetrically.
const ANGLE_TABLE: [i32; 17] = [
    -32, -26, -21, -17, -13, -9, -5, -2, 0, 2, 5, 9, 13, 17, 21, 26, 32,
];

/// Inverse angles, `(256 * 32) / angle`, for projecting the side reference
const INV_ANGLE_TABLE: [i32; 8] = [4096, 1638, 910, 630, 482, 390, 315, 256];

/// Intra predictor for one component
pub struct IntraPredictor {
    bit_depth: u8,
}

impl IntraPredictor {
    /// Create a predictor for the given internal bit depth
    pub fn new(bit_depth: u8) -> Result<Self> {
        if !(8..=16).contains(&bit_depth) {
            return Err(Error::invalid_input(format!(
                "unsupported bit depth: {}",
                bit_depth
            )));
        }
        Ok(IntraPredictor { bit_depth })
    }

    fn pixel_max(&self) -> i32 {
        (1 << self.bit_depth) - 1
    }

    /// Predict one block.
    ///
    /// # Arguments
    /// * `mode` - intra mode 0..=34
    /// * `src_pix` - packed reference array, length at least 4N+1
    /// * `dst`/`stride` - destination block
    /// * `size` - block side N in {4, 8, 16, 32}
    /// * `filter_edge` - enable the DC/gradient edge filters (luma only;
    ///   they apply to blocks up to 16x16)
    pub fn predict(
        &self,
        mode: u32,
        src_pix: &[u16],
        dst: &mut [u16],
        stride: usize,
        size: usize,
        filter_edge: bool,
    ) -> Result<()> {
        if !matches!(size, 4 | 8 | 16 | 32) {
            return Err(Error::codec(format!("invalid intra block size: {}", size)));
        }
        if mode >= NUM_INTRA_MODE as u32 {
            return Err(Error::codec(format!("invalid intra mode: {}", mode)));
        }
        if src_pix.len() < 4 * size + 1 {
            return Err(Error::invalid_input(
                "reference array shorter than 4N+1".to_string(),
            ));
        }
        if dst.len() < (size - 1) * stride + size {
            return Err(Error::invalid_input(
                "destination buffer too small for intra prediction".to_string(),
            ));
        }

        let edge = filter_edge && size <= 16;
        match mode {
            PLANAR_IDX => self.predict_planar(src_pix, dst, stride, size),
            DC_IDX => self.predict_dc(src_pix, dst, stride, size, edge),
            _ => self.predict_angular(src_pix, dst, stride, size, mode, edge),
        }
        Ok(())
    }

    /// Planar prediction: bilinear blend of the top row, left column and
    /// the two outer corner references.
    fn predict_planar(&self, src_pix: &[u16], dst: &mut [u16], stride: usize, size: usize) {
        let log2 = size.trailing_zeros();
        let above = &src_pix[1..];
        let left = &src_pix[2 * size + 1..];
        let top_right = above[size] as u32;
        let bottom_left = left[size] as u32;
        for y in 0..size {
            for x in 0..size {
                let v = (size - 1 - x) as u32 * left[y] as u32
                    + (size - 1 - y) as u32 * above[x] as u32
                    + (x as u32 + 1) * top_right
                    + (y as u32 + 1) * bottom_left
                    + size as u32;
                dst[y * stride + x] = (v >> (log2 + 1)) as u16;
            }
        }
    }

    /// DC prediction: mean of the 2N top and 2N left references, with the
    /// optional boundary smoothing of the first row and column.
    fn predict_dc(
        &self,
        src_pix: &[u16],
        dst: &mut [u16],
        stride: usize,
        size: usize,
        filter: bool,
    ) {
        let mut dc_val = size as u32;
        for i in 0..size {
            dc_val += src_pix[1 + i] as u32 + src_pix[2 * size + 1 + i] as u32;
        }
        let dc_val = (dc_val / (2 * size as u32)) as u16;

        for y in 0..size {
            for x in 0..size {
                dst[y * stride + x] = dc_val;
            }
        }

        if filter {
            let above = &src_pix[1..];
            let left = &src_pix[2 * size + 1..];
            dst[0] = ((above[0] as u32 + left[0] as u32 + 2 * dst[0] as u32 + 2) >> 2) as u16;
            for x in 1..size {
                dst[x] = ((above[x] as u32 + 3 * dst[x] as u32 + 2) >> 2) as u16;
            }
            for y in 1..size {
                let idx = y * stride;
                dst[idx] = ((left[y] as u32 + 3 * dst[idx] as u32 + 2) >> 2) as u16;
            }
        }
    }

    /// Angular prediction, modes 2..=34. Horizontal modes run transposed.
    fn predict_angular(
        &self,
        src_pix: &[u16],
        dst: &mut [u16],
        stride: usize,
        size: usize,
        dir_mode: u32,
        filter_edge: bool,
    ) {
        let width2 = size * 2;
        let hor_mode = dir_mode < 18;

        // flip the neighbours for the horizontal group
        let mut neighbour_buf = [0u16; 129];
        let src: &[u16] = if hor_mode {
            neighbour_buf[0] = src_pix[0];
            for i in 0..width2 {
                neighbour_buf[1 + i] = src_pix[width2 + 1 + i];
                neighbour_buf[width2 + 1 + i] = src_pix[1 + i];
            }
            &neighbour_buf
        } else {
            src_pix
        };

        let angle_offset = if hor_mode {
            10 - dir_mode as i32
        } else {
            dir_mode as i32 - 26
        };
        let angle = ANGLE_TABLE[(8 + angle_offset) as usize];

        if angle == 0 {
            // pure vertical after normalization
            for y in 0..size {
                for x in 0..size {
                    dst[y * stride + x] = src[1 + x];
                }
            }
            if filter_edge {
                let top_left = src[0] as i32;
                let top = src[1] as i32;
                let max = self.pixel_max();
                for y in 0..size {
                    let v = top + ((src[width2 + 1 + y] as i32 - top_left) >> 1);
                    dst[y * stride] = v.clamp(0, max) as u16;
                }
            }
        } else {
            // the main reference line, possibly extended below index 0 by
            // projecting the side reference through the inverse angle
            let mut ref_buf = [0u16; 64];
            let (ref_line, ref_base): (&[u16], i32) = if angle < 0 {
                let nb_projected = (-((size as i32 * angle) >> 5) - 1) as usize;
                let base = nb_projected as i32 + 1;
                let inv_angle = INV_ANGLE_TABLE[(-angle_offset - 1) as usize];
                let mut inv_angle_sum = 128;
                for i in 0..nb_projected {
                    inv_angle_sum += inv_angle;
                    ref_buf[(base - 2 - i as i32) as usize] =
                        src[width2 + (inv_angle_sum >> 8) as usize];
                }
                for i in 0..=size {
                    ref_buf[(base - 1) as usize + i] = src[i];
                }
                (&ref_buf, base)
            } else {
                (src, 1)
            };

            let mut angle_sum = 0i32;
            for y in 0..size {
                angle_sum += angle;
                let offset = angle_sum >> 5;
                let fraction = angle_sum & 31;
                if fraction != 0 {
                    for x in 0..size {
                        let idx = (ref_base + offset + x as i32) as usize;
                        let a = ref_line[idx] as i32;
                        let b = ref_line[idx + 1] as i32;
                        dst[y * stride + x] =
                            (((32 - fraction) * a + fraction * b + 16) >> 5) as u16;
                    }
                } else {
                    for x in 0..size {
                        dst[y * stride + x] = ref_line[(ref_base + offset + x as i32) as usize];
                    }
                }
            }
        }

        if hor_mode {
            for y in 0..size - 1 {
                for x in y + 1..size {
                    dst.swap(y * stride + x, x * stride + y);
                }
            }
        }
    }

    /// Produce all 33 angular predictions into a packed buffer of
    /// `33 << (2*log2_size)` samples, picking the smoothed or raw reference
    /// per mode. Predictions are stored in natural orientation.
    pub fn predict_all_angular(
        &self,
        dest: &mut [u16],
        ref_pix: &[u16],
        filt_pix: &[u16],
        log2_size: u32,
        is_luma: bool,
    ) {
        debug_assert!((2..=5).contains(&log2_size));
        let size = 1usize << log2_size;
        let filter_edge = is_luma && size <= 16;
        for mode in 2..NUM_INTRA_MODE as u32 {
            let src = if INTRA_FILTER_FLAGS[mode as usize] as usize & size != 0 {
                filt_pix
            } else {
                ref_pix
            };
            let out = &mut dest[((mode as usize - 2) << (2 * log2_size))..][..size * size];
            self.predict_angular(src, out, size, size, mode, filter_edge);
        }
    }
}

/// Smooth a packed reference array with the HEVC [1 2 1]/4 filter. The
/// filter runs along the conceptual line bottom-left -> top-left ->
/// top-right; the two endpoints are copied unfiltered.
pub fn filter_reference_samples(src: &[u16], dst: &mut [u16], size: usize) {
    let n2 = 2 * size;
    debug_assert!(src.len() >= 4 * size + 1 && dst.len() >= 4 * size + 1);

    // top-left sees the first top and first left sample
    dst[0] = ((src[1] as u32 + 2 * src[0] as u32 + src[n2 + 1] as u32 + 2) >> 2) as u16;

    // top row: predecessor of top[0] is the corner
    dst[1] = ((src[0] as u32 + 2 * src[1] as u32 + src[2] as u32 + 2) >> 2) as u16;
    for i in 2..n2 {
        dst[i] = ((src[i - 1] as u32 + 2 * src[i] as u32 + src[i + 1] as u32 + 2) >> 2) as u16;
    }
    dst[n2] = src[n2];

    // left column: predecessor of left[0] is the corner
    dst[n2 + 1] = ((src[0] as u32 + 2 * src[n2 + 1] as u32 + src[n2 + 2] as u32 + 2) >> 2) as u16;
    for i in n2 + 2..2 * n2 {
        dst[i] = ((src[i - 1] as u32 + 2 * src[i] as u32 + src[i + 1] as u32 + 2) >> 2) as u16;
    }
    dst[2 * n2] = src[2 * n2];
}
