//! Quantization and dequantization for H.265/HEVC
//!
//! The scalar quantizer, sign-data hiding, and the [`Quant`] orchestrator
//! that ties the transform, scaling-list, noise-reduction and RDOQ pieces
//! together for one transform block.
//!
//! One `Quant` instance belongs to one encoder worker thread. Scaling lists
//! and the entropy-cost snapshot are shared read-only; the scratch
//! coefficient buffers are reused across calls and never escape.

use std::sync::Arc;

use crate::cost::EstBits;
use crate::error::{Error, Result};
use crate::nr::NoiseReduction;
use crate::scaling::{ScalingList, INV_QUANT_SCALES};
use crate::scan::{TuCodingParams, LOG2_SCAN_SET_SIZE, SCAN_SET_SIZE};
use crate::transform;
use crate::transform::{MAX_TR_DYNAMIC_RANGE, MAX_TR_SIZE};

/// Forward quantizer shift base
pub const QUANT_SHIFT: i32 = 14;

/// Combined forward+inverse shift base
pub const QUANT_IQUANT_SHIFT: i32 = 20;

/// Minimum span between the first and last non-zero coefficient of a group
/// before a sign can be hidden
pub const SBH_THRESHOLD: i32 = 4;

/// Texture component of a transform block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureType {
    /// Luma
    Luma = 0,
    /// First chroma plane
    ChromaU = 1,
    /// Second chroma plane
    ChromaV = 2,
}

/// Chroma subsampling of the picture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaFormat {
    /// 4:2:0
    I420,
    /// 4:2:2
    I422,
    /// 4:4:4
    I444,
}

/// Chroma QP mapping for 4:2:0, HEVC table 8-10 (identity below 30)
const CHROMA_QP_SCALE: [u8; 58] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25,
    26, 27, 28, 29, 29, 30, 31, 32, 33, 33, 34, 34, 35, 35, 36, 36, 37, 37, 38, 39, 40, 41, 42,
    43, 44, 45, 46, 47, 48, 49, 50, 51,
];

/// Quantizer step parameters derived from a QP value (bit-depth offset
/// already applied)
#[derive(Debug, Clone, Copy, Default)]
pub struct QpParam {
    /// Full QP
    pub qp: i32,
    /// qp / 6
    pub per: i32,
    /// qp % 6
    pub rem: i32,
}

impl QpParam {
    /// Derive step parameters from a non-negative QP
    pub fn new(qp: i32) -> QpParam {
        debug_assert!(qp >= 0);
        QpParam {
            qp,
            per: qp / 6,
            rem: qp % 6,
        }
    }
}

/// Per-block coding context supplied by the caller. The CU/TU hierarchy
/// lives outside this crate, so everything the quantizer needs from it is
/// carried here.
#[derive(Debug, Clone, Copy)]
pub struct TuContext {
    /// Component being coded
    pub ttype: TextureType,
    /// Block is intra predicted
    pub is_intra: bool,
    /// Slice is an I slice (selects the scalar rounding offset)
    pub i_slice: bool,
    /// cu_transquant_bypass: residual is coded losslessly
    pub transquant_bypass: bool,
    /// transform_skip_flag for this block
    pub transform_skip: bool,
    /// PPS sign-data-hiding enable
    pub sign_hiding: bool,
    /// Entropy-coding geometry of this TU
    pub code_params: TuCodingParams,
    /// Context index for the coded-block-flag cost
    pub cbf_ctx: u32,
    /// Use the root CBF cost (inter luma at transform depth 0)
    pub root_cbf: bool,
}

/// Scalar quantization of one block.
///
/// `add` is the rounding offset already shifted to `q_bits`; `delta_u`
/// receives the per-coefficient rounding residue used by sign hiding.
/// Returns the number of non-zero output levels.
pub fn quant(
    coef: &[i32],
    quant_coef: &[i32],
    delta_u: &mut [i32],
    q_coef: &mut [i16],
    q_bits: i32,
    add: i64,
    num_coeff: usize,
) -> u32 {
    debug_assert!(q_bits >= 8);
    let q_bits8 = q_bits - 8;
    let mut num_sig = 0u32;
    for i in 0..num_coeff {
        let level = coef[i] as i64;
        let sign = if level < 0 { -1i64 } else { 1 };
        let scaled = level.abs() * quant_coef[i] as i64;
        let abs_level = (scaled + add) >> q_bits;
        delta_u[i] = ((scaled - (abs_level << q_bits)) >> q_bits8) as i32;
        if abs_level != 0 {
            num_sig += 1;
        }
        q_coef[i] = (abs_level * sign).clamp(-32768, 32767) as i16;
    }
    num_sig
}

/// Scalar quantization variant used as the RDOQ seed: also exports the
/// unshifted `|coef| * quantCoef` products the level search re-derives
/// rounding residues from.
pub fn nquant(
    coef: &[i32],
    quant_coef: &[i32],
    scaled: &mut [i64],
    q_coef: &mut [i16],
    q_bits: i32,
    add: i64,
    num_coeff: usize,
) -> u32 {
    let mut num_sig = 0u32;
    for i in 0..num_coeff {
        let level = coef[i] as i64;
        let sign = if level < 0 { -1i64 } else { 1 };
        let tmp = level.abs() * quant_coef[i] as i64;
        scaled[i] = tmp;
        let abs_level = (tmp + add) >> q_bits;
        if abs_level != 0 {
            num_sig += 1;
        }
        q_coef[i] = (abs_level * sign).clamp(-32768, 32767) as i16;
    }
    num_sig
}

/// Dequantize with the flat 6-entry scale (`scale` already carries the
/// `<< per` up-shift).
pub fn dequant_normal(q_coef: &[i16], coef: &mut [i32], num_coeff: usize, scale: i32, shift: i32) {
    debug_assert!(shift >= 1);
    let add = 1i64 << (shift - 1);
    for i in 0..num_coeff {
        let v = (q_coef[i] as i64 * scale as i64 + add) >> shift;
        coef[i] = v.clamp(-32768, 32767) as i32;
    }
}

/// Dequantize with a per-coefficient scaling-list matrix. The matrices
/// carry a `<< 4` list scale that the extra shift removes.
pub fn dequant_scaling(
    q_coef: &[i16],
    dequant_coef: &[i32],
    coef: &mut [i32],
    num_coeff: usize,
    per: i32,
    shift: i32,
) {
    let shift = shift + 4;
    if shift > per {
        let add = 1i64 << (shift - per - 1);
        for i in 0..num_coeff {
            let v = (q_coef[i] as i64 * dequant_coef[i] as i64 + add) >> (shift - per);
            coef[i] = v.clamp(-32768, 32767) as i32;
        }
    } else {
        for i in 0..num_coeff {
            let v = (q_coef[i] as i64 * dequant_coef[i] as i64).clamp(-32768, 32767);
            coef[i] = ((v << (per - shift)) as i64).clamp(-32768, 32767) as i32;
        }
    }
}

/// Sign-data hiding after scalar quantization: per coefficient group, if
/// the span between the first and last non-zero coefficient reaches
/// [`SBH_THRESHOLD`] and the parity of the absolute sum disagrees with the
/// sign of the first non-zero coefficient, nudge the cheapest coefficient
/// by one to fix the parity. Distortion only; rate is not consulted.
///
/// `resi_dct` supplies the pre-quantization signs for positions currently
/// at zero. Returns the updated non-zero count.
pub fn sign_bit_hiding(
    coeff: &mut [i16],
    delta_u: &[i32],
    resi_dct: &[i32],
    mut num_sig: u32,
    code_params: &TuCodingParams,
) -> u32 {
    let scan = code_params.scan;
    let mut last_cg = true;

    for cg in (0..1usize << (code_params.log2_tr_size_cg * 2)).rev() {
        let cg_start = cg << LOG2_SCAN_SET_SIZE;

        let Some(last_nz) = (0..SCAN_SET_SIZE)
            .rev()
            .find(|&n| coeff[scan[n + cg_start] as usize] != 0)
        else {
            continue;
        };
        let first_nz = (0..SCAN_SET_SIZE)
            .find(|&n| coeff[scan[n + cg_start] as usize] != 0)
            .unwrap();

        if last_nz as i32 - first_nz as i32 >= SBH_THRESHOLD {
            let sign_bit = (coeff[scan[cg_start + first_nz] as usize] <= 0) as u32;
            let mut abs_sum = 0i32;
            for n in first_nz..=last_nz {
                abs_sum += coeff[scan[n + cg_start] as usize] as i32;
            }

            if sign_bit != (abs_sum as u32 & 1) {
                let mut min_cost_inc = i32::MAX;
                let mut min_pos = usize::MAX;
                let mut final_change = 0i32;

                let start = if last_cg { last_nz } else { SCAN_SET_SIZE - 1 };
                for n in (0..=start).rev() {
                    let blk_pos = scan[n + cg_start] as usize;
                    let (cur_cost, cur_change);
                    if coeff[blk_pos] != 0 {
                        if delta_u[blk_pos] > 0 {
                            cur_cost = -delta_u[blk_pos];
                            cur_change = 1;
                        } else if n == first_nz && coeff[blk_pos].abs() == 1 {
                            cur_cost = i32::MAX;
                            cur_change = 0;
                        } else {
                            cur_cost = delta_u[blk_pos];
                            cur_change = -1;
                        }
                    } else if n < first_nz {
                        let this_sign_bit = (resi_dct[blk_pos] < 0) as u32;
                        if this_sign_bit != sign_bit {
                            cur_cost = i32::MAX;
                            cur_change = 0;
                        } else {
                            cur_cost = -delta_u[blk_pos];
                            cur_change = 1;
                        }
                    } else {
                        cur_cost = -delta_u[blk_pos];
                        cur_change = 1;
                    }

                    if cur_cost < min_cost_inc {
                        min_cost_inc = cur_cost;
                        final_change = cur_change;
                        min_pos = blk_pos;
                    }
                }

                // never push a level past the clamp boundary
                if coeff[min_pos] == 32767 || coeff[min_pos] == -32768 {
                    final_change = -1;
                }

                if coeff[min_pos] == 0 {
                    num_sig += 1;
                } else if final_change == -1 && coeff[min_pos].abs() == 1 {
                    num_sig -= 1;
                }

                if resi_dct[min_pos] >= 0 {
                    coeff[min_pos] += final_change as i16;
                } else {
                    coeff[min_pos] -= final_change as i16;
                }
            }
        }

        last_cg = false;
    }

    num_sig
}

/// Quantization engine for one encoder worker
pub struct Quant {
    use_rdoq: bool,
    pub(crate) psy_rdoq_scale: i64,
    pub(crate) scaling: Arc<ScalingList>,
    pub(crate) est_bits: EstBits,
    pub(crate) qp_param: [QpParam; 3],
    pub(crate) lambdas: [f64; 3],
    nr: Option<NoiseReduction>,
    pub(crate) bit_depth: u8,
    /// DCT of the residual being quantized
    pub(crate) resi_dct: Box<[i32]>,
    /// DCT of the source pixels (psy-RDOQ only)
    pub(crate) fenc_dct: Box<[i32]>,
    fenc_short: Box<[i16]>,
}

impl Quant {
    /// Create a quantizer.
    ///
    /// `psy_scale` > 0 enables the psy-RDOQ bias (stored as a fixed-point
    /// scale, `round(psy_scale * 256)`); it only takes effect together
    /// with RDOQ.
    pub fn new(
        use_rdoq: bool,
        psy_scale: f64,
        scaling: Arc<ScalingList>,
        bit_depth: u8,
    ) -> Result<Self> {
        if !(8..=16).contains(&bit_depth) {
            return Err(Error::init(format!("unsupported bit depth: {}", bit_depth)));
        }
        if !(0.0..=8.0).contains(&psy_scale) {
            return Err(Error::init(format!("psy scale out of range: {}", psy_scale)));
        }
        tracing::debug!(use_rdoq, psy_scale, bit_depth, "quantizer created");
        Ok(Quant {
            use_rdoq,
            psy_rdoq_scale: (psy_scale * 256.0) as i64,
            scaling,
            est_bits: EstBits::flat(),
            qp_param: [QpParam::default(); 3],
            lambdas: [1.0; 3],
            nr: None,
            bit_depth,
            resi_dct: vec![0; MAX_TR_SIZE * MAX_TR_SIZE].into_boxed_slice(),
            fenc_dct: vec![0; MAX_TR_SIZE * MAX_TR_SIZE].into_boxed_slice(),
            fenc_short: vec![0; MAX_TR_SIZE * MAX_TR_SIZE].into_boxed_slice(),
        })
    }

    /// QP offset implied by the internal bit depth
    fn qp_bd_offset(&self) -> i32 {
        6 * (self.bit_depth as i32 - 8)
    }

    /// Derive the per-component quantizer parameters for a CU. Chroma adds
    /// its PPS offset, then maps through the 4:2:0 table for QP >= 30 or
    /// clips to 51 for the other chroma formats.
    pub fn set_qp(
        &mut self,
        qp_y: i32,
        cb_offset: i32,
        cr_offset: i32,
        format: ChromaFormat,
    ) -> Result<()> {
        if !(0..=57).contains(&qp_y) {
            return Err(Error::invalid_input(format!("QP out of range: {}", qp_y)));
        }
        let bd = self.qp_bd_offset();
        self.qp_param[TextureType::Luma as usize] = QpParam::new(qp_y + bd);
        for (ttype, offset) in [
            (TextureType::ChromaU, cb_offset),
            (TextureType::ChromaV, cr_offset),
        ] {
            let mut qp = (qp_y + offset).clamp(-bd, 57);
            if qp >= 30 {
                qp = match format {
                    ChromaFormat::I420 => CHROMA_QP_SCALE[qp as usize] as i32,
                    _ => qp.min(51),
                };
            }
            self.qp_param[ttype as usize] = QpParam::new(qp + bd);
        }
        Ok(())
    }

    /// Current step parameters for one component
    pub fn qp_param(&self, ttype: TextureType) -> QpParam {
        self.qp_param[ttype as usize]
    }

    /// Set the Lagrange multipliers used by RDOQ, per component
    pub fn set_lambdas(&mut self, luma: f64, chroma_u: f64, chroma_v: f64) {
        self.lambdas = [luma, chroma_u, chroma_v];
    }

    /// Copy a per-slice snapshot of the entropy-coder cost tables
    pub fn load_entropy_costs(&mut self, est: &EstBits) {
        self.est_bits = est.clone();
    }

    /// Attach (or detach) per-worker noise-reduction state
    pub fn set_noise_reduction(&mut self, nr: Option<NoiseReduction>) {
        self.nr = nr;
    }

    /// Access the noise-reduction state, e.g. to re-derive offsets at a
    /// frame boundary
    pub fn noise_reduction_mut(&mut self) -> Option<&mut NoiseReduction> {
        self.nr.as_mut()
    }

    /// Transform and quantize one block.
    ///
    /// `residual` (with `stride`) holds the prediction residual; `levels`
    /// receives `size*size` quantized levels in raster order. `fenc` is
    /// the source pixel block, only consumed when psy-RDOQ is active.
    /// Returns the number of non-zero levels.
    pub fn transform_nxn(
        &mut self,
        ctx: &TuContext,
        fenc: &[u16],
        fenc_stride: usize,
        residual: &[i16],
        stride: usize,
        levels: &mut [i16],
        log2_tr_size: u32,
    ) -> u32 {
        debug_assert!((2..=5).contains(&log2_tr_size));
        let tr_size = 1usize << log2_tr_size;
        let num_coeff = tr_size * tr_size;

        if ctx.transquant_bypass {
            return transform::copy_count(levels, residual, stride, tr_size);
        }

        let is_luma = ctx.ttype == TextureType::Luma;
        let use_psy = self.psy_rdoq_scale != 0 && is_luma && !ctx.transform_skip;
        let transform_shift = self.transform_shift(log2_tr_size);

        if ctx.transform_skip {
            if transform_shift >= 0 {
                transform::cvt16to32_shl(
                    &mut self.resi_dct,
                    residual,
                    stride,
                    transform_shift as u32,
                    tr_size,
                );
            } else {
                transform::cvt16to32_shr(
                    &mut self.resi_dct,
                    residual,
                    stride,
                    (-transform_shift) as u32,
                    tr_size,
                );
            }
        } else {
            let use_dst = log2_tr_size == 2 && is_luma && ctx.is_intra;
            if use_dst {
                transform::dst4(residual, &mut self.resi_dct, stride, self.bit_depth);
            } else {
                transform::dct(
                    residual,
                    &mut self.resi_dct,
                    stride,
                    log2_tr_size,
                    self.bit_depth,
                );
            }

            if use_psy {
                // transform the source pixels too; the level search biases
                // toward reconstructions that keep the source energy
                transform::pixel_to_short(fenc, fenc_stride, &mut self.fenc_short, tr_size);
                if use_dst {
                    transform::dst4(&self.fenc_short, &mut self.fenc_dct, tr_size, self.bit_depth);
                } else {
                    transform::dct(
                        &self.fenc_short,
                        &mut self.fenc_dct,
                        tr_size,
                        log2_tr_size,
                        self.bit_depth,
                    );
                }
            }

            if !ctx.is_intra {
                if let Some(nr) = self.nr.as_mut() {
                    let cat = (log2_tr_size - 2) as usize + 4 * (!is_luma as usize);
                    nr.denoise_dct(cat, &mut self.resi_dct[..num_coeff]);
                }
            }
        }

        if self.use_rdoq {
            self.rdo_quant(ctx, levels, log2_tr_size, use_psy)
        } else {
            let mut delta_u = [0i32; MAX_TR_SIZE * MAX_TR_SIZE];
            let ttype = ctx.ttype as usize;
            let list_type = if ctx.is_intra { 0 } else { 3 } + ttype;
            let QpParam { per, rem, .. } = self.qp_param[ttype];
            let q_coef = self
                .scaling
                .quant_coef((log2_tr_size - 2) as usize, list_type, rem as usize);

            let q_bits = QUANT_SHIFT + per + transform_shift;
            let add = (if ctx.i_slice { 171i64 } else { 85 }) << (q_bits - 9);

            let num_sig = quant(
                &self.resi_dct,
                q_coef,
                &mut delta_u,
                levels,
                q_bits,
                add,
                num_coeff,
            );

            if num_sig >= 2 && ctx.sign_hiding {
                sign_bit_hiding(levels, &delta_u, &self.resi_dct, num_sig, &ctx.code_params)
            } else {
                num_sig
            }
        }
    }

    /// Dequantize and inverse-transform one block into `residual`.
    #[allow(clippy::too_many_arguments)]
    pub fn inv_transform_nxn(
        &mut self,
        transquant_bypass: bool,
        residual: &mut [i16],
        stride: usize,
        levels: &[i16],
        log2_tr_size: u32,
        ttype: TextureType,
        is_intra: bool,
        transform_skip: bool,
        num_sig: u32,
    ) {
        debug_assert!((2..=5).contains(&log2_tr_size));
        let tr_size = 1usize << log2_tr_size;

        if transquant_bypass {
            for y in 0..tr_size {
                for x in 0..tr_size {
                    residual[y * stride + x] = levels[y * tr_size + x];
                }
            }
            return;
        }

        let num_coeff = tr_size * tr_size;
        let QpParam { per, rem, .. } = self.qp_param[ttype as usize];
        let transform_shift = self.transform_shift(log2_tr_size);
        let shift = QUANT_IQUANT_SHIFT - QUANT_SHIFT - transform_shift;

        if self.scaling.enabled() {
            let list_type = if is_intra { 0 } else { 3 } + ttype as usize;
            let dq_coef =
                self.scaling
                    .dequant_coef((log2_tr_size - 2) as usize, list_type, rem as usize);
            dequant_scaling(levels, dq_coef, &mut self.resi_dct, num_coeff, per, shift);
        } else {
            let scale = INV_QUANT_SCALES[rem as usize] << per;
            dequant_normal(levels, &mut self.resi_dct, num_coeff, scale, shift);
        }

        if transform_skip {
            if transform_shift >= 0 {
                transform::cvt32to16_shr(
                    residual,
                    &self.resi_dct,
                    stride,
                    transform_shift as u32,
                    tr_size,
                );
            } else {
                transform::cvt32to16_shl(
                    residual,
                    &self.resi_dct,
                    stride,
                    (-transform_shift) as u32,
                    tr_size,
                );
            }
        } else {
            let use_dst = log2_tr_size == 2 && ttype == TextureType::Luma && is_intra;
            debug_assert_eq!(num_sig, transform::count_nonzero(&levels[..num_coeff]));

            if num_sig == 1 && levels[0] != 0 && !use_dst {
                // DC-only fast path: one multiply replaces the whole
                // inverse transform
                let shift_1st = 7;
                let add_1st = 1 << (shift_1st - 1);
                let shift_2nd = 12 - (self.bit_depth as i32 - 8);
                let add_2nd = 1 << (shift_2nd - 1);
                let dc_val =
                    (((self.resi_dct[0] * 64 + add_1st) >> shift_1st) * 64 + add_2nd) >> shift_2nd;
                transform::blockfill(residual, stride, tr_size, dc_val as i16);
                return;
            }

            if use_dst {
                transform::idst4(&self.resi_dct, residual, stride, self.bit_depth);
            } else {
                transform::idct(
                    &self.resi_dct,
                    residual,
                    stride,
                    log2_tr_size,
                    self.bit_depth,
                );
            }
        }
    }

    pub(crate) fn transform_shift(&self, log2_tr_size: u32) -> i32 {
        MAX_TR_DYNAMIC_RANGE - self.bit_depth as i32 - log2_tr_size as i32
    }
}
