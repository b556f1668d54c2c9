//! Rate-distortion optimized quantization
//!
//! Chooses the quantized level of every coefficient by minimizing
//! `D + lambda * R` against the CABAC cost snapshot: a reverse-scan walk
//! over coefficient groups evaluates each coefficient at its scalar level
//! and one below, rolls whole groups up to all-zero where that is cheaper,
//! picks the cheapest last-significant position, decides the coded-block
//! flag, and finally re-runs sign hiding with an RD cost metric.
//!
//! Distortion is measured between the unquantized candidate level and the
//! original DCT coefficient, shifted by `15 - 2*transformShift` so the
//! FIX15 cost tables and the squared-error units line up.

use crate::cost::IEP_RATE;
use crate::quant::{nquant, Quant, QpParam, TuContext, TextureType, QUANT_IQUANT_SHIFT, QUANT_SHIFT};
use crate::scaling::INV_QUANT_SCALES;
use crate::scan::{ScanType, LOG2_SCAN_SET_SIZE, SCAN_SET_SIZE};
use crate::transform::MAX_TR_SIZE;

/// Distortion/rate alignment shift of the FIX15 cost tables
const SCALE_BITS: i32 = 15;

/// Golomb-Rice to exp-Golomb switch-over per Rice parameter
const COEF_REMAIN_BIN_REDUCTION: u32 = 3;

/// Largest remainder coded with the plain Rice prefix, per Rice parameter
const GO_RICE_RANGE: [u32; 5] = [7, 14, 26, 46, 78];

/// Contexts with a coded greater-1 flag per coefficient group
const C1FLAG_NUMBER: u32 = 8;

/// Last-position group index per coordinate
const GROUP_IDX: [u8; 32] = [
    0, 1, 2, 3, 4, 4, 5, 5, 6, 6, 6, 6, 7, 7, 7, 7, 8, 8, 8, 8, 8, 8, 8, 8, 9, 9, 9, 9, 9, 9, 9,
    9,
];

/// Per-group running cost statistics of the CG roll-up decision
#[derive(Default, Clone, Copy)]
struct CgRdStats {
    /// Any coefficient other than position 0 is coded
    nnz_before_pos0: i32,
    /// Distortion and level cost of the coded coefficients
    coded_level_and_dist: f64,
    /// Uncoded distortion of the coded coefficients
    uncoded_dist: f64,
    /// Cost of the significance bitmap of this group
    sig_cost: f64,
    /// Significance cost of coefficient 0 alone
    sig_cost0: f64,
}

/// Rate of one coded level in FIX15 units, used for the up/down deltas the
/// RD sign-hiding pass consults.
fn get_ic_rate(
    abs_level: u32,
    diff_level: i32,
    greater_one_bits: &[i32; 2],
    level_abs_bits: &[i32; 2],
    abs_go_rice: u32,
    c1c2_idx: u32,
) -> i32 {
    debug_assert!(abs_go_rice <= 4);
    if abs_level == 0 {
        debug_assert!(diff_level < 0);
        return 0;
    }
    let mut rate;
    if diff_level < 0 {
        debug_assert!(abs_level <= 2);
        rate = greater_one_bits[(abs_level == 2) as usize];
        if abs_level == 2 {
            rate += level_abs_bits[0];
        }
    } else {
        let mut symbol = diff_level as u32;
        let max_vlc = GO_RICE_RANGE[abs_go_rice as usize];
        rate = 0;
        if symbol > max_vlc {
            // exp-Golomb continuation
            let msb = 31 - (symbol - max_vlc).leading_zeros();
            rate += ((msb * 2 + 1) << 15) as i32;
            symbol = max_vlc + 1;
        }
        let pref_len = (symbol >> abs_go_rice) + 1;
        let num_bins = (pref_len + abs_go_rice).min(8);
        rate += (num_bins << 15) as i32;
        if c1c2_idx & 1 != 0 {
            rate += greater_one_bits[1];
        }
        if c1c2_idx == 3 {
            rate += level_abs_bits[1];
        }
    }
    rate
}

/// Cost of one candidate absolute level in FIX15 units.
fn get_ic_rate_cost(
    abs_level: u32,
    diff_level: i32,
    greater_one_bits: &[i32; 2],
    level_abs_bits: &[i32; 2],
    abs_go_rice: u32,
    c1c2_idx: u32,
) -> u32 {
    debug_assert!(abs_level != 0);
    if diff_level < 0 {
        debug_assert!(abs_level == 1 || abs_level == 2);
        let mut rate = greater_one_bits[(abs_level == 2) as usize] as u32;
        if abs_level == 2 {
            rate += level_abs_bits[0] as u32;
        }
        rate
    } else {
        let symbol = diff_level as u32;
        let mut rate;
        if (symbol >> abs_go_rice) < COEF_REMAIN_BIN_REDUCTION {
            let length = symbol >> abs_go_rice;
            rate = (length + 1 + abs_go_rice) << 15;
        } else {
            let rem = (symbol >> abs_go_rice) - COEF_REMAIN_BIN_REDUCTION;
            let length = if rem != 0 {
                31 - (rem + 1).leading_zeros()
            } else {
                0
            };
            rate = (COEF_REMAIN_BIN_REDUCTION + length + abs_go_rice + 1 + length) << 15;
        }
        if c1c2_idx & 1 != 0 {
            rate += greater_one_bits[1] as u32;
        }
        if c1c2_idx == 3 {
            rate += level_abs_bits[1] as u32;
        }
        rate
    }
}

/// Neighbour-group significance pattern (0..=3) used by the significance
/// context of every coefficient in a group: bit 0 from the group to the
/// right, bit 1 from the group below.
pub fn calc_pattern_sig_ctx(
    sig_coeff_group_flags: u64,
    cg_pos_x: u32,
    cg_pos_y: u32,
    log2_tr_size_cg: u32,
) -> u32 {
    if log2_tr_size_cg == 0 {
        return 0;
    }
    let tr_size_cg = 1u32 << log2_tr_size_cg;
    debug_assert!(tr_size_cg <= 8);
    let shift = 1 + (cg_pos_y << log2_tr_size_cg) + cg_pos_x;
    let sig_pos = sig_coeff_group_flags.checked_shr(shift).unwrap_or(0) as u32;
    let sig_right = if cg_pos_x == tr_size_cg - 1 {
        0
    } else {
        sig_pos & 1
    };
    let sig_lower = if cg_pos_y == tr_size_cg - 1 {
        0
    } else {
        (sig_pos >> (tr_size_cg - 2)) & 2
    };
    sig_right + sig_lower
}

/// Context increment of `significant_coeff_flag` (HEVC 9.3.4.2.5)
pub fn get_sig_ctx_inc(
    pattern_sig_ctx: u32,
    log2_tr_size: u32,
    tr_size: u32,
    blk_pos: u32,
    is_luma: bool,
    first_significance_map_context: u32,
) -> u32 {
    const CTX_IND_MAP_4X4: [u8; 16] = [0, 1, 4, 5, 2, 3, 4, 5, 6, 6, 8, 8, 7, 7, 8, 8];

    // [pattern][x % 4][y % 4]
    const TABLE_CNT: [[[u8; 4]; 4]; 4] = [
        [
            [2, 1, 1, 0],
            [1, 1, 0, 0],
            [1, 0, 0, 0],
            [0, 0, 0, 0],
        ],
        [
            [2, 1, 0, 0],
            [2, 1, 0, 0],
            [2, 1, 0, 0],
            [2, 1, 0, 0],
        ],
        [
            [2, 2, 2, 2],
            [1, 1, 1, 1],
            [0, 0, 0, 0],
            [0, 0, 0, 0],
        ],
        [
            [2, 2, 2, 2],
            [2, 2, 2, 2],
            [2, 2, 2, 2],
            [2, 2, 2, 2],
        ],
    ];

    if blk_pos == 0 {
        return 0;
    }
    if log2_tr_size == 2 {
        return CTX_IND_MAP_4X4[blk_pos as usize] as u32;
    }

    let pos_y = blk_pos >> log2_tr_size;
    let pos_x = blk_pos & (tr_size - 1);
    let x_in_subset = (blk_pos & 3) as usize;
    let y_in_subset = (pos_y & 3) as usize;

    let cnt = TABLE_CNT[pattern_sig_ctx as usize][x_in_subset][y_in_subset] as u32;
    let offset = first_significance_map_context + cnt;

    if is_luma && (pos_x | pos_y) >= 4 {
        3 + offset
    } else {
        offset
    }
}

/// Context increment of `coded_sub_block_flag`: 1 if the group to the right
/// or below is significant.
pub fn get_sig_coeff_group_ctx_inc(
    sig_coeff_group_flags: u64,
    cg_pos_x: u32,
    cg_pos_y: u32,
    log2_tr_size_cg: u32,
) -> u32 {
    let tr_size_cg = 1u32 << log2_tr_size_cg;
    let shift = 1 + (cg_pos_y << log2_tr_size_cg) + cg_pos_x;
    let sig_pos = sig_coeff_group_flags.checked_shr(shift).unwrap_or(0) as u32;
    let sig_right = if cg_pos_x == tr_size_cg - 1 {
        0
    } else {
        sig_pos
    };
    let sig_lower = if cg_pos_y == tr_size_cg - 1 {
        0
    } else {
        sig_pos >> (tr_size_cg - 1)
    };
    (sig_right | sig_lower) & 1
}

impl Quant {
    /// Cost of signalling (posx, posy) as the last significant position.
    fn get_rate_last(&self, pos_x: u32, pos_y: u32) -> u32 {
        let ctx_x = GROUP_IDX[pos_x as usize] as u32;
        let ctx_y = GROUP_IDX[pos_y as usize] as u32;
        let mut cost =
            (self.est_bits.last_x_bits[ctx_x as usize] + self.est_bits.last_y_bits[ctx_y as usize]) as u32;
        if pos_x > 2 {
            cost += IEP_RATE as u32 * ((ctx_x - 2) >> 1);
        }
        if pos_y > 2 {
            cost += IEP_RATE as u32 * ((ctx_y - 2) >> 1);
        }
        cost
    }

    /// Rate-distortion optimized quantization of the block currently held
    /// in the DCT scratch buffer. `dst_coeff` receives signed levels;
    /// returns the number of non-zero levels.
    pub(crate) fn rdo_quant(
        &mut self,
        ctx: &TuContext,
        dst_coeff: &mut [i16],
        log2_tr_size: u32,
        use_psy: bool,
    ) -> u32 {
        let tr_size = 1u32 << log2_tr_size;
        let size_idx = (log2_tr_size - 2) as usize;
        let transform_shift = self.transform_shift(log2_tr_size);
        let ttype = ctx.ttype;
        let is_luma = ttype == TextureType::Luma;
        let scaling_list_type = if ctx.is_intra { 0 } else { 3 } + ttype as usize;

        let QpParam { per, rem, .. } = self.qp_param[ttype as usize];
        let q_bits = QUANT_SHIFT + per + transform_shift;
        let add = 1i64 << (q_bits - 1);
        let q_coef = self.scaling.quant_coef(size_idx, scaling_list_type, rem as usize);

        let num_coeff = 1usize << (log2_tr_size * 2);
        let mut scaled = [0i64; MAX_TR_SIZE * MAX_TR_SIZE];
        let num_sig = nquant(
            &self.resi_dct,
            q_coef,
            &mut scaled,
            dst_coeff,
            q_bits,
            add,
            num_coeff,
        );
        if num_sig == 0 {
            return 0;
        }

        // unquant constants: the dequant matrices carry a (1 << 4) list
        // scale that must come out during unquant; when the QP up-shift
        // exceeds the total shift the level is pre-shifted instead
        let unquant_scale = self
            .scaling
            .dequant_coef(size_idx, scaling_list_type, rem as usize);
        let mut unquant_shift = QUANT_IQUANT_SHIFT - QUANT_SHIFT - transform_shift + 4;
        let unquant_preshift;
        let unquant_round;
        if unquant_shift > per {
            unquant_round = 1i64 << (unquant_shift - per - 1);
            unquant_preshift = 0;
        } else {
            unquant_preshift = 4;
            unquant_shift += unquant_preshift;
            unquant_round = 0;
        }
        let scale_bits = SCALE_BITS - 2 * transform_shift;

        let lambda2 = self.lambdas[ttype as usize];

        let mut total_uncoded_cost = 0f64;
        let mut total_rd_cost = 0f64;

        let mut cost_coeff = [0f64; MAX_TR_SIZE * MAX_TR_SIZE];
        let mut cost_uncoded = [0f64; MAX_TR_SIZE * MAX_TR_SIZE];
        let mut cost_sig = [0f64; MAX_TR_SIZE * MAX_TR_SIZE];

        let mut rate_inc_up = [0i32; MAX_TR_SIZE * MAX_TR_SIZE];
        let mut rate_inc_down = [0i32; MAX_TR_SIZE * MAX_TR_SIZE];
        let mut sig_rate_delta = [0i32; MAX_TR_SIZE * MAX_TR_SIZE];
        let mut delta_u = [0i32; MAX_TR_SIZE * MAX_TR_SIZE];

        let mut cost_coeff_group_sig = [0f64; 64];
        let mut sig_coeff_group_flags = 0u64;

        let mut ctx_set = 0u32;
        let mut c1 = 1i32;
        let mut c2 = 0i32;
        let mut go_rice_param = 0u32;
        let mut c1_idx = 0u32;
        let mut c2_idx = 0u32;
        let mut cg_last_scan_pos = -1i32;
        let mut last_scan_pos = -1i32;

        let code_params = &ctx.code_params;
        let cg_num = 1usize << (code_params.log2_tr_size_cg * 2);

        for cg_scan_pos in (0..cg_num).rev() {
            let cg_blk_pos = code_params.scan_cg[cg_scan_pos] as u32;
            let cg_pos_y = cg_blk_pos >> code_params.log2_tr_size_cg;
            let cg_pos_x = cg_blk_pos - (cg_pos_y << code_params.log2_tr_size_cg);
            let cg_blk_pos_mask = 1u64 << cg_blk_pos;
            let mut cg_rd_stats = CgRdStats::default();

            let pattern_sig_ctx = calc_pattern_sig_ctx(
                sig_coeff_group_flags,
                cg_pos_x,
                cg_pos_y,
                code_params.log2_tr_size_cg,
            );

            for scan_pos_in_cg in (0..SCAN_SET_SIZE).rev() {
                let scan_pos = (cg_scan_pos << LOG2_SCAN_SET_SIZE) + scan_pos_in_cg;
                let blk_pos = code_params.scan[scan_pos] as usize;
                let max_abs_level = dst_coeff[blk_pos].unsigned_abs() as u32;
                let sign_coef = self.resi_dct[blk_pos];
                let predicted_coef = if use_psy {
                    self.fenc_dct[blk_pos] - sign_coef
                } else {
                    0
                };

                // cost of not coding this coefficient: all distortion, no
                // signal bits
                cost_uncoded[scan_pos] =
                    (((sign_coef as i64 * sign_coef as i64) << scale_bits) as u64) as f64;
                if use_psy && blk_pos != 0 {
                    // with nothing coded the prediction is the reconstruction
                    cost_uncoded[scan_pos] -=
                        (((self.psy_rdoq_scale * predicted_coef as i64) << scale_bits) >> 8) as f64;
                }
                total_uncoded_cost += cost_uncoded[scan_pos];

                if max_abs_level != 0 && last_scan_pos < 0 {
                    // first non-zero of the reverse scan becomes the
                    // implicit last significant position
                    last_scan_pos = scan_pos as i32;
                    ctx_set = if scan_pos < SCAN_SET_SIZE || !is_luma { 0 } else { 2 };
                    cg_last_scan_pos = cg_scan_pos as i32;
                }

                if last_scan_pos < 0 {
                    // still past the last significant position: uncoded
                    // distortion only, no signalling
                    cost_coeff[scan_pos] = 0.0;
                    total_rd_cost += cost_uncoded[scan_pos];
                    cost_sig[scan_pos] = 0.0;
                } else {
                    let c1c2_idx = (c1_idx < C1FLAG_NUMBER) as u32 + 2 * (c2_idx == 0) as u32;
                    let base_level = if c1_idx < C1FLAG_NUMBER {
                        2 + (c2_idx == 0) as u32
                    } else {
                        1
                    };

                    let one_ctx = (4 * ctx_set + c1 as u32) as usize;
                    let abs_ctx = (ctx_set + c2 as u32) as usize;
                    let greater_one_bits = &self.est_bits.greater_one_bits[one_ctx];
                    let level_abs_bits = &self.est_bits.level_abs_bits[abs_ctx];

                    let mut level = 0u32;
                    let mut sig_coef_bits = 0u32;
                    cost_coeff[scan_pos] = f64::MAX;

                    if scan_pos as i32 == last_scan_pos {
                        sig_rate_delta[blk_pos] = 0;
                    } else {
                        let ctx_sig = get_sig_ctx_inc(
                            pattern_sig_ctx,
                            log2_tr_size,
                            tr_size,
                            blk_pos as u32,
                            is_luma,
                            code_params.first_significance_map_context,
                        ) as usize;
                        if max_abs_level < 3 {
                            // default to the uncoded outcome
                            cost_sig[scan_pos] =
                                lambda2 * self.est_bits.significant_bits[ctx_sig][0] as f64;
                            cost_coeff[scan_pos] = cost_uncoded[scan_pos] + cost_sig[scan_pos];
                        }
                        sig_rate_delta[blk_pos] = self.est_bits.significant_bits[ctx_sig][1]
                            - self.est_bits.significant_bits[ctx_sig][0];
                        sig_coef_bits = self.est_bits.significant_bits[ctx_sig][1] as u32;
                    }

                    if max_abs_level != 0 {
                        let min_abs_level = (max_abs_level - 1).max(1);
                        let mut lvl = max_abs_level;
                        while lvl >= min_abs_level {
                            let level_bits = get_ic_rate_cost(
                                lvl,
                                lvl as i32 - base_level as i32,
                                greater_one_bits,
                                level_abs_bits,
                                go_rice_param,
                                c1c2_idx,
                            ) + IEP_RATE as u32;

                            let unquant_abs_level = (((lvl as i64) << unquant_preshift)
                                * ((unquant_scale[blk_pos] as i64) << per)
                                + unquant_round)
                                >> unquant_shift;
                            let d = unquant_abs_level - sign_coef.unsigned_abs() as i64;
                            let distortion = ((d * d) << scale_bits) as f64;
                            let mut cur_cost =
                                distortion + lambda2 * (sig_coef_bits + level_bits) as f64;

                            // psy bias: prefer reconstructions that keep the
                            // AC energy of the source
                            if use_psy && blk_pos != 0 {
                                let adjusted = if sign_coef >= 0 {
                                    predicted_coef as i64
                                } else {
                                    -(predicted_coef as i64)
                                };
                                let recon_coef = (unquant_abs_level + adjusted).abs();
                                cur_cost -= (((self.psy_rdoq_scale * recon_coef) << scale_bits)
                                    >> 8) as f64;
                            }

                            if cur_cost < cost_coeff[scan_pos] {
                                level = lvl;
                                cost_coeff[scan_pos] = cur_cost;
                                cost_sig[scan_pos] = lambda2 * sig_coef_bits as f64;
                            }
                            if lvl == min_abs_level {
                                break;
                            }
                            lvl -= 1;
                        }
                    }

                    delta_u[blk_pos] =
                        ((scaled[blk_pos] - ((level as i64) << q_bits)) >> (q_bits - 8)) as i32;
                    dst_coeff[blk_pos] = level as i16;
                    total_rd_cost += cost_coeff[scan_pos];

                    // rate deltas for the sign-hiding pass
                    if level != 0 {
                        let rate_now = get_ic_rate(
                            level,
                            level as i32 - base_level as i32,
                            greater_one_bits,
                            level_abs_bits,
                            go_rice_param,
                            c1c2_idx,
                        );
                        rate_inc_up[blk_pos] = get_ic_rate(
                            level + 1,
                            level as i32 + 1 - base_level as i32,
                            greater_one_bits,
                            level_abs_bits,
                            go_rice_param,
                            c1c2_idx,
                        ) - rate_now;
                        rate_inc_down[blk_pos] = get_ic_rate(
                            level - 1,
                            level as i32 - 1 - base_level as i32,
                            greater_one_bits,
                            level_abs_bits,
                            go_rice_param,
                            c1c2_idx,
                        ) - rate_now;
                    } else {
                        rate_inc_up[blk_pos] = greater_one_bits[0];
                        rate_inc_down[blk_pos] = 0;
                    }

                    // CABAC state modelling (HEVC 9.3.4.2)
                    if level >= base_level && go_rice_param < 4 && level > (3 << go_rice_param) {
                        go_rice_param += 1;
                    }
                    c1_idx += (level != 0) as u32;
                    if level > 1 {
                        c1 = 0;
                        c2 += (c2 < 2) as i32;
                        c2_idx += 1;
                    } else if (1..3).contains(&c1) && level != 0 {
                        c1 += 1;
                    }

                    if scan_pos % SCAN_SET_SIZE == 0 && scan_pos > 0 {
                        c2 = 0;
                        go_rice_param = 0;
                        c1_idx = 0;
                        c2_idx = 0;
                        ctx_set = if scan_pos == SCAN_SET_SIZE || !is_luma { 0 } else { 2 };
                        debug_assert!(c1 >= 0);
                        ctx_set += (c1 == 0) as u32;
                        c1 = 1;
                    }
                }

                cg_rd_stats.sig_cost += cost_sig[scan_pos];
                if scan_pos_in_cg == 0 {
                    cg_rd_stats.sig_cost0 = cost_sig[scan_pos];
                }

                if dst_coeff[blk_pos] != 0 {
                    sig_coeff_group_flags |= cg_blk_pos_mask;
                    cg_rd_stats.coded_level_and_dist +=
                        cost_coeff[scan_pos] - cost_sig[scan_pos];
                    cg_rd_stats.uncoded_dist += cost_uncoded[scan_pos];
                    cg_rd_stats.nnz_before_pos0 += scan_pos_in_cg as i32;
                }
            }

            // group roll-up: decide whether to code this CG at all
            if cg_last_scan_pos >= 0 {
                cost_coeff_group_sig[cg_scan_pos] = 0.0;
                if cg_scan_pos == 0 {
                    // group 0 is implied whenever anything is coded
                    sig_coeff_group_flags |= cg_blk_pos_mask;
                } else if sig_coeff_group_flags & cg_blk_pos_mask == 0 {
                    let ctx_sig = get_sig_coeff_group_ctx_inc(
                        sig_coeff_group_flags,
                        cg_pos_x,
                        cg_pos_y,
                        code_params.log2_tr_size_cg,
                    ) as usize;
                    cost_coeff_group_sig[cg_scan_pos] =
                        lambda2 * self.est_bits.significant_coeff_group_bits[ctx_sig][0] as f64;
                    // the zero bit of the CG bitmap replaces the per
                    // coefficient significance bits
                    total_rd_cost += cost_coeff_group_sig[cg_scan_pos];
                    total_rd_cost -= cg_rd_stats.sig_cost;
                } else if (cg_scan_pos as i32) < cg_last_scan_pos {
                    // the last CG is handled with the last position below
                    let sig_ctx = get_sig_coeff_group_ctx_inc(
                        sig_coeff_group_flags,
                        cg_pos_x,
                        cg_pos_y,
                        code_params.log2_tr_size_cg,
                    ) as usize;

                    if cg_rd_stats.nnz_before_pos0 == 0 {
                        // with only coefficient 0 coded its significance
                        // bit is implied
                        total_rd_cost -= cg_rd_stats.sig_cost0;
                        cg_rd_stats.sig_cost -= cg_rd_stats.sig_cost0;
                    }

                    let mut cost_zero_cg = total_rd_cost
                        + lambda2 * self.est_bits.significant_coeff_group_bits[sig_ctx][0] as f64;
                    cost_zero_cg += cg_rd_stats.uncoded_dist;
                    cost_zero_cg -= cg_rd_stats.coded_level_and_dist;
                    cost_zero_cg -= cg_rd_stats.sig_cost;

                    cost_coeff_group_sig[cg_scan_pos] =
                        lambda2 * self.est_bits.significant_coeff_group_bits[sig_ctx][1] as f64;
                    total_rd_cost += cost_coeff_group_sig[cg_scan_pos];

                    if cost_zero_cg < total_rd_cost {
                        sig_coeff_group_flags &= !cg_blk_pos_mask;
                        total_rd_cost = cost_zero_cg;
                        cost_coeff_group_sig[cg_scan_pos] = lambda2
                            * self.est_bits.significant_coeff_group_bits[sig_ctx][0] as f64;

                        // reset the whole group to zero
                        for scan_pos_in_cg in (0..SCAN_SET_SIZE).rev() {
                            let scan_pos = cg_scan_pos * SCAN_SET_SIZE + scan_pos_in_cg;
                            let blk_pos = code_params.scan[scan_pos] as usize;
                            if dst_coeff[blk_pos] != 0 {
                                cost_coeff[scan_pos] = cost_uncoded[scan_pos];
                                cost_sig[scan_pos] = 0.0;
                            }
                            dst_coeff[blk_pos] = 0;
                        }
                    }
                }
            }
        }

        if last_scan_pos < 0 {
            // unreachable while the seed quantizer reports significance;
            // kept as a defensive guard
            return 0;
        }

        // coded-block-flag decision: the uncoded block is the baseline the
        // last-position search has to beat
        let mut best_cost;
        if ctx.root_cbf {
            best_cost =
                total_uncoded_cost + lambda2 * self.est_bits.block_root_cbp_bits[0][0] as f64;
            total_rd_cost += lambda2 * self.est_bits.block_root_cbp_bits[0][1] as f64;
        } else {
            let cbf_ctx = ctx.cbf_ctx as usize;
            best_cost = total_uncoded_cost + lambda2 * self.est_bits.block_cbp_bits[cbf_ctx][0] as f64;
            total_rd_cost += lambda2 * self.est_bits.block_cbp_bits[cbf_ctx][1] as f64;
        }

        // find the cheapest last non-zero position
        let mut best_last_idx = 0usize;
        let mut found_last = false;
        let mut cg_scan_pos = cg_last_scan_pos;
        while cg_scan_pos >= 0 && !found_last {
            let cg_blk_pos = code_params.scan_cg[cg_scan_pos as usize] as u32;
            total_rd_cost -= cost_coeff_group_sig[cg_scan_pos as usize];

            if sig_coeff_group_flags & (1u64 << cg_blk_pos) != 0 {
                for scan_pos_in_cg in (0..SCAN_SET_SIZE).rev() {
                    let scan_pos = cg_scan_pos as usize * SCAN_SET_SIZE + scan_pos_in_cg;
                    if scan_pos as i32 > last_scan_pos {
                        continue;
                    }
                    let blk_pos = code_params.scan[scan_pos] as usize;
                    if dst_coeff[blk_pos] != 0 {
                        let pos_y = blk_pos as u32 >> log2_tr_size;
                        let pos_x = blk_pos as u32 - (pos_y << log2_tr_size);
                        let bits_last = if code_params.scan_type == ScanType::Ver {
                            self.get_rate_last(pos_y, pos_x)
                        } else {
                            self.get_rate_last(pos_x, pos_y)
                        };
                        let rd_cost_last =
                            total_rd_cost + lambda2 * bits_last as f64 - cost_sig[scan_pos];

                        if rd_cost_last < best_cost {
                            best_last_idx = scan_pos + 1;
                            best_cost = rd_cost_last;
                        }
                        if dst_coeff[blk_pos] > 1 {
                            found_last = true;
                            break;
                        }
                        // roll this coefficient back to uncoded and keep
                        // searching
                        total_rd_cost -= cost_coeff[scan_pos];
                        total_rd_cost += cost_uncoded[scan_pos];
                    } else {
                        total_rd_cost -= cost_sig[scan_pos];
                    }
                }
            }
            cg_scan_pos -= 1;
        }

        // re-count survivors and re-apply the DCT signs
        let mut num_sig = 0u32;
        for pos in 0..best_last_idx {
            let blk_pos = code_params.scan[pos] as usize;
            let level = dst_coeff[blk_pos] as i32;
            num_sig += (level != 0) as u32;

            let mask = self.resi_dct[blk_pos] >> 31;
            dst_coeff[blk_pos] = ((level ^ mask) - mask) as i16;
        }

        // everything past the chosen last position is uncoded
        for pos in best_last_idx..=last_scan_pos as usize {
            dst_coeff[code_params.scan[pos] as usize] = 0;
        }

        if ctx.sign_hiding && num_sig >= 2 {
            num_sig = self.rd_sign_hiding(
                dst_coeff,
                &delta_u,
                &rate_inc_up,
                &rate_inc_down,
                &sig_rate_delta,
                num_sig,
                cg_last_scan_pos,
                code_params,
                per,
                rem,
                lambda2,
            );
        }

        num_sig
    }

    /// Rate-distortion sign hiding: same parity rule as the scalar pass,
    /// with the cost of a toggle measured as `rdFactor * deltaU + rate`.
    #[allow(clippy::too_many_arguments)]
    fn rd_sign_hiding(
        &self,
        dst_coeff: &mut [i16],
        delta_u: &[i32],
        rate_inc_up: &[i32],
        rate_inc_down: &[i32],
        sig_rate_delta: &[i32],
        mut num_sig: u32,
        cg_last_scan_pos: i32,
        code_params: &crate::scan::TuCodingParams,
        per: i32,
        rem: i32,
        lambda2: f64,
    ) -> u32 {
        let inv_quant = (INV_QUANT_SCALES[rem as usize] as i64) << per;
        let rd_factor = ((inv_quant * inv_quant) as f64 / (lambda2 * 16.0) + 0.5) as i64;
        let scan = code_params.scan;

        let mut last_cg = true;
        for sub_set in (0..=cg_last_scan_pos as usize).rev() {
            let sub_pos = sub_set << LOG2_SCAN_SET_SIZE;

            let Some(last_nz) = (0..SCAN_SET_SIZE)
                .rev()
                .find(|&n| dst_coeff[scan[n + sub_pos] as usize] != 0)
            else {
                continue;
            };
            let first_nz = (0..SCAN_SET_SIZE)
                .find(|&n| dst_coeff[scan[n + sub_pos] as usize] != 0)
                .unwrap();

            if (last_nz as i32 - first_nz as i32) < crate::quant::SBH_THRESHOLD {
                last_cg = false;
                continue;
            }

            let sign_bit = (dst_coeff[scan[sub_pos + first_nz] as usize] <= 0) as u32;
            let mut abs_sum = 0i32;
            for n in first_nz..=last_nz {
                abs_sum += dst_coeff[scan[n + sub_pos] as usize] as i32;
            }

            if sign_bit != (abs_sum as u32 & 1) {
                let mut min_cost_inc = i64::MAX;
                let mut min_pos = usize::MAX;
                let mut final_change = 0i32;

                let start = if last_cg { last_nz } else { SCAN_SET_SIZE - 1 };
                for n in (0..=start).rev() {
                    let blk_pos = scan[n + sub_pos] as usize;
                    let (cur_cost, cur_change);
                    if dst_coeff[blk_pos] != 0 {
                        let cost_up =
                            rd_factor * (-delta_u[blk_pos] as i64) + rate_inc_up[blk_pos] as i64;

                        // dropping a +/-1 to zero also drops its
                        // significance bit
                        let is_one = dst_coeff[blk_pos].abs() == 1;
                        let mut cost_down = rd_factor * delta_u[blk_pos] as i64
                            + rate_inc_down[blk_pos] as i64
                            - if is_one {
                                (1i64 << 15) + sig_rate_delta[blk_pos] as i64
                            } else {
                                0
                            };

                        if last_cg && last_nz == n && is_one {
                            cost_down -= 4 << 15;
                        }

                        if cost_up < cost_down {
                            cur_cost = cost_up;
                            cur_change = 1;
                        } else if n == first_nz && is_one {
                            cur_cost = i64::MAX;
                            cur_change = -1;
                        } else {
                            cur_cost = cost_down;
                            cur_change = -1;
                        }
                    } else {
                        // raising an uncoded coefficient to +/-1 buys its
                        // significance and sign bits
                        cur_cost = rd_factor * (-(delta_u[blk_pos].abs() as i64))
                            + (1i64 << 15)
                            + rate_inc_up[blk_pos] as i64
                            + sig_rate_delta[blk_pos] as i64;
                        cur_change = 1;

                        if n < first_nz {
                            let this_sign_bit = (self.resi_dct[blk_pos] < 0) as u32;
                            if this_sign_bit != sign_bit {
                                continue;
                            }
                        }
                    }

                    if cur_cost < min_cost_inc {
                        min_cost_inc = cur_cost;
                        final_change = cur_change;
                        min_pos = blk_pos;
                    }
                }

                if min_pos == usize::MAX {
                    last_cg = false;
                    continue;
                }

                if dst_coeff[min_pos] == 32767 || dst_coeff[min_pos] == -32768 {
                    final_change = -1;
                }

                if dst_coeff[min_pos] == 0 {
                    num_sig += 1;
                } else if final_change == -1 && dst_coeff[min_pos].abs() == 1 {
                    num_sig -= 1;
                }

                if self.resi_dct[min_pos] >= 0 {
                    dst_coeff[min_pos] += final_change as i16;
                } else {
                    dst_coeff[min_pos] -= final_change as i16;
                }
            }

            last_cg = false;
        }

        num_sig
    }
}
