//! CABAC bit-cost tables consumed by RDOQ
//!
//! A read-only bundle of per-context bit costs in FIX15 units (one real bit
//! = 1 << 15). The entropy coder owns the real values and refreshes them
//! between slices for the component about to be coded; the quantizer copies
//! a snapshot per slice and never observes a change within one transform
//! block. [`EstBits::flat`] provides a uniform snapshot (one bit per
//! decision) so the quantizer can run without an entropy coder attached.

/// One full bit in FIX15 cost units
pub const IEP_RATE: i32 = 1 << 15;

/// Significance-map contexts (luma occupies 0..=26, chroma 0..=14)
pub const NUM_SIG_FLAG_CTX: usize = 27;

/// Coefficient-group significance contexts per component
pub const NUM_SIG_CG_FLAG_CTX: usize = 2;

/// greater-1 flag contexts (luma 16, chroma 8)
pub const NUM_ONE_FLAG_CTX: usize = 16;

/// greater-2 flag contexts. Only 4 are coded per component, but the RDOQ
/// context-set bookkeeping can form (and never read) indexes up to 5, so
/// the table keeps two spare slots.
pub const NUM_ABS_FLAG_CTX: usize = 6;

/// Last-position group indices for sides up to 32
pub const NUM_LAST_POS_GROUPS: usize = 10;

/// Coded-block-flag contexts
pub const NUM_QT_CBF_CTX: usize = 5;

/// Root coded-block-flag contexts
pub const NUM_QT_ROOT_CBF_CTX: usize = 1;

/// Per-slice snapshot of CABAC bit costs, FIX15 units. Each `[2]` pair is
/// the cost of coding the bin as 0 or 1 in that context.
#[derive(Debug, Clone)]
pub struct EstBits {
    pub significant_coeff_group_bits: [[i32; 2]; NUM_SIG_CG_FLAG_CTX],
    pub significant_bits: [[i32; 2]; NUM_SIG_FLAG_CTX],
    pub last_x_bits: [i32; NUM_LAST_POS_GROUPS],
    pub last_y_bits: [i32; NUM_LAST_POS_GROUPS],
    pub greater_one_bits: [[i32; 2]; NUM_ONE_FLAG_CTX],
    pub level_abs_bits: [[i32; 2]; NUM_ABS_FLAG_CTX],
    pub block_cbp_bits: [[i32; 2]; NUM_QT_CBF_CTX],
    pub block_root_cbp_bits: [[i32; 2]; NUM_QT_ROOT_CBF_CTX],
}

impl EstBits {
    /// Uniform snapshot: every context-coded bin costs exactly one bit in
    /// either direction, last-position prefixes cost their truncated-unary
    /// length. Deterministic stand-in for a real entropy-coder snapshot.
    pub fn flat() -> Self {
        let mut last_x_bits = [0; NUM_LAST_POS_GROUPS];
        let mut last_y_bits = [0; NUM_LAST_POS_GROUPS];
        for g in 0..NUM_LAST_POS_GROUPS {
            last_x_bits[g] = (g as i32 + 1) * IEP_RATE;
            last_y_bits[g] = (g as i32 + 1) * IEP_RATE;
        }
        EstBits {
            significant_coeff_group_bits: [[IEP_RATE; 2]; NUM_SIG_CG_FLAG_CTX],
            significant_bits: [[IEP_RATE; 2]; NUM_SIG_FLAG_CTX],
            last_x_bits,
            last_y_bits,
            greater_one_bits: [[IEP_RATE; 2]; NUM_ONE_FLAG_CTX],
            level_abs_bits: [[IEP_RATE; 2]; NUM_ABS_FLAG_CTX],
            block_cbp_bits: [[IEP_RATE; 2]; NUM_QT_CBF_CTX],
            block_root_cbp_bits: [[IEP_RATE; 2]; NUM_QT_ROOT_CBF_CTX],
        }
    }
}

impl Default for EstBits {
    fn default() -> Self {
        EstBits::flat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_costs_one_bit() {
        let est = EstBits::flat();
        assert_eq!(est.significant_bits[0][0], IEP_RATE);
        assert_eq!(est.significant_bits[26][1], IEP_RATE);
        assert_eq!(est.greater_one_bits[15][1], IEP_RATE);
        assert_eq!(est.last_x_bits[0], IEP_RATE);
        assert_eq!(est.last_x_bits[9], 10 * IEP_RATE);
    }
}
