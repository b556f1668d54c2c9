//! hevcore - the transform/quantization core of an H.265/HEVC encoder
//!
//! This library implements the algorithmic heart of an HEVC encoder: the
//! forward/inverse integer transforms, scalar and rate-distortion
//! optimized quantization (RDOQ), sign-data hiding, coefficient noise
//! reduction, and intra prediction. The surrounding encoder (partitioning,
//! motion estimation, entropy coding, rate control) lives elsewhere and
//! talks to this crate through plain data: residual blocks in, quantized
//! levels and reconstructed residuals out, CABAC bit costs in as read-only
//! snapshots.
//!
//! # Architecture
//!
//! ```text
//! residual ──> transform (DCT/DST) ──> optional denoise ──┐
//!                                                         v
//!               levels <── scalar quant + sign hiding ── coeffs
//!               levels <── RDOQ (level search, CG roll-up,
//!                          last position, CBF, RD sign hiding)
//!
//! levels ──> dequant ──> inverse transform ──> residual   (reconstruction)
//! ```
//!
//! - `transform`: HEVC integer DCT 4..32 and DST 4x4, transform-skip shifts
//! - `scaling`: per-(size, list, QP%6) quantization matrices
//! - `scan`: diagonal/horizontal/vertical scan tables and TU geometry
//! - `intra`: planar, DC and 33 angular predictors
//! - `quant`: scalar quantizer, sign-bit hiding, the `Quant` orchestrator
//! - `rdoq`: rate-distortion optimized level selection
//! - `cost`: CABAC bit-cost snapshot consumed by RDOQ
//! - `nr`: per-worker coefficient noise reduction
//!
//! # Threading
//!
//! Every entry point is synchronous and a [`Quant`] instance is owned by
//! one worker thread; scaling lists and cost snapshots are shared
//! read-only.

pub mod cost;
pub mod error;
pub mod intra;
pub mod nr;
pub mod quant;
pub mod rdoq;
pub mod scaling;
pub mod scan;
pub mod transform;

pub use cost::EstBits;
pub use error::{Error, Result};
pub use intra::{filter_reference_samples, IntraPredictor, INTRA_FILTER_FLAGS};
pub use nr::NoiseReduction;
pub use quant::{ChromaFormat, QpParam, Quant, TextureType, TuContext};
pub use scaling::{ScalingList, ScalingListData};
pub use scan::{ScanType, TuCodingParams};
pub use transform::{MAX_TR_DYNAMIC_RANGE, MAX_TR_SIZE};

/// hevcore version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_surface() {
        // the orchestrator builds against the re-exported types
        let scaling = std::sync::Arc::new(ScalingList::flat());
        let mut quant = Quant::new(false, 0.0, scaling, 8).unwrap();
        quant.set_qp(26, 0, 0, ChromaFormat::I420).unwrap();
        quant.set_lambdas(1.0, 1.0, 1.0);
        quant.load_entropy_costs(&EstBits::flat());
        assert_eq!(quant.qp_param(TextureType::Luma).qp, 26);
    }
}
