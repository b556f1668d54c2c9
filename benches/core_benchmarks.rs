//! Core kernel benchmarks
//!
//! Micro-benchmarks for the hot paths: forward DCT, scalar quantization,
//! RDOQ and intra prediction.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hevcore::quant::{ChromaFormat, TextureType, TuContext};
use hevcore::scan::{ScanType, TuCodingParams};
use hevcore::{transform, EstBits, IntraPredictor, Quant, ScalingList};

fn test_residual(n: usize) -> Vec<i16> {
    (0..n * n)
        .map(|i| (((i * 31) % 160) as i16) - 80)
        .collect()
}

fn make_quant(use_rdoq: bool) -> Quant {
    let mut q = Quant::new(use_rdoq, 0.0, Arc::new(ScalingList::flat()), 8).unwrap();
    q.set_qp(27, 0, 0, ChromaFormat::I420).unwrap();
    q.set_lambdas(8.0, 8.0, 8.0);
    q.load_entropy_costs(&EstBits::flat());
    q
}

fn tu_context(log2_tr_size: u32) -> TuContext {
    TuContext {
        ttype: TextureType::Luma,
        is_intra: false,
        i_slice: false,
        transquant_bypass: false,
        transform_skip: false,
        sign_hiding: true,
        code_params: TuCodingParams::new(log2_tr_size, true, ScanType::Diag),
        cbf_ctx: 0,
        root_cbf: false,
    }
}

fn bench_dct(c: &mut Criterion) {
    let mut group = c.benchmark_group("dct");
    for log2 in 2..=5u32 {
        let size = 1usize << log2;
        let residual = test_residual(size);
        let mut coeff = vec![0i32; size * size];
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", size, size)),
            &log2,
            |b, &log2| {
                b.iter(|| {
                    transform::dct(black_box(&residual), &mut coeff, size, log2, 8);
                });
            },
        );
    }
    group.finish();
}

fn bench_quant(c: &mut Criterion) {
    let mut group = c.benchmark_group("quant");
    for (name, use_rdoq) in [("scalar", false), ("rdoq", true)] {
        let mut q = make_quant(use_rdoq);
        let ctx = tu_context(4);
        let residual = test_residual(16);
        let mut levels = vec![0i16; 256];
        group.bench_function(name, |b| {
            b.iter(|| {
                q.transform_nxn(
                    black_box(&ctx),
                    &[],
                    0,
                    black_box(&residual),
                    16,
                    &mut levels,
                    4,
                )
            });
        });
    }
    group.finish();
}

fn bench_intra_all_angular(c: &mut Criterion) {
    let pred = IntraPredictor::new(8).unwrap();
    let size = 32usize;
    let refs: Vec<u16> = (0..4 * size + 1).map(|i| 100 + (i % 40) as u16).collect();
    let mut filt = vec![0u16; refs.len()];
    hevcore::filter_reference_samples(&refs, &mut filt, size);
    let mut packed = vec![0u16; 33 * size * size];

    c.bench_function("intra_all_angular_32", |b| {
        b.iter(|| {
            pred.predict_all_angular(black_box(&mut packed), &refs, &filt, 5, true);
        });
    });
}

criterion_group!(benches, bench_dct, bench_quant, bench_intra_all_angular);
criterion_main!(benches);
