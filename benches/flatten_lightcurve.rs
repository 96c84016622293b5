use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use platodebs::results::eclipse_mask::eclipse_mask;
use platodebs::results::flatten::{fit_trend, residual, FlattenParams};
use platodebs::results::variability::variability_metric;

/// One TESS sector at 2-min cadence: ~27 days, a mid-sector gap, a 3.2 d binary.
fn synthetic_sector(rng: &mut StdRng) -> (Vec<f64>, Vec<f64>) {
    let cadence = 2.0 / 1440.0;
    let time: Vec<f64> = (0..19_000)
        .map(|i| 1683.35 + i as f64 * cadence)
        .filter(|t| !(1696.5..1697.5).contains(t))
        .collect();
    let flux = time
        .iter()
        .map(|&t| {
            let phase = (t - 1684.0 + 1.6).rem_euclid(3.2) - 1.6;
            let dip = if phase.abs() < 0.08 { 0.25 } else { 0.0 };
            1.0 + 0.003 * (t / 4.0).sin() - dip + rng.random_range(-5e-4..5e-4)
        })
        .collect();
    (time, flux)
}

fn bench_flatten(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0x7E55);
    let params = FlattenParams::default();

    c.bench_function("flatten/one_sector_2min", |b| {
        b.iter_batched(
            || synthetic_sector(&mut rng),
            |(time, flux)| {
                let mask = eclipse_mask(&time, Some(3.2), &[(1684.0, 0.16)]);
                let trend = fit_trend(&time, &flux, &mask, black_box(&params)).unwrap();
                black_box(variability_metric(&residual(&flux, &trend)))
            },
            BatchSize::LargeInput,
        )
    });
}

fn bench_mask(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0xEC11);
    let (time, _) = synthetic_sector(&mut rng);
    let eclipses = [(1684.0, 0.16), (1685.6, 0.12)];

    c.bench_function("eclipse_mask/one_sector_2min", |b| {
        b.iter(|| eclipse_mask(black_box(&time), Some(3.2), black_box(&eclipses)))
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_flatten, bench_mask
}
criterion_main!(benches);
