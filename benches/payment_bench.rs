//! Benchmark for token amount parsing and payment computation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use invest::purchase::{compute_payment, is_valid_token, TokenAmount};

fn bench_compute_payment(c: &mut Criterion) {
    let mut group = c.benchmark_group("payment");

    for input in ["2", "1234.5678", "0.000000000000000001", "99999999.123456789012345678"].iter() {
        let amount = TokenAmount::parse(input, 18).unwrap();
        group.bench_with_input(BenchmarkId::new("compute", input), &amount, |b, amount| {
            b.iter(|| black_box(compute_payment(black_box(amount), black_box(1_000_000_000_000u128))));
        });
    }

    group.finish();
}

fn bench_validate_input(c: &mut Criterion) {
    c.bench_function("is_valid_token", |b| {
        b.iter(|| black_box(is_valid_token(black_box("1234.567890123456789"), 18)));
    });
}

criterion_group!(benches, bench_compute_payment, bench_validate_input);
criterion_main!(benches);
