use criterion::{criterion_group, criterion_main, Criterion};
use gpgam_model::covariance::covariance_matrix;
use gpgam_model::{ExpQuadKernel, GamData, GamParams, GpHyperparameters, Hyperparameter};
use linfa::ParamGuard;
use ndarray::Array;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;

fn observations(n: usize, n_sites: usize) -> GamData<f64> {
    let mut rng = Xoshiro256Plus::seed_from_u64(42);
    let a = Array::random_using(n, Uniform::new(0., 1.), &mut rng);
    let k = Array::linspace(0., 10., n);
    let noise = Array::random_using(n, Normal::new(0., 0.1).unwrap(), &mut rng);
    let y = a.mapv(|v| 1. + 2. * v) + k.mapv(|v: f64| v.sin()) + noise;
    let site: Vec<i64> = (0..n).map(|i| 1 + (i % n_sites) as i64).collect();
    GamData::new(y, a, k, &site, n_sites).expect("valid data")
}

fn criterion_gam(c: &mut Criterion) {
    let mut group = c.benchmark_group("gam");
    group.sample_size(20);

    for n in [100, 300] {
        let data = observations(n, 4);
        group.bench_function(format!("covariance {n}"), |b| {
            b.iter(|| {
                std::hint::black_box(covariance_matrix(
                    &ExpQuadKernel(),
                    data.k(),
                    1.,
                    1.,
                    1e-10,
                ))
            })
        });

        let fixed = GamParams::new(ExpQuadKernel())
            .hyperparameters(GpHyperparameters::fixed(1., 1., 1., 0.3))
            .noise(Hyperparameter::Fixed(0.1))
            .mean_zero_penalty(Some(1e-4))
            .check()
            .expect("valid params");
        group.bench_function(format!("fit fixed {n}"), |b| {
            b.iter(|| std::hint::black_box(fixed.fit_data(&data).expect("fit")))
        });
    }

    let data = observations(50, 2);
    let estimated = GamParams::new(ExpQuadKernel())
        .n_start(2)
        .check()
        .expect("valid params");
    group.bench_function("fit estimated 50", |b| {
        b.iter(|| std::hint::black_box(estimated.fit_data(&data).expect("fit")))
    });

    group.finish();
}

criterion_group!(benches, criterion_gam);
criterion_main!(benches);
