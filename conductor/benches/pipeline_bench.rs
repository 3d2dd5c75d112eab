//! Benchmarks for pipeline execution.

use conductor::prelude::*;
use conductor::testing::{numbered_source, DoubleTransform};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn pipeline(items: u64) -> Pipeline {
    Pipeline::new(numbered_source("numbers", items))
        .transform(DoubleTransform::new("double"))
        .transform(DoubleTransform::new("again"))
}

fn pipeline_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");

    for strategy in [Strategy::Sequential, Strategy::Threaded] {
        let conductor = Conductor::new(ConductorConfig::new(strategy).with_max_workers(4));
        c.bench_function(&format!("{strategy}_1000_items"), |b| {
            b.iter(|| {
                let report = runtime
                    .block_on(conductor.collect(pipeline(1000)))
                    .expect("run succeeds");
                black_box(report.stats.ok)
            });
        });
    }
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);
