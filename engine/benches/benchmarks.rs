//! Performance benchmarks for tandem-engine

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use tandem_engine::ot::{JsonOt, OtType, TransformSide};

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("json_ot_apply");
    let ty = JsonOt;

    group.bench_function("na", |b| {
        let doc = json!({"counter": 0});
        let delta = json!([{"p": ["counter"], "na": 1}]);
        b.iter(|| ty.apply(black_box(doc.clone()), black_box(&delta)).unwrap())
    });

    group.bench_function("list_insert", |b| {
        let doc = json!({"items": (0..100).collect::<Vec<_>>()});
        let delta = json!([{"p": ["items", 50], "li": "x"}]);
        b.iter(|| ty.apply(black_box(doc.clone()), black_box(&delta)).unwrap())
    });

    group.bench_function("nested", |b| {
        let doc = json!({"a": {"b": {"c": {"d": [0, {"n": 1}]}}}});
        let delta = json!([{"p": ["a", "b", "c", "d", 1, "n"], "na": 1}]);
        b.iter(|| ty.apply(black_box(doc.clone()), black_box(&delta)).unwrap())
    });

    group.finish();
}

fn bench_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("json_ot_transform");
    let ty = JsonOt;

    group.bench_function("commuting_na", |b| {
        let left = json!([{"p": ["age"], "na": 2}]);
        let right = json!([{"p": ["age"], "na": 7}]);
        b.iter(|| ty.transform_x(black_box(&left), black_box(&right)).unwrap())
    });

    group.bench_function("list_shift", |b| {
        let left = json!([{"p": ["xs", 3], "li": "a"}, {"p": ["xs", 7], "ld": 0}]);
        let right = json!([{"p": ["xs", 5], "li": "b"}]);
        b.iter(|| {
            ty.transform(black_box(&left), black_box(&right), TransformSide::Right)
                .unwrap()
        })
    });

    group.finish();
}

fn bench_compose(c: &mut Criterion) {
    let ty = JsonOt;
    c.bench_function("json_ot_compose", |b| {
        let first = json!([{"p": ["n"], "na": 1}]);
        let second = json!([{"p": ["n"], "na": 2}]);
        b.iter(|| ty.compose(black_box(&first), black_box(&second)).unwrap())
    });
}

criterion_group!(benches, bench_apply, bench_transform, bench_compose);
criterion_main!(benches);
