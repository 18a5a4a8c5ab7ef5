//! Criterion benchmarks for the mapping engine's hot paths.
//!
//! Fixtures are built in-process (not loaded from disk) since this crate's
//! inputs are small, self-describing JSON values rather than large schema
//! files.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};

use mapping_engine_core::{auto_mapping, execute, fingerprint, repair, validate, FingerprintOptions};

fn sample_payload(n: usize) -> Value {
    let items: Vec<Value> = (0..n)
        .map(|i| {
            json!({
                "productId": i,
                "title": format!("Item {i}"),
                "price": format!("{}.99", i),
                "tags": ["a", "b", "c"],
            })
        })
        .collect();
    json!({
        "feed_metadata": {"country": "US", "currency": "USD"},
        "items": items,
    })
}

fn sample_target_schema() -> Value {
    json!({"items": [{"productId": "number", "title": "string", "price": "number", "tags": ["string"]}]})
}

fn sample_spec() -> Value {
    json!({
        "mappings": {"items": {"path": "$.items[]", "map": {
            "id": {"source": "$.productId"},
            "title": {"source": "$.title"},
            "price": {"source": "$.price", "transform": "number"},
            "tags": {"source": "$.tags"},
        }}},
        "broadcast": {"country": {"source": "$.feed_metadata.country"}},
    })
}

fn bench_fingerprint(c: &mut Criterion) {
    let payload = sample_payload(200);
    let options = FingerprintOptions { max_items_per_array: Some(10) };
    c.bench_function("fingerprint/200_items", |b| {
        b.iter(|| fingerprint(black_box(&payload), black_box(&options)))
    });
}

fn bench_execute(c: &mut Criterion) {
    let payload = sample_payload(200);
    let spec = sample_spec();
    c.bench_function("execute/200_items", |b| {
        b.iter(|| execute(black_box(&spec), black_box(&[]), black_box(&payload)).unwrap())
    });
}

fn bench_auto_mapping(c: &mut Criterion) {
    let payload = sample_payload(200);
    let target_schema = sample_target_schema();
    c.bench_function("auto_mapping/200_items", |b| {
        b.iter(|| auto_mapping(black_box(&payload), black_box(&target_schema)))
    });
}

fn bench_repair(c: &mut Criterion) {
    let spec = sample_spec();
    c.bench_function("repair/idempotent_pass", |b| {
        b.iter(|| repair(black_box(&spec), None))
    });
}

fn bench_validate(c: &mut Criterion) {
    let spec = sample_spec();
    c.bench_function("validate/well_formed", |b| {
        b.iter(|| validate(black_box(&spec)))
    });
}

criterion_group!(
    benches,
    bench_fingerprint,
    bench_execute,
    bench_auto_mapping,
    bench_repair,
    bench_validate
);
criterion_main!(benches);
