use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use veil_core::{materialize_delta, Attributes, DeltaOp, Span, TextReplica};

fn bold() -> Attributes {
    serde_json::from_value(json!({"bold": true})).unwrap()
}

fn bench_materialize_1000_spans(c: &mut Criterion) {
    let spans: Vec<Span> = (0..1000)
        .map(|i| {
            let attrs = (i % 3 == 0).then(bold);
            Span::text("lorem ", attrs)
        })
        .collect();

    c.bench_function("materialize_1000_spans", |b| {
        b.iter(|| black_box(materialize_delta(black_box(&spans))))
    });
}

fn bench_apply_typing_delta(c: &mut Criterion) {
    c.bench_function("apply_delta_100_keystrokes", |b| {
        b.iter(|| {
            let (mut replica, _) = TextReplica::new_document().unwrap();
            for i in 0..100u32 {
                replica
                    .apply_delta(&[DeltaOp::retain(i), DeltaOp::insert("a")])
                    .unwrap();
            }
            black_box(replica.len());
        })
    });
}

fn bench_format_range(c: &mut Criterion) {
    let (mut replica, _) = TextReplica::new_document().unwrap();
    replica
        .apply_delta(&[DeltaOp::insert("x".repeat(2000))])
        .unwrap();

    c.bench_function("format_2000_chars", |b| {
        b.iter(|| {
            let mut copy = TextReplica::from_changes([replica.encode_state().as_slice()]).unwrap();
            black_box(
                copy.apply_delta(&[DeltaOp::retain_with(2000, bold())])
                    .unwrap(),
            );
        })
    });
}

fn bench_to_delta(c: &mut Criterion) {
    let (mut replica, _) = TextReplica::new_document().unwrap();
    for i in 0..200u32 {
        let op = if i % 2 == 0 {
            DeltaOp::insert_with("word ", bold())
        } else {
            DeltaOp::insert("word ")
        };
        replica.apply_delta(&[DeltaOp::retain(i * 5), op]).unwrap();
    }

    c.bench_function("to_delta_200_runs", |b| {
        b.iter(|| black_box(replica.to_delta()))
    });
}

criterion_group!(
    benches,
    bench_materialize_1000_spans,
    bench_apply_typing_delta,
    bench_format_range,
    bench_to_delta,
);
criterion_main!(benches);
