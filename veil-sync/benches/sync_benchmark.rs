use std::collections::HashSet;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use veil_core::{Change, DeltaOp, TextReplica};
use veil_sync::compression;
use veil_sync::document::{DocState, Document, RemoteScopes};
use veil_sync::inbound::handle_change_items;
use veil_sync::outbound::{plan_push, OutboundChange};
use veil_sync::remote::{AccessTag, ItemBody, RemoteItem, Scope};
use veil_sync::{Hub, MemoryStore, SyncConfig};

fn edits(count: usize) -> Vec<Change> {
    let (mut replica, initial) = TextReplica::new_document().unwrap();
    let mut changes = vec![initial];
    for i in 0..count {
        let payload = replica
            .apply_delta(&[DeltaOp::insert(format!("line {i} "))])
            .unwrap()
            .unwrap();
        changes.push(Change::new(payload));
    }
    changes
}

fn bench_compress_change(c: &mut Criterion) {
    let change = edits(1).pop().unwrap();

    c.bench_function("compress_change", |b| {
        b.iter(|| black_box(compression::compress(black_box(&change.payload))))
    });
}

fn bench_plan_push_100(c: &mut Criterion) {
    let scope = Scope::database("d_changes");
    let pending: Vec<OutboundChange> = edits(100)
        .into_iter()
        .map(|change| OutboundChange::change(scope.clone(), change.id, change.payload))
        .collect();
    let stored = HashSet::new();
    let config = SyncConfig::default();

    c.bench_function("plan_push_100_changes", |b| {
        b.iter(|| black_box(plan_push(pending.clone(), &stored, &config)))
    });
}

fn bench_inbound_batch_100(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let items: Vec<RemoteItem> = edits(100)
        .into_iter()
        .map(|change| RemoteItem {
            item_id: change.id,
            body: ItemBody::Compressed(compression::compress(&change.payload)),
            access: AccessTag::creator_only(),
            blob: false,
        })
        .collect();
    let hub = Hub::new();
    let (items, hub) = (&items, &hub);

    c.bench_function("inbound_batch_100_changes", |b| {
        b.to_async(&runtime).iter(move || async move {
            let doc = Document::new(
                None,
                RemoteScopes {
                    changes: Scope::database("d_changes"),
                    metadata: Scope::database("d_metadata"),
                },
                DocState::new(TextReplica::new(), ""),
                Arc::new(MemoryStore::new()),
                Arc::new(hub.connect(Some("bench"))),
                SyncConfig::default(),
            );
            black_box(handle_change_items(&doc, items.clone()).await)
        })
    });
}

criterion_group!(
    benches,
    bench_compress_change,
    bench_plan_push_100,
    bench_inbound_batch_100,
);
criterion_main!(benches);
