use std::time::Duration as StdDuration;

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use uuid::Uuid;

use stockforge_core::{ActorId, Money, ProductId, Quantity, TenantId};
use stockforge_infra::store::{InMemoryStockLedger, StockLedger};
use stockforge_ledger::{ApplyMovement, MovementKind, MovementReference, ReferenceKind, StockKey};
use stockforge_reservations::{ReleaseReservation, ReserveStock};

fn in_cmd(tenant_id: TenantId, key: &StockKey, quantity: u64) -> ApplyMovement {
    ApplyMovement {
        tenant_id,
        key: key.clone(),
        kind: MovementKind::Purchase,
        quantity: Quantity::from(quantity),
        unit_cost: Some(Money::parse("10.00").unwrap()),
        reference: MovementReference::new(ReferenceKind::Purchase, Uuid::now_v7()),
        actor_id: ActorId::new(),
        occurred_at: Utc::now(),
    }
}

fn out_cmd(tenant_id: TenantId, key: &StockKey, quantity: u64) -> ApplyMovement {
    ApplyMovement {
        tenant_id,
        key: key.clone(),
        kind: MovementKind::Sale,
        quantity: Quantity::from(quantity),
        unit_cost: None,
        reference: MovementReference::new(ReferenceKind::Sale, Uuid::now_v7()),
        actor_id: ActorId::new(),
        occurred_at: Utc::now(),
    }
}

fn seeded_ledger() -> (InMemoryStockLedger, TenantId, StockKey) {
    let ledger = InMemoryStockLedger::new();
    let tenant = TenantId::new();
    let key = StockKey::product(ProductId::new());
    ledger
        .apply_movement(in_cmd(tenant, &key, 1_000_000))
        .expect("seed receipt");
    (ledger, tenant, key)
}

fn bench_inbound_receipt(c: &mut Criterion) {
    let mut group = c.benchmark_group("stock_ledger");
    group.throughput(Throughput::Elements(1));

    group.bench_function("inbound_receipt", |b| {
        let (ledger, tenant, key) = seeded_ledger();
        b.iter(|| {
            let movement = ledger
                .apply_movement(in_cmd(tenant, &key, 1))
                .expect("receipt");
            black_box(movement);
        });
    });

    group.finish();
}

fn bench_receipt_then_issue(c: &mut Criterion) {
    let mut group = c.benchmark_group("stock_ledger");
    group.throughput(Throughput::Elements(2));

    // Net-zero per iteration so the bucket never drains.
    group.bench_function("receipt_then_issue", |b| {
        let (ledger, tenant, key) = seeded_ledger();
        b.iter(|| {
            ledger
                .apply_movement(in_cmd(tenant, &key, 1))
                .expect("receipt");
            let movement = ledger
                .apply_movement(out_cmd(tenant, &key, 1))
                .expect("issue");
            black_box(movement);
        });
    });

    group.finish();
}

fn bench_reserve_release_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("stock_ledger");
    group.throughput(Throughput::Elements(1));

    group.bench_function("reserve_release_cycle", |b| {
        let (ledger, tenant, key) = seeded_ledger();
        b.iter(|| {
            let reservation = ledger
                .reserve(ReserveStock {
                    tenant_id: tenant,
                    key: key.clone(),
                    quantity: Quantity::from(5),
                    reference: MovementReference::new(ReferenceKind::Sale, Uuid::now_v7()),
                    ttl: StdDuration::from_secs(300),
                    occurred_at: Utc::now(),
                })
                .expect("reserve");
            ledger
                .release_reservation(ReleaseReservation {
                    tenant_id: tenant,
                    reservation_id: reservation.id,
                    occurred_at: Utc::now(),
                })
                .expect("release");
            black_box(reservation);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_inbound_receipt,
    bench_receipt_then_issue,
    bench_reserve_release_cycle
);
criterion_main!(benches);
