// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Criterion benchmark suite for the consent engine.
//!
//! Benchmarks cover the hot paths of a consent request:
//!
//! - Authorisation status aggregation
//! - Idempotency cache admission and replay
//! - Request routing
//! - A full create / authorise / approve flow
//!
//! Run with: `cargo bench --bench consent_benchmark`

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use berlin_consent_core::{
    aggregate::aggregate_statuses,
    engine::NewConsent,
    idempotency::{hash_payload, CachedResponse, IdempotencyCache, IdempotencyKey},
    permissions::AccountPermissions,
    routing::{Method, RequestKind},
    types::{AuthorisationType, ConsentType, ScaStatus},
    ConsentEngine, EngineConfig, IdempotencyConfig, InMemoryConsentStore, OutcomeRequest,
    SystemClock,
};

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

fn aggregation_benchmark(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("aggregate");

    for size in [2usize, 8, 64] {
        let mut statuses = vec![ScaStatus::Finalised; size];
        statuses[size / 2] = ScaStatus::Received;

        group.bench_with_input(BenchmarkId::new("partial", size), &statuses, |bencher, statuses| {
            bencher.iter(|| black_box(aggregate_statuses(black_box(statuses.iter().copied()))));
        });
    }

    let failed_last = {
        let mut statuses = vec![ScaStatus::Finalised; 64];
        statuses[63] = ScaStatus::Failed;
        statuses
    };
    group.bench_function("rejected_64", |bencher| {
        bencher.iter(|| black_box(aggregate_statuses(black_box(failed_last.iter().copied()))));
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Idempotency
// ---------------------------------------------------------------------------

fn idempotency_benchmark(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("idempotency");
    let payload = br#"{"instructedAmount":{"currency":"EUR","amount":"123.50"},"creditorName":"Merchant"}"#;

    group.bench_function("hash_payload", |bencher| {
        bencher.iter(|| black_box(hash_payload(black_box(payload))));
    });

    let cache = IdempotencyCache::new(IdempotencyConfig::default(), Arc::new(SystemClock));
    let replay_key = IdempotencyKey::derive("tpp-1", "payments", "replay").unwrap();
    cache
        .execute(&replay_key, payload, || Ok(CachedResponse::new(201, "p-1")))
        .unwrap();

    group.bench_function("replay", |bencher| {
        bencher.iter(|| black_box(cache.check_and_record(&replay_key, black_box(payload))));
    });

    let mut counter = 0u64;
    group.bench_function("first_seen", |bencher| {
        bencher.iter(|| {
            counter += 1;
            let key = IdempotencyKey::derive("tpp-1", "payments", &counter.to_string())
                .unwrap();
            black_box(cache.execute(&key, payload, || Ok(CachedResponse::new(201, "p"))))
        });
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

fn routing_benchmark(criterion: &mut Criterion) {
    criterion.bench_function("route_cancellation_authorisation", |bencher| {
        bencher.iter(|| {
            black_box(RequestKind::parse(
                Method::Put,
                black_box("/v1/payments/sepa-credit-transfers/p-1/cancellation-authorisations/a-1"),
            ))
        });
    });
}

// ---------------------------------------------------------------------------
// Full flow
// ---------------------------------------------------------------------------

fn flow_benchmark(criterion: &mut Criterion) {
    let engine = ConsentEngine::new(EngineConfig::default(), InMemoryConsentStore::new());
    let accounts = AccountPermissions::from_access(&["iban:DE02:EUR"], &["iban:DE02:EUR"], &[])
        .unwrap();

    criterion.bench_function("two_party_authorisation", |bencher| {
        bencher.iter(|| {
            let consent = engine
                .create_consent(NewConsent::new("tpp-1", ConsentType::Accounts, serde_json::Value::Null))
                .unwrap();
            let auths: Vec<_> = (0..2)
                .map(|_| {
                    engine
                        .start_authorisation(&consent.id, "tpp-1", AuthorisationType::Authorisation)
                        .unwrap()
                })
                .collect();
            for (auth, user) in auths.iter().zip(["psu-1", "psu-2"]) {
                let request = OutcomeRequest::approve(&consent.id, &auth.id, user)
                    .with_permissions(accounts.clone());
                black_box(engine.record_outcome(&request).unwrap());
            }
        });
    });
}

criterion_group!(
    benches,
    aggregation_benchmark,
    idempotency_benchmark,
    routing_benchmark,
    flow_benchmark,
);
criterion_main!(benches);
