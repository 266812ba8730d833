// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # Multi-Authorisation Example
//!
//! Walks an accounts consent through two-party SCA, replays an idempotent
//! creation and shows a rejected payment.  Run with:
//!
//! ```bash
//! RUST_LOG=berlin_consent_core=debug cargo run --example multi_authorisation
//! ```

use berlin_consent_core::{
    engine::NewConsent,
    idempotency::CachedResponse,
    lifecycle::OutcomeRequest,
    permissions::AccountPermissions,
    routing::{Method, RequestKind},
    types::{AccountReference, AuthorisationType, ConsentType},
    ConsentEngine, ConsentError, EngineConfig, InMemoryConsentStore,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), ConsentError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let engine = ConsentEngine::new(EngineConfig::default(), InMemoryConsentStore::new());

    // -----------------------------------------------------------------------
    // 1. Idempotent consent creation
    // -----------------------------------------------------------------------
    let route = RequestKind::parse(Method::Post, "/v1/consents")?;
    let body = br#"{"access":{"accounts":[{"iban":"DE89370400440532013000"}]},"recurringIndicator":true}"#;

    let mut consent_id = String::new();
    for attempt in 1..=2 {
        let execution = engine.execute_idempotent(&route, "tpp-1", Some("3f1c-retry"), body, || {
            let consent = engine.create_consent(
                NewConsent::new("tpp-1", ConsentType::Accounts, serde_json::json!({ "raw": "consent" }))
                    .recurring(),
            )?;
            Ok(CachedResponse::new(201, consent.id))
        })?;
        consent_id = String::from_utf8_lossy(&execution.response().body).into_owned();
        println!("attempt {attempt}: consent {consent_id} (replay: {})", execution.is_replay());
    }

    // -----------------------------------------------------------------------
    // 2. Two PSUs authorise the same consent
    // -----------------------------------------------------------------------
    let first = engine.start_authorisation(&consent_id, "tpp-1", AuthorisationType::Authorisation)?;
    let second = engine.start_authorisation(&consent_id, "tpp-1", AuthorisationType::Authorisation)?;
    let accounts =
        AccountPermissions::from_access(&["iban:DE89370400440532013000:EUR"], &["iban:DE89370400440532013000:EUR"], &[])?;

    for (auth, psu) in [(&first, "psu-anna"), (&second, "psu-ben")] {
        let report = engine.record_outcome(
            &OutcomeRequest::approve(&consent_id, &auth.id, psu).with_permissions(accounts.clone()),
        )?;
        println!("{psu} approved: aggregate {} -> status {}", report.aggregate, report.status);
    }

    let retrieval = engine.record_data_retrieval(&consent_id, "tpp-1")?;
    println!("data access granted to {} account mapping(s)", retrieval.accounts.len());

    // -----------------------------------------------------------------------
    // 3. A payment declined by one of its signatories
    // -----------------------------------------------------------------------
    let payment = engine.create_consent(NewConsent::new(
        "tpp-1",
        ConsentType::BulkPayments,
        serde_json::json!({ "batchBookingPreferred": true }),
    ))?;
    let signer_a = engine.start_authorisation(&payment.id, "tpp-1", AuthorisationType::Authorisation)?;
    let signer_b = engine.start_authorisation(&payment.id, "tpp-1", AuthorisationType::Authorisation)?;
    let debtor = AccountPermissions::for_debtor(AccountReference::new("iban", "DE02120300000000202051", Some("EUR")));

    let report = engine.record_outcome(
        &OutcomeRequest::approve(&payment.id, &signer_a.id, "psu-anna").with_permissions(debtor),
    )?;
    println!("bulk payment after first signature: {}", report.status);
    let report = engine.record_outcome(&OutcomeRequest::deny(&payment.id, &signer_b.id, "psu-ben"))?;
    println!("bulk payment after refusal: {}", report.status);

    Ok(())
}
