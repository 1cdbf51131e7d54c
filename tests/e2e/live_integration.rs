//! Live Integration Tests: Echomi backend
//!
//! These tests make REAL HTTP calls. No mocks.
//! Run with:
//!   ECHOMI_BACKEND_URL=https://... cargo test -p echomi-e2e --test live_integration -- --ignored --nocapture
//!
//! Read-only calls only: health check and an OTP lookup for a throwaway uid.

use echomi_backend::{Backend, HttpBackend, OtpQuery};
use std::sync::Once;
use std::time::Duration;

static INIT_CRYPTO: Once = Once::new();

fn init_rustls() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

fn live_backend() -> HttpBackend {
    init_rustls();
    let url = match std::env::var("ECHOMI_BACKEND_URL") {
        Ok(url) => url,
        Err(_) => panic!("ECHOMI_BACKEND_URL must point at a running backend"),
    };
    println!("  Backend: {}", url);
    HttpBackend::new(&url, Duration::from_secs(30)).unwrap()
}

// ============================================================================
// TEST 1: Health check
// ============================================================================

#[tokio::test]
#[ignore = "requires network access - live backend"]
async fn test1_backend_health() {
    println!("\n=== TEST 1: Backend health ===\n");

    let backend = live_backend();
    backend.health_check().await.unwrap();
    println!("  ✓ Backend reachable");
}

// ============================================================================
// TEST 2: OTP lookup for an unknown identity
// ============================================================================

#[tokio::test]
#[ignore = "requires network access - live backend"]
async fn test2_unknown_identity_has_no_otp() {
    println!("\n=== TEST 2: OTP lookup, unknown identity ===\n");

    let backend = live_backend();
    let mut query = OtpQuery::new("echomi-e2e-nobody");
    query.sender = Some("AMAZON".into());

    let result = backend.fetch_otp(&query).await.unwrap();
    println!("  Result: {:?}", result);
    assert!(!result.found);
    assert!(result.code.is_none());
}
