// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token verification against a mocked identity provider JWKS endpoint.

mod common;

use std::sync::Arc;
use std::time::Duration;

use auth_gateway::auth::{AuthError, KeySetSettings, TokenVerifier, VerifierConfig};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use common::{
    future_exp, jwks_body, mount_jwks, past_exp, provider_for, settings, verifier_for, JWKS_PATH,
    K1, K2,
};
use jsonwebtoken::Algorithm;
use serde_json::json;
use tokio::task::JoinSet;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn valid_token_returns_decoded_payload() {
    let server = MockServer::start().await;
    mount_jwks(&server, &[&K1], 1).await;

    let exp = future_exp();
    let token = K1.sign(&json!({"email": "a@b.com", "exp": exp}));

    let claims = verifier_for(&server, settings()).verify(&token).await.unwrap();
    assert_eq!(
        serde_json::to_value(&claims).unwrap(),
        json!({"email": "a@b.com", "exp": exp})
    );
}

#[tokio::test]
async fn unknown_kid_is_rejected() {
    let server = MockServer::start().await;
    // The forced refresh is suppressed because the set was just fetched.
    mount_jwks(&server, &[&K1], 1).await;

    let token = K1.sign_with(Algorithm::RS256, Some("k2"), &json!({"exp": future_exp()}));
    let err = verifier_for(&server, settings()).verify(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::UnknownSigningKey));
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let server = MockServer::start().await;
    mount_jwks(&server, &[&K1], 1).await;

    let token = K1.sign(&json!({"email": "a@b.com", "exp": past_exp()}));
    let err = verifier_for(&server, settings()).verify(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::TokenExpired));
}

#[tokio::test]
async fn malformed_header_never_fetches_keys() {
    let server = MockServer::start().await;
    mount_jwks(&server, &[&K1], 0).await;
    let verifier = verifier_for(&server, settings());

    let bad_json = format!("{}.e30.sig", URL_SAFE_NO_PAD.encode("{not json"));
    let no_kid = K1.sign_with(Algorithm::RS256, None, &json!({"exp": future_exp()}));
    for token in ["garbage", "a.b", bad_json.as_str(), no_kid.as_str()] {
        let err = verifier.verify(token).await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken), "{token}");
    }
}

#[tokio::test]
async fn algorithm_substitution_is_rejected() {
    let server = MockServer::start().await;
    mount_jwks(&server, &[&K1], 1).await;
    let verifier = verifier_for(&server, settings());

    let token = K1.sign_with(Algorithm::RS384, Some("k1"), &json!({"exp": future_exp()}));
    let err = verifier.verify(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidSignature));

    let token = K1.sign_with(Algorithm::PS256, Some("k1"), &json!({"exp": future_exp()}));
    let err = verifier.verify(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidSignature));
}

#[tokio::test]
async fn token_signed_by_other_key_is_rejected() {
    let server = MockServer::start().await;
    mount_jwks(&server, &[&K1], 1).await;

    let token = K2.sign_with(Algorithm::RS256, Some("k1"), &json!({"exp": future_exp()}));
    let err = verifier_for(&server, settings()).verify(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidSignature));
}

#[tokio::test]
async fn key_set_is_cached_between_requests() {
    let server = MockServer::start().await;
    mount_jwks(&server, &[&K1], 1).await;
    let verifier = verifier_for(&server, settings());

    for _ in 0..5 {
        let token = K1.sign(&json!({"sub": "u1", "exp": future_exp()}));
        verifier.verify(&token).await.unwrap();
    }
}

#[tokio::test]
async fn rotated_key_is_picked_up_by_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(&[&K1])))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_jwks(&server, &[&K1, &K2], 1).await;

    let settings = KeySetSettings {
        min_refresh_interval: Duration::ZERO,
        ..settings()
    };
    let verifier = verifier_for(&server, settings);

    let token = K2.sign(&json!({"sub": "rotated", "exp": future_exp()}));
    let claims = verifier.verify(&token).await.unwrap();
    assert_eq!(claims.subject(), Some("rotated"));
}

#[tokio::test]
async fn unknown_kid_refreshes_at_most_once_per_call() {
    let server = MockServer::start().await;
    mount_jwks(&server, &[&K1], 2).await;

    let settings = KeySetSettings {
        min_refresh_interval: Duration::ZERO,
        ..settings()
    };
    let token = K1.sign_with(Algorithm::RS256, Some("forged"), &json!({}));
    let err = verifier_for(&server, settings).verify(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::UnknownSigningKey));
}

#[tokio::test]
async fn key_set_http_500_is_unavailable() {
    let server = MockServer::start().await;
    // One direct fetch, then one fetch plus the single retry from verify.
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let provider = provider_for(&server, settings());
    let err = provider.get_keys().await.unwrap_err();
    assert!(matches!(err, AuthError::KeySetUnavailable(_)));

    let verifier = TokenVerifier::new(provider, VerifierConfig::default());
    let token = K1.sign(&json!({"exp": future_exp()}));
    let err = verifier.verify(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::AuthServiceUnavailable));
}

#[tokio::test]
async fn transient_key_set_failure_is_retried_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_jwks(&server, &[&K1], 1).await;

    let token = K1.sign(&json!({"sub": "u1", "exp": future_exp()}));
    let claims = verifier_for(&server, settings()).verify(&token).await.unwrap();
    assert_eq!(claims.subject(), Some("u1"));
}

#[tokio::test]
async fn outage_fetches_are_shared_by_concurrent_callers() {
    let server = MockServer::start().await;
    // One shared fetch, then one shared retry.
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let verifier = Arc::new(verifier_for(&server, settings()));
    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let verifier = Arc::clone(&verifier);
        let token = K1.sign(&json!({"exp": future_exp()}));
        tasks.spawn(async move { verifier.verify(&token).await });
    }

    while let Some(result) = tasks.join_next().await {
        let err = result.unwrap().unwrap_err();
        assert!(matches!(err, AuthError::AuthServiceUnavailable));
    }
}

#[tokio::test]
async fn hung_endpoint_bounds_wait_for_concurrent_callers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(jwks_body(&[&K1]))
                .set_delay(Duration::from_secs(5)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let settings = KeySetSettings {
        fetch_timeout: Duration::from_millis(300),
        ..settings()
    };
    let verifier = Arc::new(verifier_for(&server, settings));
    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let verifier = Arc::clone(&verifier);
        let token = K1.sign(&json!({"exp": future_exp()}));
        tasks.spawn(async move {
            let started = std::time::Instant::now();
            let result = verifier.verify(&token).await;
            (result, started.elapsed())
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (result, elapsed) = joined.unwrap();
        assert!(matches!(result, Err(AuthError::AuthServiceUnavailable)));
        // Fetch plus retry, each capped at 300ms.
        assert!(elapsed < Duration::from_millis(1500), "waited {elapsed:?}");
    }
}

#[tokio::test]
async fn invalid_jwks_body_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = provider_for(&server, settings()).get_keys().await.unwrap_err();
    assert!(matches!(err, AuthError::KeySetUnavailable(_)));
}

#[tokio::test]
async fn slow_key_set_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(jwks_body(&[&K1]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let settings = KeySetSettings {
        fetch_timeout: Duration::from_millis(200),
        ..settings()
    };
    let started = std::time::Instant::now();
    let err = provider_for(&server, settings).get_keys().await.unwrap_err();
    assert!(matches!(err, AuthError::KeySetUnavailable(_)));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn concurrent_misses_share_one_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(jwks_body(&[&K1]))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let verifier = Arc::new(verifier_for(&server, settings()));
    let mut tasks = JoinSet::new();
    for i in 0..32 {
        let verifier = Arc::clone(&verifier);
        let token = K1.sign(&json!({"sub": format!("user-{i}"), "exp": future_exp()}));
        tasks.spawn(async move { verifier.verify(&token).await });
    }

    let mut verified = 0;
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
        verified += 1;
    }
    assert_eq!(verified, 32);
}

#[tokio::test]
async fn expired_cache_is_refetched_once_for_concurrent_callers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(jwks_body(&[&K1]))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let settings = KeySetSettings {
        cache_ttl: Duration::from_millis(300),
        ..settings()
    };
    let provider = provider_for(&server, settings);
    provider.get_keys().await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!provider.is_cached().await);

    let verifier = Arc::new(TokenVerifier::new(provider, VerifierConfig::default()));
    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let verifier = Arc::clone(&verifier);
        let token = K1.sign(&json!({"exp": future_exp()}));
        tasks.spawn(async move { verifier.verify(&token).await });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }
}

#[tokio::test]
async fn readers_keep_old_snapshot_across_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(&[&K1])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_jwks(&server, &[&K2], 1).await;

    let provider = provider_for(&server, settings());
    let old = provider.get_keys().await.unwrap();
    provider.refresh().await.unwrap();
    let new = provider.get_keys().await.unwrap();

    assert!(old.get("k1").is_some());
    assert!(old.get("k2").is_none());
    assert!(new.get("k2").is_some());
    assert!(new.get("k1").is_none());
}
