// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared helpers: RSA fixture keys, token signing and a mocked provider.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use auth_gateway::auth::{KeySetProvider, KeySetSettings, TokenVerifier, VerifierConfig};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const JWKS_PATH: &str = "/auth/v1/keys";

/// Test keypair backed by a PEM fixture.
pub struct TestKey {
    pub kid: &'static str,
    pem: &'static str,
    jwk: &'static str,
}

pub const K1: TestKey = TestKey {
    kid: "k1",
    pem: include_str!("../fixtures/rsa_k1.pem"),
    jwk: include_str!("../fixtures/rsa_k1.jwk.json"),
};

pub const K2: TestKey = TestKey {
    kid: "k2",
    pem: include_str!("../fixtures/rsa_k2.pem"),
    jwk: include_str!("../fixtures/rsa_k2.jwk.json"),
};

impl TestKey {
    pub fn jwk_json(&self) -> Value {
        serde_json::from_str(self.jwk).expect("fixture JWK is valid JSON")
    }

    /// Sign `payload` as RS256 with this key's own `kid`.
    pub fn sign(&self, payload: &Value) -> String {
        self.sign_with(Algorithm::RS256, Some(self.kid), payload)
    }

    pub fn sign_with(&self, alg: Algorithm, kid: Option<&str>, payload: &Value) -> String {
        let mut header = Header::new(alg);
        header.typ = Some("JWT".to_string());
        header.kid = kid.map(str::to_string);
        let key = EncodingKey::from_rsa_pem(self.pem.as_bytes()).expect("fixture PEM is valid");
        encode(&header, payload, &key).expect("Failed to sign token")
    }
}

pub fn jwks_body(keys: &[&TestKey]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk_json()).collect::<Vec<_>>() })
}

pub fn future_exp() -> i64 {
    chrono::Utc::now().timestamp() + 3600
}

pub fn past_exp() -> i64 {
    chrono::Utc::now().timestamp() - 3600
}

/// Mount a JWKS endpoint serving `keys`, expecting exactly `calls` fetches.
pub async fn mount_jwks(server: &MockServer, keys: &[&TestKey], calls: u64) {
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(keys)))
        .expect(calls)
        .mount(server)
        .await;
}

pub fn settings() -> KeySetSettings {
    KeySetSettings {
        fetch_timeout: Duration::from_secs(2),
        ..KeySetSettings::default()
    }
}

pub fn provider_for(server: &MockServer, settings: KeySetSettings) -> Arc<KeySetProvider> {
    Arc::new(KeySetProvider::new(format!("{}{JWKS_PATH}", server.uri()), settings))
}

pub fn verifier_for(server: &MockServer, settings: KeySetSettings) -> TokenVerifier {
    TokenVerifier::new(provider_for(server, settings), VerifierConfig::default())
}
