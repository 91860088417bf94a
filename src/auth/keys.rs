// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! ## Cache model
//!
//! - The key set lives in an immutable [`KeySetSnapshot`] behind an `Arc`.
//!   A refresh builds a new snapshot and swaps the pointer; readers holding
//!   the old one are unaffected.
//! - The snapshot lock is only held to read or swap the pointer, never
//!   across network I/O.
//! - Cache misses are coalesced: one task fetches while the others wait on
//!   the refresh lock and then take that attempt's outcome, success or
//!   failure, instead of fetching again.
//! - Each fetch is bounded by the HTTP client timeout, so a caller waits for
//!   at most the attempt in flight plus its own.
//!
//! ## Key filtering
//!
//! Entries without a `kid`, encryption keys, symmetric keys, keys whose
//! algorithm is outside the allow-list and keys with unusable material are
//! skipped with a warning. They are never fatal for the whole set.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

use super::error::AuthError;

/// Default JWKS cache TTL (5 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default timeout for a single key set fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum age of a snapshot before a forced refresh may replace it.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Tunables for [`KeySetProvider`].
#[derive(Debug, Clone)]
pub struct KeySetSettings {
    /// How long a fetched snapshot is served without refetching
    pub cache_ttl: Duration,
    /// Upper bound on one fetch, connect through body
    pub fetch_timeout: Duration,
    /// Forced refreshes are skipped while the snapshot is younger than this
    pub min_refresh_interval: Duration,
    /// Algorithms a key may declare to be admitted into a snapshot
    pub allowed_algorithms: Vec<Algorithm>,
}

impl Default for KeySetSettings {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            allowed_algorithms: vec![Algorithm::RS256],
        }
    }
}

/// One verification key from the remote key set.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    algorithm: Algorithm,
    key: DecodingKey,
}

impl SigningKey {
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The only algorithm this key may be used with.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    /// Build a signing key from a JWK, enforcing the algorithm allow-list.
    pub fn from_jwk(jwk: &Jwk, allowed: &[Algorithm]) -> Result<Self, String> {
        let kid = jwk
            .common
            .key_id
            .clone()
            .ok_or_else(|| "key has no kid".to_string())?;

        if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
            return Err(format!("key {kid} is an encryption key"));
        }

        let algorithm = declared_algorithm(jwk)
            .ok_or_else(|| format!("key {kid} has an unsupported type or algorithm"))?;

        if !allowed.contains(&algorithm) {
            return Err(format!("key {kid} declares {algorithm:?}, which is not allowed"));
        }

        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| format!("key {kid} has unusable material: {e}"))?;

        Ok(Self { kid, algorithm, key })
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Algorithm a JWK is bound to: its `alg` if present, otherwise the
/// default for its key type. Symmetric keys never qualify.
fn declared_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    if let AlgorithmParameters::OctetKey(_) = jwk.algorithm {
        return None;
    }

    if let Some(alg) = jwk.common.key_algorithm {
        return match alg {
            KeyAlgorithm::RS256 => Some(Algorithm::RS256),
            KeyAlgorithm::RS384 => Some(Algorithm::RS384),
            KeyAlgorithm::RS512 => Some(Algorithm::RS512),
            KeyAlgorithm::PS256 => Some(Algorithm::PS256),
            KeyAlgorithm::PS384 => Some(Algorithm::PS384),
            KeyAlgorithm::PS512 => Some(Algorithm::PS512),
            KeyAlgorithm::ES256 => Some(Algorithm::ES256),
            KeyAlgorithm::ES384 => Some(Algorithm::ES384),
            KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
            _ => None,
        };
    }

    match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => Some(Algorithm::RS256),
        AlgorithmParameters::EllipticCurve(ec) => match ec.curve {
            EllipticCurve::P256 => Some(Algorithm::ES256),
            EllipticCurve::P384 => Some(Algorithm::ES384),
            _ => None,
        },
        AlgorithmParameters::OctetKeyPair(_) => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// Immutable view of the key set at one point in time.
#[derive(Debug)]
pub struct KeySetSnapshot {
    keys: HashMap<String, SigningKey>,
    fetched_at: Instant,
}

impl KeySetSnapshot {
    /// Build a snapshot from raw JWKS entries, skipping unusable keys.
    pub fn from_entries(entries: Vec<serde_json::Value>, allowed: &[Algorithm]) -> Self {
        let mut keys = HashMap::with_capacity(entries.len());

        for entry in entries {
            let jwk: Jwk = match serde_json::from_value(entry) {
                Ok(jwk) => jwk,
                Err(e) => {
                    tracing::warn!(target: "gateway.auth.keys", error = %e, "Skipping unparseable JWK");
                    continue;
                }
            };

            match SigningKey::from_jwk(&jwk, allowed) {
                Ok(key) => {
                    if keys.insert(key.kid.clone(), key).is_some() {
                        tracing::warn!(target: "gateway.auth.keys", "Duplicate kid in key set, keeping the last entry");
                    }
                }
                Err(reason) => {
                    tracing::warn!(target: "gateway.auth.keys", %reason, "Skipping JWK");
                }
            }
        }

        Self::from_keys(keys.into_values())
    }

    /// Build a snapshot from already-constructed keys.
    pub fn from_keys(keys: impl IntoIterator<Item = SigningKey>) -> Self {
        Self {
            keys: keys.into_iter().map(|k| (k.kid.clone(), k)).collect(),
            fetched_at: Instant::now(),
        }
    }

    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// JWKS document as served by the provider.
#[derive(Deserialize)]
struct JwksDocument {
    keys: Vec<serde_json::Value>,
}

/// Outcome of the most recent fetch attempt, guarded by the refresh lock.
#[derive(Default)]
struct LastFetch {
    failure: Option<String>,
}

enum KeySource {
    Remote { url: String, client: reqwest::Client },
    Static,
}

/// Supplies the current signing keys, fetching and caching them from the
/// identity provider's JWKS endpoint.
pub struct KeySetProvider {
    source: KeySource,
    settings: KeySetSettings,
    current: RwLock<Option<Arc<KeySetSnapshot>>>,
    /// Serializes fetches so concurrent misses share one request.
    refresh_lock: Mutex<LastFetch>,
    /// Bumped after every completed fetch attempt.
    fetch_attempts: AtomicU64,
}

impl KeySetProvider {
    /// Create a provider backed by a remote JWKS endpoint.
    ///
    /// # Arguments
    /// - `jwks_url`: full key set URL, e.g. `https://<project>.supabase.co/auth/v1/keys`
    pub fn new(jwks_url: impl Into<String>, settings: KeySetSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(settings.fetch_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "gateway.auth.keys", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            source: KeySource::Remote {
                url: jwks_url.into(),
                client,
            },
            settings,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(LastFetch::default()),
            fetch_attempts: AtomicU64::new(0),
        }
    }

    /// Create a provider that always serves the given keys and never fetches.
    pub fn with_snapshot(snapshot: KeySetSnapshot) -> Self {
        Self {
            source: KeySource::Static,
            settings: KeySetSettings::default(),
            current: RwLock::new(Some(Arc::new(snapshot))),
            refresh_lock: Mutex::new(LastFetch::default()),
            fetch_attempts: AtomicU64::new(0),
        }
    }

    /// Get the JWKS URL, if this provider fetches remotely.
    pub fn jwks_url(&self) -> Option<&str> {
        match &self.source {
            KeySource::Remote { url, .. } => Some(url),
            KeySource::Static => None,
        }
    }

    pub fn settings(&self) -> &KeySetSettings {
        &self.settings
    }

    /// Return the cached snapshot if fresh, otherwise fetch a new one.
    #[instrument(skip_all)]
    pub async fn get_keys(&self) -> Result<Arc<KeySetSnapshot>, AuthError> {
        if let Some(snapshot) = self.fresh_snapshot().await {
            return Ok(snapshot);
        }

        let seen = self.fetch_attempts.load(Ordering::Acquire);
        let mut last = self.refresh_lock.lock().await;

        // Another task may have refreshed while we waited for the lock.
        if let Some(snapshot) = self.fresh_snapshot().await {
            tracing::debug!(target: "gateway.auth.keys", "Key set refreshed by concurrent request");
            return Ok(snapshot);
        }
        if let Some(outcome) = self.attempt_since(seen, &last).await {
            return outcome;
        }

        self.fetch_and_install(&mut last).await
    }

    /// Force a refresh because `seen` did not contain a requested key.
    ///
    /// Returns without fetching when the installed snapshot is newer than
    /// `seen` or younger than the minimum refresh interval.
    #[instrument(skip_all)]
    pub async fn refresh_after(
        &self,
        seen: &KeySetSnapshot,
    ) -> Result<Arc<KeySetSnapshot>, AuthError> {
        let seen_attempt = self.fetch_attempts.load(Ordering::Acquire);
        let mut last = self.refresh_lock.lock().await;

        if let Some(outcome) = self.attempt_since(seen_attempt, &last).await {
            return outcome;
        }

        if let Some(current) = self.current.read().await.clone() {
            let static_source = matches!(self.source, KeySource::Static);
            if static_source
                || current.fetched_at() > seen.fetched_at()
                || current.age() < self.settings.min_refresh_interval
            {
                return Ok(current);
            }
        }

        self.fetch_and_install(&mut last).await
    }

    /// Force refresh the JWKS cache.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        if matches!(self.source, KeySource::Static) {
            return Ok(());
        }
        let mut last = self.refresh_lock.lock().await;
        self.fetch_and_install(&mut last).await.map(|_| ())
    }

    /// Check if JWKS is currently cached and valid.
    pub async fn is_cached(&self) -> bool {
        self.fresh_snapshot().await.is_some()
    }

    async fn fresh_snapshot(&self) -> Option<Arc<KeySetSnapshot>> {
        let current = self.current.read().await;
        current
            .as_ref()
            .filter(|snapshot| self.is_fresh(snapshot))
            .cloned()
    }

    fn is_fresh(&self, snapshot: &KeySetSnapshot) -> bool {
        match self.source {
            KeySource::Static => true,
            KeySource::Remote { .. } => snapshot.age() < self.settings.cache_ttl,
        }
    }

    /// Outcome of a fetch attempt that completed after `seen` was read.
    async fn attempt_since(
        &self,
        seen: u64,
        last: &LastFetch,
    ) -> Option<Result<Arc<KeySetSnapshot>, AuthError>> {
        if self.fetch_attempts.load(Ordering::Acquire) == seen {
            return None;
        }

        match &last.failure {
            Some(reason) => {
                tracing::debug!(target: "gateway.auth.keys", "Sharing failed fetch from concurrent request");
                Some(Err(AuthError::KeySetUnavailable(reason.clone())))
            }
            None => self.current.read().await.clone().map(Ok),
        }
    }

    /// Fetch, parse and swap in a new snapshot, recording the outcome in
    /// `last`. Caller holds `refresh_lock`.
    async fn fetch_and_install(
        &self,
        last: &mut LastFetch,
    ) -> Result<Arc<KeySetSnapshot>, AuthError> {
        let fetched = self.fetch_jwks().await;
        last.failure = fetched.as_ref().err().map(|e| match e {
            AuthError::KeySetUnavailable(reason) => reason.clone(),
            other => other.to_string(),
        });
        self.fetch_attempts.fetch_add(1, Ordering::Release);
        let entries = fetched?;
        let snapshot = Arc::new(KeySetSnapshot::from_entries(
            entries,
            &self.settings.allowed_algorithms,
        ));

        tracing::info!(
            target: "gateway.auth.keys",
            key_count = snapshot.len(),
            "JWKS cache refreshed"
        );

        *self.current.write().await = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Fetch JWKS from the endpoint.
    async fn fetch_jwks(&self) -> Result<Vec<serde_json::Value>, AuthError> {
        let KeySource::Remote { url, client } = &self.source else {
            return Err(AuthError::KeySetUnavailable(
                "static key set cannot be fetched".to_string(),
            ));
        };

        tracing::debug!(target: "gateway.auth.keys", %url, "Fetching JWKS");

        let response = client.get(url).send().await.map_err(|e| {
            let reason = if e.is_timeout() { "timed out" } else { "request failed" };
            tracing::error!(target: "gateway.auth.keys", error = %e, reason, "Failed to fetch JWKS");
            AuthError::KeySetUnavailable(format!("{reason}: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(target: "gateway.auth.keys", %status, "JWKS endpoint returned error");
            return Err(AuthError::KeySetUnavailable(format!(
                "HTTP {status} from JWKS endpoint"
            )));
        }

        let document: JwksDocument = response.json().await.map_err(|e| {
            tracing::error!(target: "gateway.auth.keys", error = %e, "Failed to parse JWKS response");
            AuthError::KeySetUnavailable(format!("invalid JWKS body: {e}"))
        })?;

        Ok(document.keys)
    }
}
