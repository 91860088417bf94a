// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer token verification.
//!
//! # Security
//!
//! - Tokens are size-checked before parsing
//! - The verification algorithm comes from the matched key, never from the
//!   token header; a header that disagrees with its key is rejected
//! - `exp` is optional but, when present, enforced as `now >= exp + leeway`
//! - Issuer and audience checks are opt-in (both off by default)
//! - Rejection reasons are logged, never returned to the client

use std::sync::Arc;

use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use tracing::instrument;

use super::keys::{KeySetProvider, KeySetSnapshot, SigningKey};
use super::{AuthError, Claims};

/// Tokens above this size are rejected before any decoding.
pub const MAX_TOKEN_SIZE_BYTES: usize = 8192;

/// Claim policy for [`TokenVerifier`].
///
/// The default enforces neither issuer nor audience and applies no clock
/// skew leeway, so a token is valid up to (but excluding) its `exp` second.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifierConfig {
    /// Reject tokens whose `iss` differs from `expected_issuer`
    pub verify_issuer: bool,
    pub expected_issuer: Option<String>,
    /// Reject tokens whose `aud` does not contain `expected_audience`
    pub verify_audience: bool,
    pub expected_audience: Option<String>,
    /// Clock skew tolerance in seconds, applied to `exp` and `nbf`
    pub leeway_secs: u64,
}

/// Verifies bearer tokens against keys from a [`KeySetProvider`].
pub struct TokenVerifier {
    keys: Arc<KeySetProvider>,
    config: VerifierConfig,
}

impl TokenVerifier {
    pub fn new(keys: Arc<KeySetProvider>, config: VerifierConfig) -> Self {
        Self { keys, config }
    }

    pub fn keys(&self) -> &Arc<KeySetProvider> {
        &self.keys
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Authenticate a token end to end and return its claims.
    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let result = self.verify_token(token).await;

        match &result {
            Ok(claims) => {
                tracing::debug!(target: "gateway.auth.verifier", sub = claims.subject().unwrap_or("-"), "Token verified");
            }
            Err(e) if e.is_upstream() => {
                tracing::warn!(target: "gateway.auth.verifier", reason = e.error_code(), "Token could not be checked");
            }
            Err(e) => {
                tracing::debug!(target: "gateway.auth.verifier", reason = e.error_code(), "Token rejected");
            }
        }

        result
    }

    async fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        // Header
        if token.len() > MAX_TOKEN_SIZE_BYTES {
            return Err(AuthError::MalformedToken);
        }
        let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;
        let kid = header
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or(AuthError::MalformedToken)?;

        // Key
        let snapshot = self.load_keys().await?;
        let key = self.resolve_key(&snapshot, kid).await?;

        // Signature
        if header.alg != key.algorithm() {
            tracing::debug!(
                target: "gateway.auth.verifier",
                kid,
                token_alg = ?header.alg,
                key_alg = ?key.algorithm(),
                "Token algorithm does not match its key"
            );
            return Err(AuthError::InvalidSignature);
        }
        let validation = self.validation_for(key.algorithm())?;
        let claims = decode::<Claims>(token, key.decoding_key(), &validation)
            .map_err(map_jwt_error)?
            .claims;

        // Claims
        if let Some(exp) = claims.expires_at()? {
            let now = chrono::Utc::now().timestamp();
            let leeway = i64::try_from(self.config.leeway_secs).unwrap_or(i64::MAX);
            if now >= exp.saturating_add(leeway) {
                return Err(AuthError::TokenExpired);
            }
        }

        Ok(claims)
    }

    /// Get the key set, retrying once if the provider is unavailable.
    ///
    /// Callers that fail together also share the retry fetch.
    async fn load_keys(&self) -> Result<Arc<KeySetSnapshot>, AuthError> {
        match self.keys.get_keys().await {
            Ok(snapshot) => Ok(snapshot),
            Err(first) => {
                tracing::warn!(target: "gateway.auth.verifier", error = %first, "Key set fetch failed, retrying once");
                self.keys.get_keys().await.map_err(|e| {
                    tracing::error!(target: "gateway.auth.verifier", error = %e, "Key set unavailable after retry");
                    AuthError::AuthServiceUnavailable
                })
            }
        }
    }

    /// Find `kid`, allowing one forced refresh to pick up a rotated key.
    async fn resolve_key(
        &self,
        snapshot: &KeySetSnapshot,
        kid: &str,
    ) -> Result<SigningKey, AuthError> {
        if let Some(key) = snapshot.get(kid) {
            return Ok(key.clone());
        }

        tracing::debug!(target: "gateway.auth.verifier", kid, "Key not in cached set, refreshing");

        match self.keys.refresh_after(snapshot).await {
            Ok(refreshed) => refreshed
                .get(kid)
                .cloned()
                .ok_or(AuthError::UnknownSigningKey),
            Err(e) => {
                tracing::warn!(target: "gateway.auth.verifier", kid, error = %e, "Key set refresh failed");
                Err(AuthError::UnknownSigningKey)
            }
        }
    }

    fn validation_for(&self, algorithm: Algorithm) -> Result<Validation, AuthError> {
        let mut validation = Validation::new(algorithm);
        validation.leeway = self.config.leeway_secs;
        // `exp` is optional and checked after decoding.
        validation.validate_exp = false;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        if self.config.verify_issuer {
            let issuer = self
                .config
                .expected_issuer
                .as_deref()
                .ok_or(AuthError::ClaimPolicyViolation("issuer"))?;
            validation.set_issuer(&[issuer]);
            validation.required_spec_claims.insert("iss".to_string());
        }

        if self.config.verify_audience {
            let audience = self
                .config
                .expected_audience
                .as_deref()
                .ok_or(AuthError::ClaimPolicyViolation("audience"))?;
            validation.set_audience(&[audience]);
            validation.validate_aud = true;
            validation.required_spec_claims.insert("aud".to_string());
        }

        Ok(validation)
    }
}

fn map_jwt_error(e: JwtError) -> AuthError {
    match e.kind() {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::InvalidEcdsaKey => AuthError::InvalidSignature,
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::InvalidIssuer => AuthError::ClaimPolicyViolation("issuer"),
        ErrorKind::InvalidAudience => AuthError::ClaimPolicyViolation("audience"),
        ErrorKind::ImmatureSignature => AuthError::ClaimPolicyViolation("not yet valid"),
        ErrorKind::MissingRequiredClaim(claim) => match claim.as_str() {
            "iss" => AuthError::ClaimPolicyViolation("issuer"),
            "aud" => AuthError::ClaimPolicyViolation("audience"),
            _ => AuthError::ClaimPolicyViolation("required claim missing"),
        },
        _ => AuthError::MalformedToken,
    }
}
