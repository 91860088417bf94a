// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! Every way a request can fail authentication is one variant here. The
//! `Display` text may carry upstream detail for logs; the HTTP body only
//! ever carries [`AuthError::public_message`] and [`AuthError::error_code`].

use axum::{
    http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Authentication error type.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No authorization header present
    #[error("authorization header is required")]
    MissingAuthHeader,
    /// Header present but not `Bearer <token>`
    #[error("invalid authorization header format")]
    InvalidAuthHeader,
    /// Header or payload could not be decoded, or the header has no `kid`
    #[error("token is malformed")]
    MalformedToken,
    /// Key set endpoint unreachable, timed out, non-2xx or unparseable
    #[error("key set unavailable: {0}")]
    KeySetUnavailable(String),
    /// The verifier could not obtain a key set, even after retrying
    #[error("authentication service unavailable")]
    AuthServiceUnavailable,
    /// Token `kid` not present in the current key set
    #[error("unknown signing key")]
    UnknownSigningKey,
    /// Signature mismatch or algorithm not permitted for the matched key
    #[error("token signature is invalid")]
    InvalidSignature,
    /// `exp` is at or before the current time
    #[error("token has expired")]
    TokenExpired,
    /// Issuer, audience or not-before check failed
    #[error("token claims rejected: {0}")]
    ClaimPolicyViolation(&'static str),
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: &'static str,
    error_code: &'static str,
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "missing_auth_header",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::MalformedToken => "malformed_token",
            AuthError::KeySetUnavailable(_) => "key_set_unavailable",
            AuthError::AuthServiceUnavailable => "auth_service_unavailable",
            AuthError::UnknownSigningKey => "unknown_signing_key",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::TokenExpired => "token_expired",
            AuthError::ClaimPolicyViolation(_) => "claim_policy_violation",
        }
    }

    /// Client-facing message. Never includes upstream or library error text.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "Authorization header is required",
            AuthError::InvalidAuthHeader => {
                "Invalid authorization header format (expected 'Bearer <token>')"
            }
            AuthError::KeySetUnavailable(_) | AuthError::AuthServiceUnavailable => {
                "Authentication service is temporarily unavailable"
            }
            AuthError::TokenExpired => "Token has expired",
            AuthError::MalformedToken
            | AuthError::UnknownSigningKey
            | AuthError::InvalidSignature
            | AuthError::ClaimPolicyViolation(_) => "Invalid token",
        }
    }

    /// Whether the failure is an upstream dependency problem rather than a
    /// bad credential.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            AuthError::KeySetUnavailable(_) | AuthError::AuthServiceUnavailable
        )
    }

    /// Get the HTTP status code for this error.
    ///
    /// Credential failures are 401; "could not check" is 503.
    pub fn status_code(&self) -> StatusCode {
        if self.is_upstream() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::UNAUTHORIZED
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: self.public_message(),
            error_code: self.error_code(),
        });
        let mut response = (status, body).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
