// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Verified token claims.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::AuthError;

/// Claims from a verified token.
///
/// Holds the full decoded payload, so providers can add custom claims
/// (`role`, `app_metadata`, ...) without this type changing. Only produced
/// by [`TokenVerifier`](super::TokenVerifier) after the signature and
/// claim checks pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    /// Look up any claim by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Subject (`sub`), the provider's user id.
    pub fn subject(&self) -> Option<&str> {
        self.get_str("sub")
    }

    pub fn email(&self) -> Option<&str> {
        self.get_str("email")
    }

    pub fn issuer(&self) -> Option<&str> {
        self.get_str("iss")
    }

    /// Expiry (`exp`) as Unix seconds, `None` when the claim is absent.
    ///
    /// A present but non-numeric `exp` makes the token malformed.
    pub fn expires_at(&self) -> Result<Option<i64>, AuthError> {
        match self.0.get("exp") {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.floor() as i64))
                .map(Some)
                .ok_or(AuthError::MalformedToken),
            Some(_) => Err(AuthError::MalformedToken),
        }
    }

    /// Best available human-readable identity: email, falling back to subject.
    pub fn display_identity(&self) -> Option<&str> {
        self.email().or_else(|| self.subject())
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
