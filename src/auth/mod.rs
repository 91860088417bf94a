// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Verifies identity-provider JWTs for the gateway's routes.
//!
//! ## Auth Flow
//!
//! 1. Client signs in with the identity provider and receives a JWT
//! 2. Client sends `Authorization: Bearer <JWT>`
//! 3. Gateway:
//!    - Reads `kid` from the unverified header
//!    - Resolves the key from the cached provider JWKS (fetching on miss)
//!    - Verifies the signature with the key's own algorithm
//!    - Checks `exp` and, when configured, issuer and audience
//!    - Hands the claims (`sub`, `email`, ...) to the handler
//!
//! ## Security
//!
//! - Authentication only, no role or permission checks
//! - JWKS is cached with TTL; concurrent misses share a single fetch
//! - Credential failures map to 401, an unreachable key set to 503

pub mod claims;
pub mod error;
pub mod extractor;
pub mod keys;
pub mod middleware;
pub mod verifier;

pub use claims::Claims;
pub use error::AuthError;
pub use extractor::{Auth, OptionalAuth};
pub use keys::{KeySetProvider, KeySetSettings, KeySetSnapshot, SigningKey};
pub use verifier::{TokenVerifier, VerifierConfig};
