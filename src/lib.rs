// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Auth Gateway - Bearer Token Verification Service
//!
//! Sits in front of application routes, verifies identity-provider issued
//! JWTs against the provider's rotating key set and hands the verified
//! claims to handlers.
//!
//! ## Modules
//!
//! - `api` - HTTP routes (Axum)
//! - `auth` - Key set cache, token verifier, extractors and middleware
//! - `config` - Environment configuration
//! - `provider` - Identity provider user-lookup pass-through

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod provider;
pub mod state;
