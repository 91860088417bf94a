// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::provider::ProviderClient;

#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<TokenVerifier>,
    /// Present only when a provider API key is configured.
    pub provider: Option<Arc<ProviderClient>>,
}

impl AppState {
    pub fn new(verifier: TokenVerifier) -> Self {
        Self {
            verifier: Arc::new(verifier),
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: ProviderClient) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }
}
