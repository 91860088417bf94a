// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity provider pass-through.
//!
//! Only the "current user" lookup is forwarded. The gateway does not sign
//! users up or issue tokens; clients talk to the provider for that.

use std::time::Duration;

use tracing::instrument;
use url::Url;

use crate::error::ApiError;

/// Path of the provider's user-lookup endpoint, relative to the base URL.
pub const USER_PATH: &str = "/auth/v1/user";

/// Client for the identity provider's account API.
pub struct ProviderClient {
    user_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl ProviderClient {
    pub fn new(base_url: &Url, api_key: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "gateway.provider", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            user_url: format!("{}{USER_PATH}", base_url.as_str().trim_end_matches('/')),
            api_key: api_key.into(),
            client,
        }
    }

    pub fn user_url(&self) -> &str {
        &self.user_url
    }

    /// Fetch the provider's record for the user owning `token`.
    #[instrument(skip_all)]
    pub async fn current_user(&self, token: &str) -> Result<serde_json::Value, ApiError> {
        let response = self
            .client
            .get(&self.user_url)
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "gateway.provider", error = %e, "User lookup request failed");
                ApiError::bad_gateway("Identity provider unavailable")
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            tracing::debug!(target: "gateway.provider", %status, "Provider rejected token");
            return Err(ApiError::unauthorized("Invalid token"));
        }
        if !status.is_success() {
            tracing::error!(target: "gateway.provider", %status, "User lookup returned error");
            return Err(ApiError::bad_gateway("Identity provider error"));
        }

        response.json().await.map_err(|e| {
            tracing::error!(target: "gateway.provider", error = %e, "Failed to parse user lookup response");
            ApiError::bad_gateway("Identity provider error")
        })
    }
}
