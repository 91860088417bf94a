// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User endpoints.

use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{extractor::bearer_token, Auth, Claims};
use crate::error::ApiError;
use crate::state::AppState;

/// Response for GET /me
#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    /// Verified token claims (`sub`, `email`, `exp`, ...)
    #[schema(value_type = Object)]
    pub user: Claims,
}

/// Response for GET /protected
#[derive(Debug, Serialize, ToSchema)]
pub struct GreetingResponse {
    pub message: String,
}

/// Get the claims of the currently authenticated user.
#[utoipa::path(
    get,
    path = "/me",
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Verified claims", body = MeResponse),
        (status = 401, description = "Unauthorized - invalid or missing token"),
        (status = 503, description = "Signing keys could not be fetched"),
    )
)]
pub async fn me(Auth(claims): Auth) -> Json<MeResponse> {
    Json(MeResponse { user: claims })
}

/// Greet the authenticated user by email (or subject when no email claim).
#[utoipa::path(
    get,
    path = "/protected",
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Greeting", body = GreetingResponse),
        (status = 401, description = "Unauthorized - invalid or missing token"),
    )
)]
pub async fn protected(Auth(claims): Auth) -> Json<GreetingResponse> {
    let who = claims.display_identity().unwrap_or("unknown user");
    Json(GreetingResponse {
        message: format!("Hello {who}, you're authenticated!"),
    })
}

/// Fetch the caller's account record from the identity provider.
#[utoipa::path(
    get,
    path = "/user",
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Provider user record"),
        (status = 401, description = "Unauthorized - invalid or missing token"),
        (status = 502, description = "Identity provider error"),
        (status = 503, description = "User lookup is not configured"),
    )
)]
pub async fn current_user(
    State(state): State<AppState>,
    Auth(claims): Auth,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, Response> {
    let provider = state.provider.as_ref().ok_or_else(|| {
        ApiError::service_unavailable("User lookup is not configured").into_response()
    })?;
    let token = bearer_token(&headers).map_err(IntoResponse::into_response)?;

    tracing::debug!(target: "gateway.api", sub = claims.subject().unwrap_or("-"), "Forwarding user lookup");

    provider
        .current_user(token)
        .await
        .map(Json)
        .map_err(IntoResponse::into_response)
}
