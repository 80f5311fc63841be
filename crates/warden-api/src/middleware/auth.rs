//! Bearer-token authentication middleware
//!
//! Extracts the JWT from the `Authorization: Bearer <token>` header,
//! validates signature and expiration, and injects the authenticated
//! principal into request extensions. The principal becomes the actor the
//! resolver hands to the credential vault.

use std::sync::Arc;

use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::models::ErrorResponse;
use warden_proto::{Actor, ActorType};

/// JWT claims the broker cares about
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the principal's id
    pub sub: String,
    /// Expiration (unix seconds)
    pub exp: i64,
    /// Display name, when the issuer provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Authenticated principal extracted from the token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: String,
    pub name: Option<String>,
}

impl AuthUser {
    pub fn to_actor(&self) -> Actor {
        Actor {
            id: self.user_id.clone(),
            actor_type: ActorType::User,
            name: self.name.clone().unwrap_or_else(|| self.user_id.clone()),
        }
    }
}

/// Shared JWT validation state
pub struct JwtState {
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtState {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    fn validate(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding, &self.validation).map(|data| data.claims)
    }
}

fn unauthorized(message: &str, code: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: message.to_string(),
            code: Some(code.to_string()),
        }),
    )
}

/// Reject requests without a valid bearer token.
pub async fn require_auth(
    state: axum::extract::State<Arc<JwtState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| unauthorized("Missing Authorization header", "MISSING_AUTH"))?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        unauthorized(
            "Invalid Authorization header format. Expected 'Bearer <token>'",
            "INVALID_AUTH_FORMAT",
        )
    })?;

    let claims = state.validate(token).map_err(|e| {
        unauthorized(&format!("Invalid or expired token: {e}"), "INVALID_TOKEN")
    })?;

    request.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
        name: claims.name,
    });

    Ok(next.run(request).await)
}
