use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;

/// Caller identity extracted from Basic auth. Authorization policy beyond
/// "may this caller act on this exhibition" lives outside the core; the
/// operator flag only gates admin overrides.
#[derive(Debug, Clone)]
pub struct RequestActor {
    pub username: String,
    pub is_operator: bool,
}

impl RequestActor {
    pub fn require_operator(&self) -> Result<(), crate::error::CoreError> {
        if self.is_operator {
            Ok(())
        } else {
            Err(crate::error::CoreError::Auth(
                "operator privileges required".to_string(),
            ))
        }
    }
}

impl FromRequestParts<Arc<crate::AppState>> for RequestActor {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let encoded = auth_header
            .strip_prefix("Basic ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| StatusCode::UNAUTHORIZED)?;
        let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

        let mut parts_iter = credentials.splitn(2, ':');
        let username = parts_iter.next().ok_or(StatusCode::UNAUTHORIZED)?;
        let password = parts_iter.next().ok_or(StatusCode::UNAUTHORIZED)?;
        if username.is_empty() {
            return Err(StatusCode::UNAUTHORIZED);
        }

        let admin = &state.config.admin;
        let is_operator = username == admin.username && password == admin.password;

        Ok(RequestActor {
            username: username.to_string(),
            is_operator,
        })
    }
}
