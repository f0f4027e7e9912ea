// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trusted-header role extraction for the case browser's HTTP surface.
//!
//! A production deployment terminates JWT bearer auth at a gateway in
//! front of this daemon and forwards the verified claims as headers;
//! this daemon trusts `X-Auth-Role` / `X-Auth-Tenant-Id` /
//! `X-Auth-User-Id` rather than re-verifying a token itself.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// The three case-browser role claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sees only cases they uploaded.
    SalesUser,
    /// Sees every case under their tenant.
    SalesManager,
    /// Sees every case, any tenant.
    OpsAuditor,
}

/// The verified claims this request carries.
#[derive(Debug, Clone)]
pub struct Claims {
    /// The caller's role.
    pub role: Role,
    /// The caller's tenant.
    pub tenant_id: String,
    /// The caller's user id.
    pub user_id: String,
}

/// Rejection when the trusted headers are missing or malformed.
pub struct AuthRejection(String);

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, axum::Json(json!({ "error": self.0 }))).into_response()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Claims {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);

        let role = match header("x-auth-role").as_deref() {
            Some("SalesUser") => Role::SalesUser,
            Some("SalesManager") => Role::SalesManager,
            Some("OpsAuditor") => Role::OpsAuditor,
            _ => return Err(AuthRejection("missing or unrecognized X-Auth-Role".to_string())),
        };
        let tenant_id = header("x-auth-tenant-id").ok_or_else(|| AuthRejection("missing X-Auth-Tenant-Id".to_string()))?;
        let user_id = header("x-auth-user-id").ok_or_else(|| AuthRejection("missing X-Auth-User-Id".to_string()))?;

        Ok(Claims { role, tenant_id, user_id })
    }
}
