//! Bearer-token verification.
//!
//! Tokens are issued by the external identity provider and signed with a
//! shared HS256 key.  Every privileged handler takes a [`Principal`]
//! extractor, so identity and roles always come from the verified claims
//! rather than from the request body.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use portal_shared::types::Role;

use crate::api::AppState;
use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: i64,
}

/// The verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub email: String,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    /// Claims `tutor` or `admin`.
    pub fn is_staff(&self) -> bool {
        self.has_role(Role::Tutor) || self.is_admin()
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Admin access required".to_string()))
        }
    }

    /// The caller may act on `email` if it is their own or they are an admin.
    pub fn require_self_or_admin(&self, email: &str) -> Result<(), ApiError> {
        if self.is_admin() || self.email.eq_ignore_ascii_case(email) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "You can only access your own account".to_string(),
            ))
        }
    }
}

pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &[u8], issuer: Option<&str>, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(iss) = issuer {
            validation.set_issuer(&[iss]);
        }
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Principal, ApiError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "rejected bearer token");
            ApiError::Unauthorized("Invalid or expired token".to_string())
        })?;

        let claims = data.claims;
        let email = claims
            .email
            .unwrap_or(claims.sub)
            .trim()
            .to_ascii_lowercase();
        if email.is_empty() {
            return Err(ApiError::Unauthorized("Token has no subject".to_string()));
        }

        // Unknown role names are ignored rather than rejected.
        let mut roles = Vec::new();
        for role in claims.roles.iter().filter_map(|r| Role::parse(r)) {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
        Ok(Principal { email, roles })
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

        state.auth.verify(token)
    }
}

#[cfg(test)]
pub(crate) fn mint_token(secret: &[u8], email: &str, roles: &[&str], ttl_secs: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        sub: email.to_string(),
        email: Some(email.to_string()),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        exp: chrono::Utc::now().timestamp() + ttl_secs,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn verifies_roles_and_normalizes_email() {
        let verifier = TokenVerifier::new(SECRET, None, None);
        let token = mint_token(SECRET, "Tutor@Example.com", &["teacher", "admin", "wizard"], 600);

        let principal = verifier.verify(&token).unwrap();
        assert_eq!(principal.email, "tutor@example.com");
        assert_eq!(principal.roles, vec![Role::Tutor, Role::Admin]);
        assert!(principal.is_staff());
    }

    #[test]
    fn rejects_wrong_key_and_expired_tokens() {
        let verifier = TokenVerifier::new(SECRET, None, None);

        let forged = mint_token(b"other-secret", "a@x.com", &["admin"], 600);
        assert!(matches!(verifier.verify(&forged), Err(ApiError::Unauthorized(_))));

        let expired = mint_token(SECRET, "a@x.com", &[], -3600);
        assert!(matches!(verifier.verify(&expired), Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn self_or_admin() {
        let user = Principal {
            email: "a@x.com".into(),
            roles: vec![Role::Student],
        };
        assert!(user.require_self_or_admin("A@x.com").is_ok());
        assert!(user.require_self_or_admin("b@x.com").is_err());
        assert!(user.require_admin().is_err());
    }
}
