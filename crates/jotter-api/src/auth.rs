use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use jotter_core::util::sanitize;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::AppError;

pub const ADMIN_PASS_HEADER: &str = "x-admin-pass";

const ADMIN_SUBJECT: &str = "admin";

/// How the caller proved admin rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    BearerToken,
    PasswordHeader,
}

#[derive(Debug, Clone)]
pub struct AdminPrincipal {
    pub subject: String,
    pub method: AuthMethod,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct AdminClaims {
    sub: String,
    admin: bool,
    iat: Option<i64>,
    exp: Option<i64>,
}

/// Issues and verifies the single admin's credentials.
#[derive(Clone)]
pub struct AdminAuthenticator {
    config: Arc<AppConfig>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AdminAuthenticator {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            config,
        }
    }

    pub fn password_matches(&self, candidate: &str) -> bool {
        constant_time_eq(candidate.as_bytes(), self.config.admin_pass.as_bytes())
    }

    pub fn issue_token(&self) -> Result<IssuedToken, AppError> {
        let now = chrono::Utc::now().timestamp();
        let ttl = i64::try_from(self.config.jwt_ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(ttl);
        let claims = AdminClaims {
            sub: ADMIN_SUBJECT.to_string(),
            admin: true,
            iat: Some(now),
            exp: Some(expires_at),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|error| {
                AppError::internal(format!("Token signing failed: {}", sanitize(&error)))
            })?;
        Ok(IssuedToken { token, expires_at })
    }

    pub fn verify_token(&self, token: &str) -> Result<AdminPrincipal, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.config.auth_clock_skew.as_secs();
        validation.set_required_spec_claims(&["exp", "sub"]);

        let decoded =
            decode::<AdminClaims>(token, &self.decoding_key, &validation).map_err(|error| {
                AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error)))
            })?;

        if decoded.claims.sub != ADMIN_SUBJECT || !decoded.claims.admin {
            return Err(AppError::unauthorized("Token does not grant admin access"));
        }
        validate_temporal_claims(&decoded.claims, self.config.auth_clock_skew)?;

        Ok(AdminPrincipal {
            subject: decoded.claims.sub,
            method: AuthMethod::BearerToken,
        })
    }

    /// Authenticate a request from its headers.
    ///
    /// A present `Authorization` header must carry a valid bearer token; the
    /// password header is only consulted when it is absent.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AdminPrincipal, AppError> {
        if headers.contains_key("authorization") {
            let token = extract_bearer_token(headers)?;
            return self.verify_token(token);
        }

        let password = headers
            .get(ADMIN_PASS_HEADER)
            .map(|value| {
                value
                    .to_str()
                    .map_err(|_| AppError::unauthorized("Admin password header is not valid UTF-8"))
            })
            .transpose()?
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::unauthorized("Admin credentials required"))?;

        if !self.password_matches(password) {
            return Err(AppError::unauthorized("Invalid admin password"));
        }

        Ok(AdminPrincipal {
            subject: ADMIN_SUBJECT.to_string(),
            method: AuthMethod::PasswordHeader,
        })
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

fn validate_temporal_claims(claims: &AdminClaims, clock_skew: Duration) -> Result<(), AppError> {
    let now = chrono::Utc::now().timestamp();
    let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(0);

    let exp = claims
        .exp
        .ok_or_else(|| AppError::unauthorized("Token missing `exp` claim"))?;
    if exp <= now.saturating_sub(skew) {
        return Err(AppError::unauthorized("Token is expired"));
    }

    let iat = claims
        .iat
        .ok_or_else(|| AppError::unauthorized("Token missing `iat` claim"))?;
    if iat > now.saturating_add(skew) {
        return Err(AppError::unauthorized("Token `iat` is in the future"));
    }

    Ok(())
}

/// Compare secrets without short-circuiting on the first differing byte.
fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    let mut diff = left.len() ^ right.len();
    for (index, byte) in left.iter().enumerate() {
        let other = right.get(index % right.len().max(1)).copied().unwrap_or(0);
        diff |= usize::from(byte ^ other);
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::http::HeaderValue;

    use super::*;
    use crate::config::test_values;

    fn authenticator() -> AdminAuthenticator {
        let map: HashMap<&str, &str> = test_values();
        let config =
            AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string())).unwrap();
        AdminAuthenticator::new(Arc::new(config))
    }

    fn sign(claims: &AdminClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn bearer_token_extractor_accepts_standard_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );

        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn bearer_token_extractor_rejects_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[test]
    fn issued_token_is_accepted() {
        let auth = authenticator();
        let issued = auth.issue_token().unwrap();

        let principal = auth.verify_token(&issued.token).unwrap();
        assert_eq!(principal.subject, "admin");
        assert_eq!(principal.method, AuthMethod::BearerToken);
        assert!(issued.expires_at > chrono::Utc::now().timestamp());
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let auth = authenticator();
        let now = chrono::Utc::now().timestamp();
        let token = sign(
            &AdminClaims {
                sub: "admin".to_string(),
                admin: true,
                iat: Some(now),
                exp: Some(now + 300),
            },
            "some-other-secret-value",
        );

        assert!(auth.verify_token(&token).is_err());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let auth = authenticator();
        let mut token = auth.issue_token().unwrap().token;
        token.push('x');
        assert!(auth.verify_token(&token).is_err());
    }

    #[test]
    fn non_admin_claims_are_rejected() {
        let auth = authenticator();
        let now = chrono::Utc::now().timestamp();
        let token = sign(
            &AdminClaims {
                sub: "admin".to_string(),
                admin: false,
                iat: Some(now),
                exp: Some(now + 300),
            },
            "sensitive-jwt-secret-0123456789",
        );

        let err = auth.verify_token(&token).unwrap_err();
        assert!(err.to_string().contains("admin access"));
    }

    #[test]
    fn password_header_authenticates() {
        let auth = authenticator();
        let mut headers = HeaderMap::new();
        headers.insert(
            ADMIN_PASS_HEADER,
            HeaderValue::from_static("sensitive-admin-pass"),
        );

        let principal = auth.authenticate(&headers).unwrap();
        assert_eq!(principal.method, AuthMethod::PasswordHeader);
    }

    #[test]
    fn wrong_or_missing_password_is_rejected() {
        let auth = authenticator();

        let err = auth.authenticate(&HeaderMap::new()).unwrap_err();
        assert!(err.to_string().contains("credentials required"));

        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_PASS_HEADER, HeaderValue::from_static("guess"));
        let err = auth.authenticate(&headers).unwrap_err();
        assert!(err.to_string().contains("Invalid admin password"));
    }

    #[test]
    fn invalid_bearer_is_not_rescued_by_password_header() {
        let auth = authenticator();
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer nope"));
        headers.insert(
            ADMIN_PASS_HEADER,
            HeaderValue::from_static("sensitive-admin-pass"),
        );

        assert!(auth.authenticate(&headers).is_err());
    }

    #[test]
    fn temporal_claims_require_exp_and_iat() {
        let claims = AdminClaims {
            sub: "admin".to_string(),
            admin: true,
            exp: None,
            iat: None,
        };
        let err = validate_temporal_claims(&claims, Duration::from_secs(60)).unwrap_err();
        assert!(err.to_string().contains("missing `exp`"));
    }

    #[test]
    fn temporal_claims_reject_future_iat() {
        let now = chrono::Utc::now().timestamp();
        let claims = AdminClaims {
            sub: "admin".to_string(),
            admin: true,
            exp: Some(now + 300),
            iat: Some(now + 120),
        };
        let err = validate_temporal_claims(&claims, Duration::from_secs(30)).unwrap_err();
        assert!(err.to_string().contains("future"));
    }

    #[test]
    fn constant_time_eq_matches_only_identical_inputs() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret-longer"));
        assert!(!constant_time_eq(b"", b"x"));
        assert!(constant_time_eq(b"", b""));
    }
}
