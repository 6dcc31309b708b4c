use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, Salt, SaltString},
    Argon2,
};
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::header, http::request::Parts};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, TryRngCore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::handler::AppState;
use crate::error::{AppError, AppResult, AuthError};

/// Bearer token claims: subject user id plus issued/expiry timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: i64,
    pub iat: i64,
}

/// Password hashing and bearer token issuance in one place, so parameter
/// choices stay consistent across register, login and the extractor.
pub struct AuthService {
    argon2: Argon2<'static>,
    jwt_secret: String,
    token_ttl: Duration,
}

impl AuthService {
    pub fn new(jwt_secret: impl Into<String>, token_ttl_hours: i64) -> Self {
        Self {
            argon2: Argon2::default(),
            jwt_secret: jwt_secret.into(),
            token_ttl: Duration::hours(token_ttl_hours),
        }
    }

    /// Argon2id with a random salt; the PHC string goes straight to storage.
    pub fn hash_password(&self, password: &str) -> AppResult<String> {
        let mut salt_bytes = [0u8; Salt::RECOMMENDED_LENGTH];
        OsRng
            .try_fill_bytes(&mut salt_bytes)
            .map_err(|err| AuthError::PasswordHash(err.to_string()))?;
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|err| AuthError::PasswordHash(err.to_string()))?;

        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| AuthError::PasswordHash(err.to_string()))?;

        Ok(hash.to_string())
    }

    pub fn verify_password(&self, password: &str, password_hash: &str) -> AppResult<bool> {
        let parsed = PasswordHash::new(password_hash)
            .map_err(|err| AuthError::PasswordHash(err.to_string()))?;

        Ok(self
            .argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    /// HS256 JWT for the given user, expiring after the configured TTL.
    pub fn issue_token(&self, user_id: Uuid) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            exp: (now + self.token_ttl).timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_ref()),
        )
        .map_err(|err| AuthError::Token(err.to_string()))?;

        Ok(token)
    }

    /// Decode and validate a bearer token; expiry is enforced here.
    pub fn verify_token(&self, token: &str) -> AppResult<Claims> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_ref()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| AuthError::InvalidToken)?;

        Ok(data.claims)
    }
}

/// Extractor yielding the authenticated user's id from the
/// `Authorization: Bearer <token>` header. Missing or invalid tokens map
/// to 401 through `AppError`.
pub struct AuthUser(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AuthError::MissingToken)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::MissingToken)?;

        let claims = state.auth.verify_token(token)?;

        Ok(AuthUser(claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new("test-secret", 24)
    }

    #[test]
    fn test_hash_and_verify_round_trip() {
        let auth = service();
        let hash = auth.hash_password("correct horse").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(auth.verify_password("correct horse", &hash).unwrap());
        assert!(!auth.verify_password("battery staple", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let auth = service();
        let first = auth.hash_password("same password").unwrap();
        let second = auth.hash_password("same password").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_token_round_trip_preserves_subject() {
        let auth = service();
        let user_id = Uuid::new_v4();

        let token = auth.issue_token(user_id).unwrap();
        let claims = auth.verify_token(&token).unwrap();

        assert_eq!(claims.sub, user_id);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_expired_token_rejected() {
        let auth = service();
        let now = Utc::now();
        let claims = Claims {
            sub: Uuid::new_v4(),
            exp: (now - Duration::hours(1)).timestamp(),
            iat: (now - Duration::hours(2)).timestamp(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret("test-secret".as_ref()),
        )
        .unwrap();

        assert!(auth.verify_token(&token).is_err());
    }

    #[test]
    fn test_token_signed_with_other_secret_rejected() {
        let token = AuthService::new("other-secret", 24)
            .issue_token(Uuid::new_v4())
            .unwrap();

        assert!(service().verify_token(&token).is_err());
    }
}
