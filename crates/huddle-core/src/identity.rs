use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use huddle_types::api::Claims;
use huddle_types::models::Role;

use crate::error::DeliveryError;

const DEFAULT_TOKEN_TTL_DAYS: i64 = 30;

/// An authenticated principal, resolved from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            username: claims.username,
            role: claims.role,
        }
    }
}

/// Credential validator shared by the REST middleware and the gateway
/// handshake. Both paths must go through the same instance so a token
/// resolves to the same identity on either.
#[derive(Clone)]
pub struct TokenValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: chrono::Duration,
}

impl TokenValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: chrono::Duration::days(DEFAULT_TOKEN_TTL_DAYS),
        }
    }

    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sign a token for `user_id`. Stands in for the external identity
    /// provider in development deployments.
    pub fn issue(&self, user_id: Uuid, username: &str, role: Role) -> anyhow::Result<String> {
        let claims = Claims {
            sub: user_id,
            username: username.to_string(),
            role,
            exp: (chrono::Utc::now() + self.ttl).timestamp().max(0) as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn validate(&self, token: &str) -> Result<Identity, DeliveryError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| Identity::from(data.claims))
            .map_err(|_| DeliveryError::Authentication)
    }
}
