//! Bearer tokens: HS256 JWTs whose subject is the caller's user id.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::JwtConfig;
use crate::domain::directory::UserId;

const JWT_ALGORITHM: Algorithm = Algorithm::HS256;
pub const ADMIN_ROLE: &str = "admin";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Authenticated identity attached to a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: UserId,
    pub roles: Vec<String>,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|role| role == ADMIN_ROLE)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token invalid: {0}")]
    Invalid(String),
    #[error("token could not be issued: {0}")]
    Issue(String),
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expire_seconds: u64,
}

impl TokenService {
    pub fn new(secret: &SecretString, expire_seconds: u64) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(bytes),
            decoding_key: DecodingKey::from_secret(bytes),
            expire_seconds,
        }
    }

    pub fn from_config(config: &JwtConfig) -> Self {
        Self::new(&config.secret, config.expire_seconds)
    }

    pub fn issue(&self, user_id: UserId, roles: &[String]) -> Result<String, TokenError> {
        let iat = Utc::now().timestamp();
        let lifetime = i64::try_from(self.expire_seconds).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: user_id.0,
            iat,
            exp: iat.saturating_add(lifetime),
            roles: roles.to_vec(),
        };
        encode(&Header::new(JWT_ALGORITHM), &claims, &self.encoding_key)
            .map_err(|error| TokenError::Issue(error.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Caller, TokenError> {
        let validation = Validation::new(JWT_ALGORITHM);
        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|error| {
            match *error.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(error.to_string()),
            }
        })?;

        // Placeholder identities are never accepted.
        if data.claims.sub <= 0 {
            return Err(TokenError::Invalid("subject must be a positive user id".to_string()));
        }
        Ok(Caller { user_id: UserId(data.claims.sub), roles: data.claims.roles })
    }
}
