use std::sync::LazyLock;

use axum::{async_trait, extract::FromRequestParts, RequestPartsExt};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::Utc;
use http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

static KEYS: LazyLock<Keys> = LazyLock::new(|| {
    let secret = std::env::var("JWT_SECRET").expect("JWT_SECRET must be set");
    Keys::new(&secret)
});

pub const LONG_TTL: usize = 24 * 60 * 60; // 24 hours

#[cfg(debug_assertions)]
pub fn generate_dev_token(user_id: i32, email: &str) -> Result<String, AuthError> {
    generate_token(user_id, email, LONG_TTL)
}

pub fn generate_token(user_id: i32, email: &str, ttl: usize) -> Result<String, AuthError> {
    encode_token(user_id, email, ttl, &KEYS)
}

fn encode_token(user_id: i32, email: &str, ttl: usize, keys: &Keys) -> Result<String, AuthError> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp: Utc::now().timestamp() as usize + ttl,
    };

    jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
        .map_err(|_| AuthError::TokenCreation)
}

pub(crate) struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    fn new(secret: &str) -> Self {
        let decoded_secret = hex::decode(secret).expect("Secret was not valid hex");
        Self {
            encoding: EncodingKey::from_secret(&decoded_secret),
            decoding: DecodingKey::from_secret(&decoded_secret),
        }
    }
}

/// The signed-in principal. `sub` is the user id results are stored under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i32,
    pub email: String,
    pub exp: usize,
}

#[derive(Debug)]
pub enum AuthError {
    MissingCredentials,
    MissingGmailToken,
    TokenCreation,
    InvalidToken,
}

fn decode_claims(token: &str, keys: &Keys) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;
    validation.leeway = 60;

    jsonwebtoken::decode::<Claims>(token, &keys.decoding, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::error!("Error decoding token: {:?}", e);
            AuthError::InvalidToken
        })
}

#[async_trait]
impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AuthError::MissingCredentials)?;

        Ok(decode_claims(bearer.token(), &KEYS)?)
    }
}
