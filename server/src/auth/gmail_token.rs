use axum::{async_trait, extract::FromRequestParts};
use http::request::Parts;

use crate::error::AppError;

use super::jwt::AuthError;

pub const GMAIL_TOKEN_HEADER: &str = "x-gmail-access-token";

/// OAuth access token for the caller's Gmail account, passed through to the
/// Gmail API as-is
#[derive(Debug, Clone)]
pub struct GmailAccessToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for GmailAccessToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(GMAIL_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingGmailToken)?;

        Ok(GmailAccessToken(token.to_string()))
    }
}
