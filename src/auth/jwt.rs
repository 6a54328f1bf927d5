//! JWT token validation
//!
//! Tokens are issued elsewhere; this service only verifies them and reads
//! the caller identity, database role and admin flag they carry.

use crate::error::AppError;
use crate::executor::RequestContext;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (caller id)
    pub sub: String,
    /// Database role the caller acts as
    #[serde(default)]
    pub role: Option<String>,
    /// May manage the schema lifecycle
    #[serde(default)]
    pub admin: bool,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

impl Claims {
    pub fn into_context(self) -> RequestContext {
        RequestContext {
            subject: Some(self.sub),
            role: self.role.filter(|r| !r.is_empty()),
            authenticated: true,
            admin: self.admin,
        }
    }
}

/// Decode and validate a JWT token
pub fn decode_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::Unauthorized("Token expired".to_string())
        }
        jsonwebtoken::errors::ErrorKind::InvalidToken => {
            AppError::Unauthorized("Invalid token".to_string())
        }
        _ => AppError::Unauthorized(format!("Token validation failed: {}", e)),
    })?;

    Ok(token_data.claims)
}

#[cfg(test)]
pub(crate) fn create_token(secret: &str, sub: &str, role: Option<&str>, admin: bool) -> String {
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = Utc::now();
    let claims = Claims {
        sub: sub.to_string(),
        role: role.map(str::to_string),
        admin,
        exp: (now + Duration::minutes(15)).timestamp(),
        iat: now.timestamp(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}
