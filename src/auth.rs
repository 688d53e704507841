//! Token verification for actor identity.
//!
//! The calling role is asserted server-side from a signed bearer token; it is
//! never taken from a request body or any other client-controlled field.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::models::ActorRole;

/// JWT claims carried by access tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: ActorRole,
    pub exp: usize,
}

/// The authenticated actor behind a request.
#[derive(Debug, Clone, Copy)]
pub struct ActorContext {
    pub user_id: Uuid,
    pub role: ActorRole,
}

/// Issues an access token. Used by the host's login flow and by tests.
pub fn generate_access_token(
    user_id: Uuid,
    role: ActorRole,
    secret: &str,
    ttl_seconds: u64,
) -> std::result::Result<String, jsonwebtoken::errors::Error> {
    let exp = chrono::Utc::now().timestamp() as usize + ttl_seconds as usize;
    let claims = Claims {
        sub: user_id,
        role,
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verifies a bearer token and extracts the actor behind it.
pub fn verify_token(token: &str, secret: &str) -> Result<ActorContext> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|err| Error::Unauthorized(format!("invalid token: {err}")))?;

    Ok(ActorContext {
        user_id: data.claims.sub,
        role: data.claims.role,
    })
}
