use anyhow::{anyhow, Result};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims of the access tokens issued by the portfolio backend's login flow.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id.
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
}

/// Decode and validate an HS256 JWT (signature and `exp`).
pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| anyhow!("decode_jwt: {}", e))?;

    Ok(data.claims)
}
