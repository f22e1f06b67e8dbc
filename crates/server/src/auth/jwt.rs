use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parley_common::types::Identity;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Credential tokens live as long as a browser session reasonably would.
pub const TOKEN_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialClaims {
    sub: String,
    username: String,
    iat: i64,
    exp: i64,
}

/// Issues and verifies the signed credential token binding a user id and
/// username. Stateless; the same token authenticates both the HTTP API and
/// the WebSocket handshake.
#[derive(Clone)]
pub struct JwtTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_token(&self, user_id: Uuid, username: &str) -> anyhow::Result<String> {
        self.issue_token_at(user_id, username, current_unix_timestamp()?)
    }

    fn issue_token_at(
        &self,
        user_id: Uuid,
        username: &str,
        issued_at: i64,
    ) -> anyhow::Result<String> {
        let claims = CredentialClaims {
            sub: user_id.to_string(),
            username: username.to_owned(),
            iat: issued_at,
            exp: issued_at + TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode credential token")
    }

    pub fn verify_token(&self, token: &str) -> anyhow::Result<Identity> {
        let claims = decode::<CredentialClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode credential token")?
            .claims;

        let user_id = Uuid::parse_str(&claims.sub)
            .with_context(|| format!("credential token subject '{}' is not a UUID", claims.sub))?;

        Ok(Identity { user_id, username: claims.username })
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}
