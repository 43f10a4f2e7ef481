use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::retry::{RetryDecision, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Owner,
    Admin,
    Other(String),
}

impl From<&str> for Role {
    fn from(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "owner" => Role::Owner,
            "admin" => Role::Admin,
            other => Role::Other(other.to_string()),
        }
    }
}

/// The authenticated caller, produced once per request by an
/// [`IdentityVerifier`] and passed explicitly to whatever needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
    pub raw_token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid token")]
    InvalidToken,
    #[error("identity service rejected the token")]
    Rejected,
    #[error("identity service unavailable: {0}")]
    Unavailable(String),
    #[error("malformed identity response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, IdentityError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyReply {
    #[serde(alias = "id")]
    user_id: Uuid,
    role: String,
}

/// Checks the HS256 signature locally, then asks the user-management
/// service for the authoritative user id and role when one is configured.
/// Without a user service the token claims are trusted.
pub struct JwtIdentityVerifier {
    jwt_secret: String,
    user_service: Option<String>,
    client: Client,
    retry: RetryPolicy,
    cache: DashMap<String, (Identity, Instant)>,
    cache_ttl: Duration,
}

impl JwtIdentityVerifier {
    pub fn new(
        jwt_secret: String,
        user_service: Option<String>,
        timeout: Duration,
        cache_ttl: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            jwt_secret,
            user_service,
            client,
            retry,
            cache: DashMap::new(),
            cache_ttl,
        })
    }

    /// Cache the answer for `token` and drop every entry past its ttl.
    fn remember(&self, token: &str, identity: &Identity) {
        let ttl = self.cache_ttl;
        self.cache.retain(|_, (_, stored_at)| stored_at.elapsed() < ttl);
        self.cache.insert(token.to_string(), (identity.clone(), Instant::now()));
    }

    fn decode(&self, token: &str) -> Result<Claims, IdentityError> {
        let mut validation = jsonwebtoken::Validation::default();

        validation.leeway = 10;
        validation.validate_exp = true;
        validation.algorithms = vec![jsonwebtoken::Algorithm::HS256];

        let token_data = jsonwebtoken::decode::<Claims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|err| {
            tracing::warn!("Error decoding token: {:?}", err);
            IdentityError::InvalidToken
        })?;

        Ok(token_data.claims)
    }

    async fn fetch_remote(&self, base_url: &str, token: &str) -> Result<Identity, IdentityError> {
        let url = format!("{}/auth/verify", base_url.trim_end_matches('/'));
        let client = &self.client;
        let url = url.as_str();

        let reply = self
            .retry
            .run(
                "identity verification",
                move |_| async move {
                    let response = client
                        .get(url)
                        .bearer_auth(token)
                        .send()
                        .await
                        .map_err(|err| IdentityError::Unavailable(err.to_string()))?;
                    match response.status() {
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(IdentityError::Rejected),
                        status if !status.is_success() => Err(IdentityError::Unavailable(format!("status {status}"))),
                        _ => response
                            .json::<VerifyReply>()
                            .await
                            .map_err(|err| IdentityError::Malformed(err.to_string())),
                    }
                },
                |err| match err {
                    IdentityError::Unavailable(_) => RetryDecision::Retry { after: None },
                    _ => RetryDecision::Stop,
                },
            )
            .await?;

        Ok(Identity {
            user_id: reply.user_id,
            role: Role::from(reply.role.as_str()),
            raw_token: token.to_string(),
        })
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, IdentityError> {
        let claims = self.decode(token)?;

        let Some(base_url) = &self.user_service else {
            let user_id = Uuid::parse_str(&claims.sub).map_err(|_| IdentityError::InvalidToken)?;
            return Ok(Identity {
                user_id,
                role: Role::from(claims.role.as_deref().unwrap_or("user")),
                raw_token: token.to_string(),
            });
        };

        if let Some(entry) = self.cache.get(token) {
            let (identity, stored_at) = entry.value();
            if stored_at.elapsed() < self.cache_ttl {
                return Ok(identity.clone());
            }
        }

        let identity = self.fetch_remote(base_url, token).await?;
        self.remember(token, &identity);
        Ok(identity)
    }
}
