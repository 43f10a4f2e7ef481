use axum::http::{header::AUTHORIZATION, HeaderMap};
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::services::identity::{Identity, IdentityVerifier, Role};

pub const API_KEY_HEADER: &str = "X-API-Key";

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Resolve the caller behind the `Authorization: Bearer` header.
pub async fn authenticate(headers: &HeaderMap, verifier: &dyn IdentityVerifier) -> Result<Identity, AppError> {
    let Some(token) = bearer_token(headers) else {
        tracing::warn!("Request without a bearer token");
        return Err(AppError::Unauthorized("Could not validate credentials".to_string()));
    };
    verifier.verify(token).await.map_err(|err| {
        tracing::warn!("Token verification failed: {err}");
        AppError::from(err)
    })
}

pub async fn authenticate_owner(headers: &HeaderMap, verifier: &dyn IdentityVerifier) -> Result<Identity, AppError> {
    let identity = authenticate(headers, verifier).await?;
    if identity.role != Role::Owner {
        tracing::warn!(user_id = %identity.user_id, role = ?identity.role, "Owner route called by non-owner");
        return Err(AppError::Forbidden("The user is not an Owner".to_string()));
    }
    Ok(identity)
}

pub fn require_admin(identity: &Identity) -> Result<(), AppError> {
    if identity.role != Role::Admin {
        tracing::warn!(user_id = %identity.user_id, "Admin route called by non-admin");
        return Err(AppError::Forbidden("The user is not an Admin".to_string()));
    }
    Ok(())
}

fn keys_match(provided: &str, expected: &str) -> bool {
    let (provided, expected) = (provided.as_bytes(), expected.as_bytes());
    if provided.len() != expected.len() {
        // same amount of work as a full comparison
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Server-to-server calls carry a static key instead of a user token.
pub fn check_api_key(headers: &HeaderMap, expected: &str) -> Result<(), AppError> {
    match headers.get(API_KEY_HEADER).map(|value| value.to_str()) {
        None => Err(AppError::Forbidden("X-API-Key header missing".to_string())),
        Some(Ok(key)) if keys_match(key, expected) => Ok(()),
        Some(_) => {
            tracing::warn!("Webhook called with an invalid API key");
            Err(AppError::Forbidden("Invalid API Key".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::testing::{self, StaticVerifier};

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_token_requires_the_scheme() {
        assert_eq!(bearer_token(&headers("authorization", "Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("authorization", "bearer  abc ")), Some("abc"));
        assert_eq!(bearer_token(&headers("authorization", "abc")), None);
        assert_eq!(bearer_token(&headers("authorization", "Basic abc")), None);
        assert_eq!(bearer_token(&headers("authorization", "Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn owner_check_rejects_other_roles() {
        let owner = testing::identity(Role::Owner);
        let tenant = testing::identity(Role::Other("tenant".to_string()));
        let verifier = StaticVerifier::default().with(owner.clone()).with(tenant.clone());

        let found = authenticate_owner(&headers("authorization", &format!("Bearer {}", owner.raw_token)), &verifier)
            .await
            .unwrap();
        assert_eq!(found, owner);

        let err = authenticate_owner(&headers("authorization", &format!("Bearer {}", tenant.raw_token)), &verifier)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "The user is not an Owner");

        let err = authenticate(&headers("authorization", "Bearer nope"), &verifier).await.unwrap_err();
        assert_eq!(err.reason(), "unauthorized");
    }

    #[test]
    fn api_key_must_match() {
        assert!(check_api_key(&headers("x-api-key", "secret"), "secret").is_ok());
        assert_eq!(
            check_api_key(&headers("x-api-key", "wrong"), "secret").unwrap_err().to_string(),
            "Invalid API Key"
        );
        assert_eq!(
            check_api_key(&HeaderMap::new(), "secret").unwrap_err().to_string(),
            "X-API-Key header missing"
        );
    }

    #[test]
    fn api_key_comparison_needs_the_whole_key() {
        assert!(keys_match("secret", "secret"));
        assert!(!keys_match("secre", "secret"));
        assert!(!keys_match("secret-and-more", "secret"));
        assert!(!keys_match("", "secret"));
        assert!(check_api_key(&headers("x-api-key", "secre"), "secret").is_err());
    }
}
