use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PaymentConfig;

use super::retry::RetryDecision;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("payment service rate limited the request")]
    RateLimited { retry_after: Option<Duration> },
    #[error("payment service rejected the request with {status}: {detail}")]
    Rejected { status: u16, detail: String },
    #[error("payment service unavailable: {0}")]
    Unavailable(String),
    #[error("malformed payment service response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Only rate limiting is retried; everything else surfaces immediately.
    pub fn retry_decision(&self) -> RetryDecision {
        match self {
            GatewayError::RateLimited { retry_after } => RetryDecision::Retry { after: *retry_after },
            _ => RetryDecision::Stop,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub property_id: Uuid,
    pub owner_id: Uuid,
    pub owner_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentInitiation {
    pub request_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub provider_tx_ref: Option<String>,
    pub checkout_url: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Start a charge for the listing. Each call carries a fresh request id.
    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentInitiation, GatewayError>;
}

#[derive(Debug, Serialize)]
struct InitiateBody {
    request_id: Uuid,
    property_id: Uuid,
    user_id: Uuid,
    // serialized as a decimal string, never through f64
    amount: Decimal,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct InitiateReply {
    payment_id: Option<Uuid>,
    #[serde(alias = "tx_ref")]
    provider_tx_ref: Option<String>,
    #[serde(alias = "payment_url")]
    checkout_url: Option<String>,
}

pub struct HttpPaymentGateway {
    client: Client,
    initiate_url: String,
    api_key: String,
    amount: Decimal,
    currency: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &PaymentConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            initiate_url: format!("{}/payments/initiate", config.service_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            amount: config.amount,
            currency: config.currency.clone(),
        })
    }
}

fn retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentInitiation, GatewayError> {
        let request_id = Uuid::new_v4();
        let body = InitiateBody {
            request_id,
            property_id: request.property_id,
            user_id: request.owner_id,
            amount: self.amount,
            currency: self.currency.clone(),
        };

        tracing::info!(property_id = %request.property_id, %request_id, "Initiating payment for property");

        let response = self
            .client
            .post(&self.initiate_url)
            .header("X-API-Key", &self.api_key)
            .bearer_auth(&request.owner_token)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                tracing::error!(property_id = %request.property_id, "Error initiating payment: {err}");
                GatewayError::Unavailable(err.to_string())
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after(response.headers());
            tracing::warn!(property_id = %request.property_id, ?retry_after, "Payment service rate limited");
            return Err(GatewayError::RateLimited { retry_after });
        }

        let text = response
            .text()
            .await
            .map_err(|err| GatewayError::Unavailable(err.to_string()))?;

        if status.is_client_error() {
            tracing::error!(property_id = %request.property_id, status = status.as_u16(), response_body = %text, "Payment service rejected initiation");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                detail: text,
            });
        }
        if !status.is_success() {
            tracing::error!(property_id = %request.property_id, status = status.as_u16(), response_body = %text, "Payment service failed");
            return Err(GatewayError::Unavailable(format!("status {status}")));
        }

        let reply: InitiateReply =
            serde_json::from_str(&text).map_err(|err| GatewayError::Malformed(err.to_string()))?;

        tracing::info!(
            property_id = %request.property_id,
            payment_id = ?reply.payment_id,
            "Payment initiated successfully"
        );

        Ok(PaymentInitiation {
            request_id,
            payment_id: reply.payment_id,
            provider_tx_ref: reply.provider_tx_ref,
            checkout_url: reply.checkout_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn gateway(server: &MockServer, timeout: Duration) -> HttpPaymentGateway {
        let config = PaymentConfig {
            service_url: server.uri(),
            api_key: "test-api-key".to_string(),
            amount: Decimal::new(10000, 2),
            currency: "ETB".to_string(),
            timeout,
            max_attempts: 3,
            backoff: Duration::from_millis(1),
            auto_initiate: false,
        };
        HttpPaymentGateway::new(&config).expect("client builds")
    }

    fn request() -> PaymentRequest {
        PaymentRequest {
            property_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            owner_token: "owner-token".to_string(),
        }
    }

    #[tokio::test]
    async fn parses_successful_initiation() {
        let server = MockServer::start().await;
        let payment_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path("/payments/initiate"))
            .and(header("X-API-Key", "test-api-key"))
            .and(header("Authorization", "Bearer owner-token"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "payment_id": payment_id,
                "tx_ref": "chapa-123",
                "checkout_url": "https://checkout.example/pay/123"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let initiation = gateway(&server, Duration::from_secs(2))
            .initiate(&request())
            .await
            .expect("initiation succeeds");

        assert_eq!(initiation.payment_id, Some(payment_id));
        assert_eq!(initiation.provider_tx_ref.as_deref(), Some("chapa-123"));
        assert_eq!(initiation.checkout_url.as_deref(), Some("https://checkout.example/pay/123"));
    }

    #[tokio::test]
    async fn sends_exact_amount_and_currency() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payments/initiate"))
            .and(body_partial_json(serde_json::json!({ "amount": "100.00", "currency": "ETB" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "payment_id": Uuid::new_v4() })))
            .expect(1)
            .mount(&server)
            .await;

        gateway(&server, Duration::from_secs(2))
            .initiate(&request())
            .await
            .expect("initiation succeeds");
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
            .mount(&server)
            .await;

        let err = gateway(&server, Duration::from_secs(2))
            .initiate(&request())
            .await
            .unwrap_err();

        match err {
            GatewayError::RateLimited { retry_after } => assert_eq!(retry_after, Some(Duration::from_secs(2))),
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_error_is_rejected_with_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("amount mismatch"))
            .mount(&server)
            .await;

        let err = gateway(&server, Duration::from_secs(2))
            .initiate(&request())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Rejected { status: 400, ref detail } if detail == "amount mismatch"));
        assert_eq!(err.retry_decision(), RetryDecision::Stop);
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = gateway(&server, Duration::from_secs(2))
            .initiate(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }

    #[tokio::test]
    async fn garbled_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = gateway(&server, Duration::from_secs(2))
            .initiate(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Malformed(_)));
    }

    #[tokio::test]
    async fn timeout_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let err = gateway(&server, Duration::from_millis(50))
            .initiate(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }
}
