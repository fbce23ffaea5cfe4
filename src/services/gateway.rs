//! Outbound payment-gateway client. All network calls run behind a
//! three-state circuit breaker so a dead gateway sheds load quickly, and
//! callers admit them through the settlement queue.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::PaymentConfig;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests allowed.
    Closed,
    /// Tripped after repeated failures; requests blocked until the reset
    /// timeout elapses.
    Open,
    /// One probe request allowed to test recovery.
    HalfOpen,
}

#[derive(Debug)]
enum BreakerPhase {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    phase: Mutex<BreakerPhase>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            phase: Mutex::new(BreakerPhase::Closed { failures: 0 }),
            failure_threshold,
            reset_timeout,
        }
    }

    pub fn can_execute(&self) -> bool {
        let mut phase = self.phase.lock().unwrap();
        match *phase {
            BreakerPhase::Closed { .. } | BreakerPhase::HalfOpen => true,
            BreakerPhase::Open { since } => {
                if since.elapsed() >= self.reset_timeout {
                    *phase = BreakerPhase::HalfOpen;
                    info!("circuit breaker transitioning to half-open");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut phase = self.phase.lock().unwrap();
        match *phase {
            BreakerPhase::HalfOpen => {
                *phase = BreakerPhase::Closed { failures: 0 };
                info!("circuit breaker recovered, closing");
            }
            BreakerPhase::Closed { ref mut failures } => *failures = 0,
            BreakerPhase::Open { .. } => {}
        }
    }

    pub fn record_failure(&self) {
        let mut phase = self.phase.lock().unwrap();
        match *phase {
            BreakerPhase::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.failure_threshold {
                    *phase = BreakerPhase::Open { since: Instant::now() };
                    error!(failures, "circuit breaker opened");
                } else {
                    *phase = BreakerPhase::Closed { failures };
                }
            }
            BreakerPhase::HalfOpen => {
                *phase = BreakerPhase::Open { since: Instant::now() };
                warn!("circuit breaker probe failed, reopening");
            }
            BreakerPhase::Open { .. } => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        match *self.phase.lock().unwrap() {
            BreakerPhase::Closed { .. } => CircuitState::Closed,
            BreakerPhase::Open { .. } => CircuitState::Open,
            BreakerPhase::HalfOpen => CircuitState::HalfOpen,
        }
    }
}

// --- gateway wire types ---

#[derive(Debug, Serialize)]
struct CreateOrderRequest {
    #[serde(rename = "merchantId")]
    merchant_id: String,
    token: String,
    amount: i64,
    #[serde(rename = "merchantTransactionId")]
    merchant_transaction_id: String,
    currency: String,
    description: String,
    #[serde(rename = "successURL")]
    success_url: String,
    #[serde(rename = "failURL")]
    fail_url: String,
    #[serde(rename = "notificationURL")]
    notification_url: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderResponse {
    pub success: bool,
    #[serde(rename = "transactionId")]
    pub transaction_id: Option<String>,
    #[serde(rename = "paymentURL")]
    pub payment_url: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
struct VerifyRequest {
    #[serde(rename = "merchantId")]
    merchant_id: String,
    token: String,
    #[serde(rename = "merchantTransactionId")]
    merchant_transaction_id: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub state: Option<String>,
    pub amount: Option<i64>,
    #[serde(rename = "transactionId")]
    pub transaction_id: Option<String>,
    pub message: Option<String>,
}

/// Explicitly constructed and injected at startup; holds no global state.
#[derive(Clone)]
pub struct PaymentGatewayClient {
    http: reqwest::Client,
    base_url: String,
    merchant_id: String,
    merchant_password: String,
    breaker: std::sync::Arc<CircuitBreaker>,
}

impl PaymentGatewayClient {
    pub fn from_config(config: &PaymentConfig, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build HTTP client"),
            base_url: config.gateway_url.clone(),
            merchant_id: config.merchant_id.clone(),
            merchant_password: config.merchant_password.clone(),
            breaker: std::sync::Arc::new(CircuitBreaker::new(failure_threshold, reset_timeout)),
        }
    }

    /// Request token: SHA-256 over the amount, currency, transaction id and
    /// the shared merchant secret, hex-encoded.
    fn request_token(&self, amount: i64, currency: &str, merchant_transaction_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(
            format!(
                "{amount}{currency}{merchant_transaction_id}{}{}",
                self.merchant_password, self.merchant_id
            )
            .as_bytes(),
        );
        format!("{:x}", hasher.finalize())
    }

    fn verify_token(&self, merchant_transaction_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(
            format!(
                "{merchant_transaction_id}{}{}",
                self.merchant_password, self.merchant_id
            )
            .as_bytes(),
        );
        format!("{:x}", hasher.finalize())
    }

    async fn execute<T>(
        &self,
        operation: impl Future<Output = Result<T, reqwest::Error>>,
    ) -> Result<T, CoreError> {
        if !self.breaker.can_execute() {
            warn!("circuit breaker is open, blocking gateway request");
            return Err(CoreError::Gateway("gateway temporarily unavailable".into()));
        }
        match operation.await {
            Ok(result) => {
                self.breaker.record_success();
                Ok(result)
            }
            Err(err) => {
                error!("gateway request failed: {err}");
                self.breaker.record_failure();
                Err(CoreError::Gateway(err.to_string()))
            }
        }
    }

    /// Create a payment order. `merchant_transaction_id` is the idempotency
    /// key the webhook will later reconcile against.
    pub async fn create_order(
        &self,
        amount: i64,
        merchant_transaction_id: &str,
        description: &str,
        success_url: &str,
        fail_url: &str,
        notification_url: &str,
    ) -> Result<CreateOrderResponse, CoreError> {
        let currency = "INR";
        let request = CreateOrderRequest {
            merchant_id: self.merchant_id.clone(),
            token: self.request_token(amount, currency, merchant_transaction_id),
            amount,
            merchant_transaction_id: merchant_transaction_id.to_string(),
            currency: currency.to_string(),
            description: description.to_string(),
            success_url: success_url.to_string(),
            fail_url: fail_url.to_string(),
            notification_url: notification_url.to_string(),
        };

        info!(merchant_transaction_id, amount, "creating gateway order");
        let operation = async {
            self.http
                .post(format!("{}/order/create", self.base_url))
                .json(&request)
                .send()
                .await?
                .json::<CreateOrderResponse>()
                .await
        };
        self.execute(operation).await
    }

    /// Ask the gateway for the current state of a transaction.
    pub async fn verify(&self, merchant_transaction_id: &str) -> Result<VerifyResponse, CoreError> {
        let request = VerifyRequest {
            merchant_id: self.merchant_id.clone(),
            token: self.verify_token(merchant_transaction_id),
            merchant_transaction_id: merchant_transaction_id.to_string(),
        };
        let operation = async {
            self.http
                .post(format!("{}/order/verify", self.base_url))
                .json(&request)
                .send()
                .await?
                .json::<VerifyResponse>()
                .await
        };
        self.execute(operation).await
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> PaymentConfig {
        PaymentConfig {
            merchant_id: "expo-merchant".to_string(),
            merchant_password: "secret".to_string(),
            gateway_url: base_url,
            success_url: "https://example.test/ok".to_string(),
            fail_url: "https://example.test/fail".to_string(),
            webhook_url: "https://example.test/hook".to_string(),
        }
    }

    #[tokio::test]
    async fn create_order_round_trips() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "transactionId": "gw-123",
                "paymentURL": "https://pay.example.test/gw-123",
            })))
            .mount(&server)
            .await;

        let client = PaymentGatewayClient::from_config(
            &config(server.uri()),
            5,
            Duration::from_secs(60),
        );
        let response = client
            .create_order(
                250_000,
                "sc-42",
                "stall service charge",
                "https://example.test/ok",
                "https://example.test/fail",
                "https://example.test/hook",
            )
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.transaction_id.as_deref(), Some("gw-123"));
        assert_eq!(client.breaker_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_blocks() {
        // Point at a closed port so every call fails fast.
        let client = PaymentGatewayClient::from_config(
            &config("http://127.0.0.1:1".to_string()),
            2,
            Duration::from_secs(60),
        );

        for _ in 0..2 {
            let err = client.verify("sc-1").await.unwrap_err();
            assert!(matches!(err, CoreError::Gateway(_)));
        }
        assert_eq!(client.breaker_state(), CircuitState::Open);

        // Third call is blocked without touching the network.
        let err = client.verify("sc-1").await.unwrap_err();
        assert!(matches!(err, CoreError::Gateway(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_half_opens_after_timeout() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
