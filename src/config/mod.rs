use serde::Deserialize;
use std::env;

// Top-level configuration container, populated from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub payment: PaymentConfig,
    pub webhook: WebhookConfig,
    pub settlement: SettlementConfig,
    pub hold: HoldConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Absent means the in-memory store backs the process.
    pub url: Option<String>,
    pub pool_size: u32,
    /// How long a claim may wait for a pool connection before failing; the
    /// booking hot path prefers a fast 500 over a stalled request.
    pub acquire_timeout_seconds: u64,
}

// Payment gateway credentials and redirect URLs.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub merchant_id: String,
    pub merchant_password: String,
    pub gateway_url: String,
    pub success_url: String,
    pub fail_url: String,
    pub webhook_url: String,
}

// Shared secret the gateway signs callbacks with.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub username: String,
    pub password: String,
}

// Admission control for outbound gateway calls.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    pub max_concurrent: usize,
    pub timeout_seconds: u64,
}

// Reservation hold and payment expiry windows.
#[derive(Debug, Clone, Deserialize)]
pub struct HoldConfig {
    pub hold_seconds: u64,
    pub payment_timeout_seconds: u64,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

// Credentials that mark a caller as an exhibition operator.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    pub username: String,
    pub password: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: &str) -> T
where
    T::Err: std::fmt::Debug,
{
    env_or(key, default)
        .parse()
        .unwrap_or_else(|e| panic!("{key} must be a valid value: {e:?}"))
}

impl AppConfig {
    /// Socket address string the server binds, `HOST:PORT`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env_or("HOST", "0.0.0.0"),
                port: env_parse("PORT", "8000"),
                environment: env_or("ENVIRONMENT", "development"),
                rust_log: env_or("RUST_LOG", "stall_system=debug,tower_http=debug"),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok(),
                pool_size: env_parse("DB_POOL_SIZE", "20"),
                acquire_timeout_seconds: env_parse("DB_ACQUIRE_TIMEOUT_SECONDS", "5"),
            },
            payment: PaymentConfig {
                merchant_id: env_or("MERCHANT_ID", "expo-merchant"),
                merchant_password: env_or("MERCHANT_PASSWORD", "change-me"),
                gateway_url: env_or("PAYMENT_GATEWAY_URL", "https://gateway.example.com/api/v1"),
                success_url: env_or("PAYMENT_SUCCESS_URL", "https://example.com/payment/success"),
                fail_url: env_or("PAYMENT_FAIL_URL", "https://example.com/payment/fail"),
                webhook_url: env_or(
                    "PAYMENT_WEBHOOK_URL",
                    "https://example.com/api/service-charge/gateway-callback",
                ),
            },
            webhook: WebhookConfig {
                username: env_or("WEBHOOK_USERNAME", "expo-merchant"),
                password: env_or("WEBHOOK_PASSWORD", "change-me"),
            },
            settlement: SettlementConfig {
                // Tuned range is 150-250 concurrent financial operations.
                max_concurrent: env_parse("SETTLEMENT_MAX_CONCURRENT", "200"),
                timeout_seconds: env_parse("SETTLEMENT_TIMEOUT_SECONDS", "150"),
            },
            hold: HoldConfig {
                hold_seconds: env_parse("RESERVATION_HOLD_SECONDS", "900"),
                payment_timeout_seconds: env_parse("PAYMENT_TIMEOUT_SECONDS", "900"),
                sweep_interval_seconds: env_parse("SWEEP_INTERVAL_SECONDS", "60"),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: env_parse("CIRCUIT_BREAKER_FAILURE_THRESHOLD", "5"),
                timeout_seconds: env_parse("CIRCUIT_BREAKER_TIMEOUT_SECONDS", "60"),
            },
            admin: AdminConfig {
                username: env_or("ADMIN_USERNAME", "admin"),
                password: env_or("ADMIN_PASSWORD", "change-me"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_env() {
        let config = Config::from_env();
        assert_eq!(config.database.acquire_timeout_seconds, 5);
        assert_eq!(config.settlement.max_concurrent, 200);
        assert_eq!(config.hold.hold_seconds, 900);
        assert!(!config.app.bind_addr().is_empty());
    }
}
