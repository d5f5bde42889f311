use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Secret used to verify session JWTs. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> =
    Lazy::new(|| read_flag_env("ALLOW_MIGRATION_FAILURE"));

/// Storage backend for the earnings ledger: `postgres` (default) or `memory`.
pub static EARNINGS_STORE: Lazy<String> = Lazy::new(|| {
    read_optional_env("EARNINGS_STORE")
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_else(|| "postgres".to_string())
});

/// Lowercased emails granted admin access regardless of their token role.
pub static ADMIN_EMAILS: Lazy<HashSet<String>> = Lazy::new(|| {
    std::env::var("ADMIN_EMAILS")
        .ok()
        .map(|value| {
            value
                .split(',')
                .filter_map(|item| {
                    let trimmed = item.trim().to_ascii_lowercase();
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(trimmed)
                    }
                })
                .collect::<HashSet<_>>()
        })
        .unwrap_or_default()
});

/// key: gateway-config -> REST base url of the card gateway
pub static GATEWAY_API_BASE: Lazy<String> = Lazy::new(|| {
    read_optional_env("GATEWAY_API_BASE").unwrap_or_else(|| "https://api.stripe.com".to_string())
});

/// key: gateway-config -> platform secret key presented as bearer token
pub static GATEWAY_SECRET_KEY: Lazy<String> =
    Lazy::new(|| read_optional_env("GATEWAY_SECRET_KEY").unwrap_or_default());

/// key: gateway-config -> shared webhook signing secret; empty refuses every delivery
pub static GATEWAY_WEBHOOK_SECRET: Lazy<String> =
    Lazy::new(|| read_optional_env("GATEWAY_WEBHOOK_SECRET").unwrap_or_default());

/// Maximum age of a signed webhook timestamp, in seconds.
pub static GATEWAY_WEBHOOK_TOLERANCE_SECS: Lazy<i64> = Lazy::new(|| {
    std::env::var("GATEWAY_WEBHOOK_TOLERANCE_SECS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(300)
});

/// Per-request timeout for gateway calls.
pub static GATEWAY_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("GATEWAY_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(10)
});

/// Attempts per gateway call, first try included.
pub static GATEWAY_MAX_ATTEMPTS: Lazy<u32> = Lazy::new(|| {
    std::env::var("GATEWAY_MAX_ATTEMPTS")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(3)
});

/// Initial backoff between gateway retries; doubles per attempt.
pub static GATEWAY_RETRY_BASE_MS: Lazy<u64> = Lazy::new(|| {
    std::env::var("GATEWAY_RETRY_BASE_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(200)
});

/// key: commission-config -> trainer share for approved manual receipts
pub static MANUAL_CHANNEL_TRAINER_RATE: Lazy<String> = Lazy::new(|| {
    read_optional_env("MANUAL_CHANNEL_TRAINER_RATE").unwrap_or_else(|| "0.90".to_string())
});

/// key: commission-config -> trainer share for card gateway payments
pub static GATEWAY_CHANNEL_TRAINER_RATE: Lazy<String> = Lazy::new(|| {
    read_optional_env("GATEWAY_CHANNEL_TRAINER_RATE").unwrap_or_else(|| "0.70".to_string())
});

/// Currency of the manual payment channel (single currency per deployment).
pub static MANUAL_PAYMENT_CURRENCY: Lazy<String> = Lazy::new(|| {
    read_optional_env("MANUAL_PAYMENT_CURRENCY")
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_else(|| "usd".to_string())
});

/// Method recorded on payouts created by approval credits.
pub static DEFAULT_PAYOUT_METHOD: Lazy<String> = Lazy::new(|| {
    read_optional_env("DEFAULT_PAYOUT_METHOD")
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_else(|| "mobile_money".to_string())
});

/// key: payout-config -> `accumulate` (default) or `per_credit`
pub static PAYOUT_CREDIT_POLICY: Lazy<String> = Lazy::new(|| {
    read_optional_env("PAYOUT_CREDIT_POLICY")
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_else(|| "accumulate".to_string())
});

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_flag_env(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
}
