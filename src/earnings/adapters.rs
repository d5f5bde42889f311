use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::gateway::{
    decode_event, is_valid_reference, verify_signature, AccountStatus, CreatedIntent,
    GatewayError, GatewayEvent, IntentSnapshot, PaymentGatewayPort, PaymentIntentRequest,
    RawIntent,
};

/// Bounded exponential backoff for gateway calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Runs `call` until it succeeds, fails permanently, or the attempt budget is spent.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "gateway call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// key: gateway-settings -> adapter construction inputs
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub api_base: String,
    pub secret_key: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub webhook_tolerance_secs: i64,
}

impl GatewaySettings {
    pub fn from_env() -> Self {
        Self {
            api_base: crate::config::GATEWAY_API_BASE.trim_end_matches('/').to_string(),
            secret_key: crate::config::GATEWAY_SECRET_KEY.clone(),
            timeout: Duration::from_secs(*crate::config::GATEWAY_TIMEOUT_SECS),
            retry: RetryPolicy {
                max_attempts: *crate::config::GATEWAY_MAX_ATTEMPTS,
                base_delay: Duration::from_millis(*crate::config::GATEWAY_RETRY_BASE_MS),
                ..RetryPolicy::default()
            },
            webhook_tolerance_secs: *crate::config::GATEWAY_WEBHOOK_TOLERANCE_SECS,
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            api_base: "https://api.stripe.com".to_string(),
            secret_key: String::new(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            webhook_tolerance_secs: 300,
        }
    }
}

/// key: gateway-adapter-http -> Stripe-compatible REST client
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    settings: GatewaySettings,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct UrlResponse {
    url: String,
}

#[derive(Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: Option<String>,
}

#[derive(Deserialize)]
struct AccountResponse {
    #[serde(default)]
    charges_enabled: bool,
    #[serde(default)]
    payouts_enabled: bool,
    #[serde(default)]
    details_submitted: bool,
}

impl HttpGateway {
    pub fn new(settings: GatewaySettings) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self { client, settings })
    }

    fn request(&self, method: Method, path: &str, idempotency_key: Option<&str>) -> RequestBuilder {
        let url = format!("{}{}", self.settings.api_base, path);
        let mut builder = self
            .client
            .request(method, url)
            .bearer_auth(&self.settings.secret_key);
        if let Some(key) = idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }
        builder
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, GatewayError> {
        // One key per logical call so retried POSTs are deduplicated by the gateway.
        let idempotency_key =
            (method == Method::POST).then(|| Uuid::new_v4().to_string());
        with_retry(&self.settings.retry, operation, || {
            let mut builder =
                self.request(method.clone(), path, idempotency_key.as_deref());
            if !form.is_empty() {
                builder = builder.form(form);
            }
            async move {
                let response = builder.send().await?;
                decode_response(response).await
            }
        })
        .await
    }
}

async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Api {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|err| GatewayError::InvalidResponse(err.to_string()))
}

/// Guards ids interpolated into a request path.
fn reference(value: &str) -> Result<&str, GatewayError> {
    if is_valid_reference(value) {
        Ok(value)
    } else {
        Err(GatewayError::InvalidReference(value.to_string()))
    }
}

fn field(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

#[async_trait]
impl PaymentGatewayPort for HttpGateway {
    async fn create_connected_account(
        &self,
        owner_id: Uuid,
        email: &str,
    ) -> Result<String, GatewayError> {
        let form = vec![
            field("type", "express"),
            field("email", email),
            field("business_type", "individual"),
            field("capabilities[card_payments][requested]", "true"),
            field("capabilities[transfers][requested]", "true"),
            field("metadata[owner_id]", owner_id.to_string()),
        ];
        let account: IdResponse = self
            .send("create_connected_account", Method::POST, "/v1/accounts", &form)
            .await?;
        debug!(%owner_id, account = %account.id, "gateway connected account created");
        Ok(account.id)
    }

    async fn create_onboarding_link(
        &self,
        account_ref: &str,
        return_url: &str,
        refresh_url: &str,
    ) -> Result<String, GatewayError> {
        let form = vec![
            field("account", account_ref),
            field("type", "account_onboarding"),
            field("return_url", return_url),
            field("refresh_url", refresh_url),
        ];
        let link: UrlResponse = self
            .send("create_onboarding_link", Method::POST, "/v1/account_links", &form)
            .await?;
        Ok(link.url)
    }

    async fn get_account_status(&self, account_ref: &str) -> Result<AccountStatus, GatewayError> {
        let path = format!("/v1/accounts/{}", reference(account_ref)?);
        let account: AccountResponse = self
            .send("get_account_status", Method::GET, &path, &[])
            .await?;
        Ok(AccountStatus {
            charges_enabled: account.charges_enabled,
            payouts_enabled: account.payouts_enabled,
            details_submitted: account.details_submitted,
        })
    }

    async fn create_dashboard_link(&self, account_ref: &str) -> Result<String, GatewayError> {
        let path = format!("/v1/accounts/{}/login_links", reference(account_ref)?);
        let link: UrlResponse = self
            .send("create_dashboard_link", Method::POST, &path, &[])
            .await?;
        Ok(link.url)
    }

    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<CreatedIntent, GatewayError> {
        let mut form = vec![
            field("amount", request.amount.to_string()),
            field("currency", request.currency.as_str()),
            field("transfer_data[destination]", request.destination_account_ref.as_str()),
            field("application_fee_amount", request.platform_fee_amount.to_string()),
            field("automatic_payment_methods[enabled]", "true"),
        ];
        let metadata = [
            ("plan_id", request.metadata.plan_id),
            ("client_id", request.metadata.client_id),
            ("trainer_id", request.metadata.trainer_id),
        ];
        for (key, value) in metadata {
            if let Some(value) = value {
                form.push(field(&format!("metadata[{key}]"), value.to_string()));
            }
        }
        let intent: IntentResponse = self
            .send("create_payment_intent", Method::POST, "/v1/payment_intents", &form)
            .await?;
        let client_secret = intent.client_secret.ok_or_else(|| {
            GatewayError::InvalidResponse("payment intent without client_secret".into())
        })?;
        Ok(CreatedIntent {
            intent_id: intent.id,
            client_secret,
        })
    }

    async fn retrieve_payment_intent(
        &self,
        intent_id: &str,
    ) -> Result<IntentSnapshot, GatewayError> {
        let path = format!(
            "/v1/payment_intents/{}?expand[]=latest_charge",
            reference(intent_id)?
        );
        let intent: RawIntent = self
            .send("retrieve_payment_intent", Method::GET, &path, &[])
            .await?;
        Ok(intent.into())
    }

    async fn cancel_subscription(&self, external_ref: &str) -> Result<(), GatewayError> {
        let path = format!("/v1/subscriptions/{}", reference(external_ref)?);
        let _: IdResponse = self
            .send("cancel_subscription", Method::DELETE, &path, &[])
            .await?;
        Ok(())
    }

    fn verify_webhook_signature(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
        secret: &str,
    ) -> Result<GatewayEvent, GatewayError> {
        verify_signature(
            raw_payload,
            signature_header,
            secret,
            self.settings.webhook_tolerance_secs,
            Utc::now().timestamp(),
        )?;
        decode_event(raw_payload)
    }
}
