use anyhow::{Context, Result};

use super::commission::{CommissionRate, CommissionRates};
use super::payouts::CreditPolicy;

/// key: earnings-settings -> ledger policy snapshot
#[derive(Debug, Clone)]
pub struct EarningsSettings {
    pub rates: CommissionRates,
    pub manual_currency: String,
    pub default_payout_method: String,
    pub credit_policy: CreditPolicy,
    pub webhook_secret: String,
}

impl EarningsSettings {
    /// Snapshots the environment; malformed rates or policies stop startup.
    pub fn from_env() -> Result<Self> {
        let manual: CommissionRate = crate::config::MANUAL_CHANNEL_TRAINER_RATE
            .parse()
            .context("MANUAL_CHANNEL_TRAINER_RATE")?;
        let gateway: CommissionRate = crate::config::GATEWAY_CHANNEL_TRAINER_RATE
            .parse()
            .context("GATEWAY_CHANNEL_TRAINER_RATE")?;
        let credit_policy: CreditPolicy = crate::config::PAYOUT_CREDIT_POLICY
            .parse()
            .context("PAYOUT_CREDIT_POLICY")?;
        Ok(Self {
            rates: CommissionRates { manual, gateway },
            manual_currency: crate::config::MANUAL_PAYMENT_CURRENCY.clone(),
            default_payout_method: crate::config::DEFAULT_PAYOUT_METHOD.clone(),
            credit_policy,
            webhook_secret: crate::config::GATEWAY_WEBHOOK_SECRET.clone(),
        })
    }
}

impl Default for EarningsSettings {
    fn default() -> Self {
        Self {
            rates: CommissionRates::default(),
            manual_currency: "usd".to_string(),
            default_payout_method: "mobile_money".to_string(),
            credit_policy: CreditPolicy::Accumulate,
            webhook_secret: String::new(),
        }
    }
}
