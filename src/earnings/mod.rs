//! Coaching marketplace earnings: plans, subscriptions, gateway and manual payments,
//! commission, payouts and the dashboards over them.

pub mod accounts;
pub mod adapters;
pub mod admin;
pub mod aggregator;
pub mod api;
pub mod catalog;
pub mod commission;
pub mod gateway;
pub mod manual;
pub mod models;
pub mod payouts;
pub mod recorder;
pub mod settings;
pub mod store;
pub mod subscriptions;

use std::sync::Arc;

pub use accounts::ConnectedAccounts;
pub use adapters::{GatewaySettings, HttpGateway, RetryPolicy};
pub use aggregator::{EarningsAggregator, PlatformSummary, TrainerSummary};
pub use catalog::{PlanDraft, PlanPatch, PricingCatalog};
pub use commission::{split, CommissionRate, CommissionRates, CommissionSplit};
pub use gateway::{GatewayError, GatewayEvent, PaymentGatewayPort};
pub use manual::{ApprovedPayment, ManualPaymentApprovalQueue, ManualPaymentSubmission};
pub use payouts::{CreditPolicy, PayoutLedger};
pub use recorder::{GatewayEarnings, PaymentRecorder, ProcessingResult};
pub use settings::EarningsSettings;
pub use store::{EarningsStore, MemoryEarningsStore, PgEarningsStore};
pub use subscriptions::SubscriptionLedger;

/// key: earnings-engine -> services wired over one store and one gateway
///
/// Cloned into every request through an `Extension` layer; all members share the same
/// `Arc`ed store and gateway.
#[derive(Clone)]
pub struct EarningsEngine {
    pub catalog: PricingCatalog,
    pub subscriptions: SubscriptionLedger,
    pub accounts: ConnectedAccounts,
    pub recorder: PaymentRecorder,
    pub manual: ManualPaymentApprovalQueue,
    pub payouts: PayoutLedger,
    pub aggregator: EarningsAggregator,
}

impl EarningsEngine {
    pub fn new(
        store: Arc<dyn EarningsStore>,
        gateway: Arc<dyn PaymentGatewayPort>,
        settings: EarningsSettings,
    ) -> Self {
        let catalog = PricingCatalog::new(store.clone());
        let subscriptions = SubscriptionLedger::new(store.clone(), catalog.clone(), gateway.clone());
        let accounts = ConnectedAccounts::new(store.clone(), gateway.clone());
        let payouts = PayoutLedger::new(
            store.clone(),
            settings.credit_policy,
            settings.default_payout_method.clone(),
        );
        let recorder = PaymentRecorder::new(
            store.clone(),
            gateway,
            catalog.clone(),
            subscriptions.clone(),
            accounts.clone(),
            settings.rates.gateway,
            settings.webhook_secret.clone(),
        );
        let manual = ManualPaymentApprovalQueue::new(
            store.clone(),
            catalog.clone(),
            subscriptions.clone(),
            payouts.clone(),
            settings.rates.manual,
            settings.manual_currency.clone(),
        );
        let aggregator = EarningsAggregator::new(store, settings.rates);

        Self {
            catalog,
            subscriptions,
            accounts,
            recorder,
            manual,
            payouts,
            aggregator,
        }
    }
}
