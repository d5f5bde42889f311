use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use super::gateway::{AccountStatus, PaymentGatewayPort};
use super::models::ConnectedAccount;
use super::store::EarningsStore;
use crate::error::{AppError, AppResult};

/// key: connected-accounts -> trainer merchant onboarding
#[derive(Clone)]
pub struct ConnectedAccounts {
    store: Arc<dyn EarningsStore>,
    gateway: Arc<dyn PaymentGatewayPort>,
}

impl ConnectedAccounts {
    pub fn new(store: Arc<dyn EarningsStore>, gateway: Arc<dyn PaymentGatewayPort>) -> Self {
        Self { store, gateway }
    }

    pub async fn account_for(&self, owner_id: Uuid) -> AppResult<Option<ConnectedAccount>> {
        self.store.get_account(owner_id).await
    }

    async fn require_account(&self, owner_id: Uuid) -> AppResult<ConnectedAccount> {
        self.account_for(owner_id)
            .await?
            .ok_or_else(|| AppError::not_found("Connected account"))
    }

    /// Returns the owner's account, creating it at the gateway on first use.
    pub async fn create_account(&self, owner_id: Uuid, email: &str) -> AppResult<ConnectedAccount> {
        if let Some(existing) = self.account_for(owner_id).await? {
            return Ok(existing);
        }
        let account_ref = self.gateway.create_connected_account(owner_id, email).await?;
        let now = Utc::now();
        let account = self
            .store
            .insert_account(ConnectedAccount {
                owner_id,
                account_ref,
                charges_enabled: false,
                payouts_enabled: false,
                details_submitted: false,
                status: AccountStatus::default().label().to_string(),
                created_at: now,
                updated_at: now,
            })
            .await?;
        info!(%owner_id, account = %account.account_ref, "connected account created");
        Ok(account)
    }

    pub async fn onboarding_link(
        &self,
        owner_id: Uuid,
        return_url: &str,
        refresh_url: &str,
    ) -> AppResult<String> {
        let account = self.require_account(owner_id).await?;
        Ok(self
            .gateway
            .create_onboarding_link(&account.account_ref, return_url, refresh_url)
            .await?)
    }

    /// Pulls live status from the gateway and caches it locally.
    pub async fn refresh_status(&self, owner_id: Uuid) -> AppResult<ConnectedAccount> {
        let account = self.require_account(owner_id).await?;
        let status = self.gateway.get_account_status(&account.account_ref).await?;
        self.store
            .update_account_status(&account.account_ref, &status, Utc::now())
            .await?
            .ok_or_else(|| AppError::not_found("Connected account"))
    }

    pub async fn dashboard_link(&self, owner_id: Uuid) -> AppResult<String> {
        let account = self.require_account(owner_id).await?;
        Ok(self
            .gateway
            .create_dashboard_link(&account.account_ref)
            .await?)
    }

    /// Applies an `account.updated` push. Accounts this ledger does not know are ignored.
    pub async fn refresh_from_event(
        &self,
        account_ref: &str,
        status: &AccountStatus,
    ) -> AppResult<Option<ConnectedAccount>> {
        let updated = self
            .store
            .update_account_status(account_ref, status, Utc::now())
            .await?;
        match &updated {
            Some(account) => info!(
                owner_id = %account.owner_id,
                account = account_ref,
                charges_enabled = status.charges_enabled,
                "connected account status refreshed"
            ),
            None => debug!(account = account_ref, "account update for unknown account"),
        }
        Ok(updated)
    }
}
