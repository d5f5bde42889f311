use std::sync::Arc;

use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::models::{BillingInterval, Money, PricingPlan, MAX_AMOUNT};
use super::store::{EarningsStore, NewPlan};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
pub struct PlanDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Money,
    pub currency: String,
    pub interval: BillingInterval,
    #[serde(default)]
    pub duration_weeks: Option<i32>,
}

/// Fields a trainer may change on an existing plan. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Money>,
    pub interval: Option<BillingInterval>,
    pub duration_weeks: Option<i32>,
    pub active: Option<bool>,
}

/// Longest fixed term a plan may run, about ten years.
pub const MAX_DURATION_WEEKS: i32 = 520;

fn validate_price(price: Money) -> AppResult<()> {
    if price <= 0 {
        return Err(AppError::Validation("Plan price must be positive".into()));
    }
    if price > MAX_AMOUNT {
        return Err(AppError::Validation(format!(
            "Plan price cannot exceed {MAX_AMOUNT}"
        )));
    }
    Ok(())
}

fn validate_duration(duration_weeks: Option<i32>) -> AppResult<()> {
    match duration_weeks {
        Some(weeks) if weeks <= 0 || weeks > MAX_DURATION_WEEKS => Err(AppError::Validation(
            format!("Plan duration must be between 1 and {MAX_DURATION_WEEKS} weeks"),
        )),
        _ => Ok(()),
    }
}

/// key: pricing-catalog -> trainer-owned offers
#[derive(Clone)]
pub struct PricingCatalog {
    store: Arc<dyn EarningsStore>,
}

impl PricingCatalog {
    pub fn new(store: Arc<dyn EarningsStore>) -> Self {
        Self { store }
    }

    pub async fn create_plan(&self, trainer_id: Uuid, draft: PlanDraft) -> AppResult<PricingPlan> {
        validate_price(draft.price)?;
        validate_duration(draft.duration_weeks)?;
        let name = draft.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("Plan name is required".into()));
        }
        let plan = self
            .store
            .insert_plan(NewPlan {
                trainer_id,
                name,
                description: draft.description,
                price: draft.price,
                currency: draft.currency.trim().to_ascii_lowercase(),
                interval: draft.interval,
                duration_weeks: draft.duration_weeks,
            })
            .await?;
        info!(%trainer_id, plan = %plan.id, price = plan.price, "pricing plan created");
        Ok(plan)
    }

    /// Loads a plan the caller owns.
    async fn owned_plan(&self, plan_id: Uuid, trainer_id: Uuid) -> AppResult<PricingPlan> {
        let plan = self
            .store
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| AppError::not_found("Plan"))?;
        if plan.trainer_id != trainer_id {
            return Err(AppError::Forbidden("Plan belongs to another trainer".into()));
        }
        Ok(plan)
    }

    pub async fn update_plan(
        &self,
        plan_id: Uuid,
        trainer_id: Uuid,
        patch: PlanPatch,
    ) -> AppResult<PricingPlan> {
        let mut plan = self.owned_plan(plan_id, trainer_id).await?;
        if let Some(name) = patch.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(AppError::Validation("Plan name is required".into()));
            }
            plan.name = name;
        }
        if let Some(description) = patch.description {
            plan.description = Some(description);
        }
        if let Some(price) = patch.price {
            validate_price(price)?;
            plan.price = price;
        }
        if let Some(interval) = patch.interval {
            plan.interval = interval;
        }
        if patch.duration_weeks.is_some() {
            validate_duration(patch.duration_weeks)?;
            plan.duration_weeks = patch.duration_weeks;
        }
        if let Some(active) = patch.active {
            plan.active = active;
        }
        self.store.update_plan(&plan).await
    }

    /// Soft delete. Subscriptions already sold keep pointing at the plan.
    pub async fn deactivate_plan(&self, plan_id: Uuid, trainer_id: Uuid) -> AppResult<PricingPlan> {
        let mut plan = self.owned_plan(plan_id, trainer_id).await?;
        if !plan.active {
            return Ok(plan);
        }
        plan.active = false;
        let plan = self.store.update_plan(&plan).await?;
        info!(%trainer_id, plan = %plan.id, "pricing plan deactivated");
        Ok(plan)
    }

    /// Public listing, cheapest first.
    pub async fn list_active_plans(&self, trainer_id: Uuid) -> AppResult<Vec<PricingPlan>> {
        let mut plans = self.store.list_plans(trainer_id, false).await?;
        plans.sort_by_key(|plan| plan.price);
        Ok(plans)
    }

    pub async fn list_all_plans(
        &self,
        trainer_id: Uuid,
        include_inactive: bool,
    ) -> AppResult<Vec<PricingPlan>> {
        let mut plans = self.store.list_plans(trainer_id, include_inactive).await?;
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(plans)
    }

    pub async fn get_plan(&self, plan_id: Uuid) -> AppResult<PricingPlan> {
        self.store
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| AppError::not_found("Plan"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::earnings::store::MemoryEarningsStore;

    fn draft(price: Money) -> PlanDraft {
        PlanDraft {
            name: "Strength block".into(),
            description: None,
            price,
            currency: "USD".into(),
            interval: BillingInterval::Month,
            duration_weeks: None,
        }
    }

    fn catalog() -> PricingCatalog {
        PricingCatalog::new(Arc::new(MemoryEarningsStore::new()))
    }

    #[tokio::test]
    async fn rejects_non_positive_price() {
        let catalog = catalog();
        for price in [0, -100] {
            let err = catalog.create_plan(Uuid::new_v4(), draft(price)).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn rejects_out_of_range_price_and_duration() {
        let catalog = catalog();
        let owner = Uuid::new_v4();
        let err = catalog.create_plan(owner, draft(MAX_AMOUNT + 1)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        for weeks in [0, MAX_DURATION_WEEKS + 1, i32::MAX] {
            let err = catalog
                .create_plan(
                    owner,
                    PlanDraft {
                        interval: BillingInterval::OneTime,
                        duration_weeks: Some(weeks),
                        ..draft(5000)
                    },
                )
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
        assert!(catalog.list_all_plans(owner, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_owner_may_update() {
        let catalog = catalog();
        let owner = Uuid::new_v4();
        let plan = catalog.create_plan(owner, draft(5000)).await.unwrap();
        assert_eq!(plan.currency, "usd");

        let err = catalog
            .update_plan(plan.id, Uuid::new_v4(), PlanPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = catalog
            .update_plan(Uuid::new_v4(), owner, PlanPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let updated = catalog
            .update_plan(
                plan.id,
                owner,
                PlanPatch {
                    price: Some(4500),
                    ..PlanPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.price, 4500);
        assert_eq!(updated.name, "Strength block");
    }

    #[tokio::test]
    async fn deactivated_plans_leave_public_listing() {
        let catalog = catalog();
        let owner = Uuid::new_v4();
        let pricey = catalog.create_plan(owner, draft(9000)).await.unwrap();
        let cheap = catalog.create_plan(owner, draft(3000)).await.unwrap();
        let retired = catalog.create_plan(owner, draft(1000)).await.unwrap();
        catalog.deactivate_plan(retired.id, owner).await.unwrap();

        let public: Vec<Uuid> = catalog
            .list_active_plans(owner)
            .await
            .unwrap()
            .into_iter()
            .map(|plan| plan.id)
            .collect();
        assert_eq!(public, vec![cheap.id, pricey.id]);
        assert_eq!(catalog.list_all_plans(owner, true).await.unwrap().len(), 3);
        assert_eq!(catalog.list_all_plans(owner, false).await.unwrap().len(), 2);
        assert!(!catalog.get_plan(retired.id).await.unwrap().active);
    }
}
