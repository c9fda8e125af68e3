use crate::{
    entities::product,
    errors::ServiceError,
    services::pricing::ensure_storable,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// What checkout and order creation need to know about a product
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductSnapshot {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub currency: String,
}

impl From<product::Model> for ProductSnapshot {
    fn from(model: product::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            price: model.price,
            currency: model.currency,
        }
    }
}

/// Resolves product ids to their current name and price.
/// Inactive products resolve to `None`.
#[async_trait]
pub trait ProductLookup: Send + Sync {
    async fn find_product(&self, id: Uuid) -> Result<Option<ProductSnapshot>, ServiceError>;
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub price: Decimal,
    #[validate(length(equal = 3))]
    pub currency: String,
}

#[derive(Clone)]
pub struct ProductCatalogService {
    db: Arc<DatabaseConnection>,
}

impl ProductCatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;
        ensure_price(input.price)?;

        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            price: Set(input.price),
            currency: Set(input.currency.to_lowercase()),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(product_id = %model.id, "Product created");
        Ok(model)
    }

    /// Changes the live price. Orders already placed keep their frozen price.
    #[instrument(skip(self))]
    pub async fn update_price(
        &self,
        product_id: Uuid,
        price: Decimal,
    ) -> Result<product::Model, ServiceError> {
        ensure_price(price)?;

        let existing = product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let mut active: product::ActiveModel = existing.into();
        active.price = Set(price);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        info!(product_id = %product_id, price = %price, "Product price updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn set_active(
        &self,
        product_id: Uuid,
        is_active: bool,
    ) -> Result<product::Model, ServiceError> {
        let existing = product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let mut active: product::ActiveModel = existing.into();
        active.is_active = Set(is_active);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }
}

fn ensure_price(price: Decimal) -> Result<(), ServiceError> {
    if price < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "price must not be negative".to_string(),
        ));
    }
    ensure_storable("price", price)
}

#[async_trait]
impl ProductLookup for ProductCatalogService {
    async fn find_product(&self, id: Uuid) -> Result<Option<ProductSnapshot>, ServiceError> {
        let found = product::Entity::find_by_id(id).one(&*self.db).await?;
        Ok(found
            .filter(|p| p.is_active)
            .map(ProductSnapshot::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    #[test]
    fn prices_must_fit_the_money_column() {
        assert!(ensure_price(dec!(19.99)).is_ok());
        assert_matches!(ensure_price(dec!(-0.01)), Err(ServiceError::ValidationError(_)));
        assert_matches!(
            ensure_price(dec!(1000000000000)),
            Err(ServiceError::ValidationError(_))
        );
    }
}
