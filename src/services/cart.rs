use crate::{
    entities::{cart_item, product},
    errors::ServiceError,
    events::{Event, EventSender},
    services::materializer::CartDeactivator,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Upper bound for a single cart line
const MAX_LINE_QUANTITY: i32 = 999;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddToCartInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
}

/// A cart line priced at the product's current price
#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub shopper_id: Uuid,
    pub items: Vec<CartLine>,
    pub subtotal: Decimal,
}

/// Shopper cart backed by `cart_items`.
///
/// A (shopper, product) pair has at most one live row; re-adding a product
/// increments that row. Removal soft-deletes, and checkout completion
/// deactivates, so past rows stay around for order history.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self, input), fields(product_id = %input.product_id, quantity = input.quantity))]
    pub async fn add_item(
        &self,
        shopper_id: Uuid,
        input: AddToCartInput,
    ) -> Result<cart_item::Model, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;

        let product = product::Entity::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        let now = Utc::now();
        let item = match find_live_item(&txn, shopper_id, product.id).await? {
            Some(existing) => {
                let quantity = existing.quantity.saturating_add(input.quantity);
                if quantity > MAX_LINE_QUANTITY {
                    return Err(ServiceError::ValidationError(format!(
                        "quantity for a single product cannot exceed {}",
                        MAX_LINE_QUANTITY
                    )));
                }
                let mut item: cart_item::ActiveModel = existing.into();
                item.quantity = Set(quantity);
                item.updated_at = Set(now);
                item.update(&txn).await?
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    shopper_id: Set(shopper_id),
                    product_id: Set(product.id),
                    quantity: Set(input.quantity),
                    is_active: Set(true),
                    deleted_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?
            }
        };

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                shopper_id,
                product_id: product.id,
                quantity: input.quantity,
            })
            .await;

        info!(
            "Added item to cart of shopper {}: product {} x{}",
            shopper_id, product.id, input.quantity
        );
        Ok(item)
    }

    /// Sets the quantity of a live line. Zero removes the line; the result is
    /// `None` in that case.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        shopper_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<Option<cart_item::Model>, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "quantity must not be negative".to_string(),
            ));
        }
        if quantity > MAX_LINE_QUANTITY {
            return Err(ServiceError::ValidationError(format!(
                "quantity for a single product cannot exceed {}",
                MAX_LINE_QUANTITY
            )));
        }
        if quantity == 0 {
            self.remove_item(shopper_id, product_id).await?;
            return Ok(None);
        }

        let existing = find_live_item(&*self.db, shopper_id, product_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} is not in the cart", product_id))
            })?;

        let mut item: cart_item::ActiveModel = existing.into();
        item.quantity = Set(quantity);
        item.updated_at = Set(Utc::now());
        Ok(Some(item.update(&*self.db).await?))
    }

    /// Soft-deletes the live line for `product_id`
    #[instrument(skip(self))]
    pub async fn remove_item(&self, shopper_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        let existing = find_live_item(&*self.db, shopper_id, product_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} is not in the cart", product_id))
            })?;

        let now = Utc::now();
        let mut item: cart_item::ActiveModel = existing.into();
        item.deleted_at = Set(Some(now));
        item.updated_at = Set(now);
        item.update(&*self.db).await?;

        info!("Removed product {} from cart of shopper {}", product_id, shopper_id);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_active_items(
        &self,
        shopper_id: Uuid,
    ) -> Result<Vec<cart_item::Model>, ServiceError> {
        Ok(live_items(shopper_id)
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Live cart lines priced at current product prices
    #[instrument(skip(self))]
    pub async fn get_cart(&self, shopper_id: Uuid) -> Result<CartView, ServiceError> {
        let rows = live_items(shopper_id)
            .order_by_asc(cart_item::Column::CreatedAt)
            .find_also_related(product::Entity)
            .all(&*self.db)
            .await?;

        let items: Vec<CartLine> = rows
            .into_iter()
            .filter_map(|(item, product)| {
                product.map(|p| CartLine {
                    product_id: item.product_id,
                    product_name: p.name,
                    unit_price: p.price,
                    quantity: item.quantity,
                    line_total: p.price * Decimal::from(item.quantity),
                })
            })
            .collect();
        let subtotal = items.iter().map(|line| line.line_total).sum();

        Ok(CartView {
            shopper_id,
            items,
            subtotal,
        })
    }

    /// Marks every live line inactive. Rows are kept, not deleted.
    /// Returns how many rows changed; zero is not an error.
    #[instrument(skip(self))]
    pub async fn deactivate_all(&self, shopper_id: Uuid) -> Result<u64, ServiceError> {
        let result = cart_item::Entity::update_many()
            .col_expr(cart_item::Column::IsActive, Expr::value(false))
            .col_expr(cart_item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart_item::Column::ShopperId.eq(shopper_id))
            .filter(cart_item::Column::IsActive.eq(true))
            .filter(cart_item::Column::DeletedAt.is_null())
            .exec(&*self.db)
            .await?;

        let items = result.rows_affected;
        if items > 0 {
            info!(shopper_id = %shopper_id, items, "Cart deactivated");
            self.event_sender
                .send_or_log(Event::CartDeactivated { shopper_id, items })
                .await;
        }
        Ok(items)
    }
}

fn live_items(shopper_id: Uuid) -> sea_orm::Select<cart_item::Entity> {
    cart_item::Entity::find()
        .filter(cart_item::Column::ShopperId.eq(shopper_id))
        .filter(cart_item::Column::IsActive.eq(true))
        .filter(cart_item::Column::DeletedAt.is_null())
}

async fn find_live_item<C: ConnectionTrait>(
    conn: &C,
    shopper_id: Uuid,
    product_id: Uuid,
) -> Result<Option<cart_item::Model>, ServiceError> {
    Ok(live_items(shopper_id)
        .filter(cart_item::Column::ProductId.eq(product_id))
        .one(conn)
        .await?)
}

#[async_trait]
impl CartDeactivator for CartService {
    async fn deactivate_all(&self, shopper_id: Uuid) -> Result<u64, ServiceError> {
        CartService::deactivate_all(self, shopper_id).await
    }
}
