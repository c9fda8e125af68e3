use crate::{
    entities::{address, shopper_address},
    errors::ServiceError,
    events::{Event, EventSender},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddAddressInput {
    #[validate(length(min = 1, max = 255))]
    pub recipient_name: String,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub line1: String,
    #[validate(length(max = 255))]
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub state: String,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateAddressInput {
    #[validate(length(min = 1, max = 255))]
    pub recipient_name: Option<String>,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub line1: Option<String>,
    #[validate(length(max = 255))]
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub state: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: Option<String>,
}

/// An address as one shopper sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShopperAddress {
    pub address_id: Uuid,
    pub recipient_name: String,
    pub phone: Option<String>,
    pub is_default: bool,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub created_at: DateTime<Utc>,
}

impl ShopperAddress {
    fn from_parts(link: shopper_address::Model, address: address::Model) -> Self {
        Self {
            address_id: address.id,
            recipient_name: link.recipient_name,
            phone: link.phone,
            is_default: link.is_default,
            line1: address.line1,
            line2: address.line2,
            city: address.city,
            state: address.state,
            postal_code: address.postal_code,
            created_at: link.created_at,
        }
    }
}

/// Resolves an address in the context of the shopper who ships to it
#[async_trait]
pub trait AddressLookup: Send + Sync {
    async fn find_shopper_address(
        &self,
        shopper_id: Uuid,
        address_id: Uuid,
    ) -> Result<Option<ShopperAddress>, ServiceError>;
}

#[derive(Clone)]
pub struct AddressService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl AddressService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Adds an address to the shopper's book. The first address, or one
    /// requested as default, becomes the single default.
    #[instrument(skip(self, input))]
    pub async fn add_address(
        &self,
        shopper_id: Uuid,
        input: AddAddressInput,
    ) -> Result<ShopperAddress, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        let now = Utc::now();

        let address = address::ActiveModel {
            id: Set(Uuid::new_v4()),
            line1: Set(input.line1),
            line2: Set(input.line2),
            city: Set(input.city),
            state: Set(input.state),
            postal_code: Set(input.postal_code),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let existing = shopper_address::Entity::find()
            .filter(shopper_address::Column::ShopperId.eq(shopper_id))
            .count(&txn)
            .await?;
        let make_default = input.is_default || existing == 0;

        if make_default {
            clear_defaults(&txn, shopper_id, None).await?;
        }

        let link = shopper_address::ActiveModel {
            id: Set(Uuid::new_v4()),
            shopper_id: Set(shopper_id),
            address_id: Set(address.id),
            recipient_name: Set(input.recipient_name),
            phone: Set(input.phone),
            is_default: Set(make_default),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(shopper_id = %shopper_id, address_id = %address.id, is_default = make_default, "Address added");
        if make_default {
            self.event_sender
                .send_or_log(Event::DefaultAddressChanged {
                    shopper_id,
                    address_id: address.id,
                })
                .await;
        }

        Ok(ShopperAddress::from_parts(link, address))
    }

    /// Lists the shopper's addresses, default first
    #[instrument(skip(self))]
    pub async fn list_addresses(&self, shopper_id: Uuid) -> Result<Vec<ShopperAddress>, ServiceError> {
        let rows = shopper_address::Entity::find()
            .filter(shopper_address::Column::ShopperId.eq(shopper_id))
            .order_by_desc(shopper_address::Column::IsDefault)
            .order_by_asc(shopper_address::Column::CreatedAt)
            .find_also_related(address::Entity)
            .all(&*self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(link, address)| address.map(|a| ShopperAddress::from_parts(link, a)))
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn get_default(&self, shopper_id: Uuid) -> Result<Option<ShopperAddress>, ServiceError> {
        let row = shopper_address::Entity::find()
            .filter(shopper_address::Column::ShopperId.eq(shopper_id))
            .filter(shopper_address::Column::IsDefault.eq(true))
            .find_also_related(address::Entity)
            .one(&*self.db)
            .await?;

        Ok(row.and_then(|(link, address)| address.map(|a| ShopperAddress::from_parts(link, a))))
    }

    /// Makes `address_id` the shopper's only default. Clearing the old
    /// default and setting the new one happen in one transaction.
    #[instrument(skip(self))]
    pub async fn set_default(
        &self,
        shopper_id: Uuid,
        address_id: Uuid,
    ) -> Result<ShopperAddress, ServiceError> {
        let txn = self.db.begin().await?;

        let link = find_link(&txn, shopper_id, address_id).await?;
        clear_defaults(&txn, shopper_id, Some(link.id)).await?;

        let mut active: shopper_address::ActiveModel = link.into();
        active.is_default = Set(true);
        active.updated_at = Set(Utc::now());
        let link = active.update(&txn).await?;

        let address = address::Entity::find_by_id(address_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", address_id)))?;

        txn.commit().await?;

        info!(shopper_id = %shopper_id, address_id = %address_id, "Default address changed");
        self.event_sender
            .send_or_log(Event::DefaultAddressChanged {
                shopper_id,
                address_id,
            })
            .await;

        Ok(ShopperAddress::from_parts(link, address))
    }

    /// Edits the canonical address and the shopper's link fields.
    /// Existing orders keep the snapshot taken when they were placed.
    #[instrument(skip(self, input))]
    pub async fn update_address(
        &self,
        shopper_id: Uuid,
        address_id: Uuid,
        input: UpdateAddressInput,
    ) -> Result<ShopperAddress, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        let now = Utc::now();

        let link = find_link(&txn, shopper_id, address_id).await?;
        let address = address::Entity::find_by_id(address_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", address_id)))?;

        let mut address: address::ActiveModel = address.into();
        if let Some(line1) = input.line1 {
            address.line1 = Set(line1);
        }
        if let Some(line2) = input.line2 {
            address.line2 = Set(Some(line2).filter(|l| !l.is_empty()));
        }
        if let Some(city) = input.city {
            address.city = Set(city);
        }
        if let Some(state) = input.state {
            address.state = Set(state);
        }
        if let Some(postal_code) = input.postal_code {
            address.postal_code = Set(postal_code);
        }
        address.updated_at = Set(now);
        let address = address.update(&txn).await?;

        let mut link: shopper_address::ActiveModel = link.into();
        if let Some(recipient_name) = input.recipient_name {
            link.recipient_name = Set(recipient_name);
        }
        if let Some(phone) = input.phone {
            link.phone = Set(Some(phone).filter(|p| !p.is_empty()));
        }
        link.updated_at = Set(now);
        let link = link.update(&txn).await?;

        txn.commit().await?;

        info!(shopper_id = %shopper_id, address_id = %address_id, "Address updated");
        Ok(ShopperAddress::from_parts(link, address))
    }
}

async fn find_link<C: ConnectionTrait>(
    conn: &C,
    shopper_id: Uuid,
    address_id: Uuid,
) -> Result<shopper_address::Model, ServiceError> {
    shopper_address::Entity::find()
        .filter(shopper_address::Column::ShopperId.eq(shopper_id))
        .filter(shopper_address::Column::AddressId.eq(address_id))
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!(
                "Address {} not found for shopper {}",
                address_id, shopper_id
            ))
        })
}

async fn clear_defaults<C: ConnectionTrait>(
    conn: &C,
    shopper_id: Uuid,
    keep: Option<Uuid>,
) -> Result<u64, ServiceError> {
    let mut query = shopper_address::Entity::update_many()
        .col_expr(shopper_address::Column::IsDefault, Expr::value(false))
        .col_expr(shopper_address::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(shopper_address::Column::ShopperId.eq(shopper_id))
        .filter(shopper_address::Column::IsDefault.eq(true));
    if let Some(keep) = keep {
        query = query.filter(shopper_address::Column::Id.ne(keep));
    }
    Ok(query.exec(conn).await?.rows_affected)
}

#[async_trait]
impl AddressLookup for AddressService {
    async fn find_shopper_address(
        &self,
        shopper_id: Uuid,
        address_id: Uuid,
    ) -> Result<Option<ShopperAddress>, ServiceError> {
        let row = shopper_address::Entity::find()
            .filter(shopper_address::Column::ShopperId.eq(shopper_id))
            .filter(shopper_address::Column::AddressId.eq(address_id))
            .find_also_related(address::Entity)
            .one(&*self.db)
            .await?;

        Ok(row.and_then(|(link, address)| address.map(|a| ShopperAddress::from_parts(link, a))))
    }
}
