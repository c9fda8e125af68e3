use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One purchased product line.
///
/// Prices are frozen at creation; `grand_total` is always derived from
/// `subtotal + tax_amount + shipping_cost - discount_amount` and never
/// written independently. The recipient and shipping columns are a display
/// snapshot of the address at creation time.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,

    pub shopper_id: Uuid,
    pub address_id: Uuid,
    pub product_id: Uuid,

    pub quantity: i32,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub unit_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub tax_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub shipping_cost: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub discount_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub grand_total: Decimal,

    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub delivery_status: OrderStatus,

    pub payment_method: Option<String>,
    pub checkout_session_id: Option<String>,
    pub tracking_number: Option<String>,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub refund_amount: Option<Decimal>,

    pub product_name: String,
    pub recipient_name: String,
    pub shipping_line1: String,
    pub shipping_line2: Option<String>,
    pub shipping_city: String,
    pub shipping_state: String,
    pub shipping_postal_code: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(
        belongs_to = "super::address::Entity",
        from = "Column::AddressId",
        to = "super::address::Column::Id"
    )]
    Address,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::address::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Address.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Lifecycle of an order; also used for the delivery status column
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
    #[sea_orm(string_value = "partially_refunded")]
    PartiallyRefunded,
}
