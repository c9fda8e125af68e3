use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_catalog_and_address_tables::Migration),
            Box::new(m20240601_000002_create_cart_items_table::Migration),
            Box::new(m20240601_000003_create_orders_table::Migration),
            Box::new(m20240601_000004_create_payment_session_receipts_table::Migration),
        ]
    }
}

mod m20240601_000001_create_catalog_and_address_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_catalog_and_address_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Price).decimal_len(16, 4).not_null())
                        .col(
                            ColumnDef::new(Products::Currency)
                                .string_len(3)
                                .not_null()
                                .default("usd"),
                        )
                        .col(
                            ColumnDef::new(Products::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Addresses::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Addresses::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Addresses::Line1).string().not_null())
                        .col(ColumnDef::new(Addresses::Line2).string().null())
                        .col(ColumnDef::new(Addresses::City).string().not_null())
                        .col(ColumnDef::new(Addresses::State).string().not_null())
                        .col(ColumnDef::new(Addresses::PostalCode).string().not_null())
                        .col(
                            ColumnDef::new(Addresses::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Addresses::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ShopperAddresses::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ShopperAddresses::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ShopperAddresses::ShopperId).uuid().not_null())
                        .col(ColumnDef::new(ShopperAddresses::AddressId).uuid().not_null())
                        .col(
                            ColumnDef::new(ShopperAddresses::RecipientName)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ShopperAddresses::Phone).string().null())
                        .col(
                            ColumnDef::new(ShopperAddresses::IsDefault)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(ShopperAddresses::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ShopperAddresses::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_shopper_addresses_address")
                                .from(ShopperAddresses::Table, ShopperAddresses::AddressId)
                                .to(Addresses::Table, Addresses::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_shopper_addresses_shopper_address")
                        .table(ShopperAddresses::Table)
                        .col(ShopperAddresses::ShopperId)
                        .col(ShopperAddresses::AddressId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            // At most one default per shopper.
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE UNIQUE INDEX IF NOT EXISTS uq_shopper_addresses_default \
                     ON shopper_addresses (shopper_id) WHERE is_default",
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ShopperAddresses::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Addresses::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Name,
        Price,
        Currency,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum Addresses {
        Table,
        Id,
        Line1,
        Line2,
        City,
        State,
        PostalCode,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ShopperAddresses {
        Table,
        Id,
        ShopperId,
        AddressId,
        RecipientName,
        Phone,
        IsDefault,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_cart_items_table {
    use super::m20240601_000001_create_catalog_and_address_tables::Products;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_cart_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CartItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CartItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(CartItems::ShopperId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(CartItems::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(CartItems::DeletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(CartItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CartItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_items_product")
                                .from(CartItems::Table, CartItems::ProductId)
                                .to(Products::Table, Products::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cart_items_shopper_id")
                        .table(CartItems::Table)
                        .col(CartItems::ShopperId)
                        .to_owned(),
                )
                .await?;

            // One live row per (shopper, product); deactivated and deleted rows are history.
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE UNIQUE INDEX IF NOT EXISTS uq_cart_items_live_shopper_product \
                     ON cart_items (shopper_id, product_id) \
                     WHERE is_active AND deleted_at IS NULL",
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CartItems {
        Table,
        Id,
        ShopperId,
        ProductId,
        Quantity,
        IsActive,
        DeletedAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000003_create_orders_table {
    use super::m20240601_000001_create_catalog_and_address_tables::{Addresses, Products};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_orders_table"
        }
    }

    fn money(col: Orders) -> ColumnDef {
        ColumnDef::new(col)
            .decimal_len(16, 4)
            .not_null()
            .default(0)
            .to_owned()
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Orders::OrderNumber)
                                .string_len(40)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::ShopperId).uuid().not_null())
                        .col(ColumnDef::new(Orders::AddressId).uuid().not_null())
                        .col(ColumnDef::new(Orders::ProductId).uuid().not_null())
                        .col(ColumnDef::new(Orders::Quantity).integer().not_null())
                        .col(&mut money(Orders::UnitPrice))
                        .col(&mut money(Orders::Subtotal))
                        .col(&mut money(Orders::TaxAmount))
                        .col(&mut money(Orders::ShippingCost))
                        .col(&mut money(Orders::DiscountAmount))
                        .col(&mut money(Orders::GrandTotal))
                        .col(ColumnDef::new(Orders::OrderStatus).string_len(20).not_null())
                        .col(
                            ColumnDef::new(Orders::PaymentStatus)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::DeliveryStatus)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::PaymentMethod).string().null())
                        .col(ColumnDef::new(Orders::CheckoutSessionId).string().null())
                        .col(ColumnDef::new(Orders::TrackingNumber).string().null())
                        .col(ColumnDef::new(Orders::Notes).text().null())
                        .col(ColumnDef::new(Orders::CancellationReason).text().null())
                        .col(
                            ColumnDef::new(Orders::CancelledAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Orders::RefundAmount).decimal_len(16, 4).null())
                        .col(ColumnDef::new(Orders::ProductName).string().not_null())
                        .col(ColumnDef::new(Orders::RecipientName).string().not_null())
                        .col(ColumnDef::new(Orders::ShippingLine1).string().not_null())
                        .col(ColumnDef::new(Orders::ShippingLine2).string().null())
                        .col(ColumnDef::new(Orders::ShippingCity).string().not_null())
                        .col(ColumnDef::new(Orders::ShippingState).string().not_null())
                        .col(
                            ColumnDef::new(Orders::ShippingPostalCode)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_product")
                                .from(Orders::Table, Orders::ProductId)
                                .to(Products::Table, Products::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_address")
                                .from(Orders::Table, Orders::AddressId)
                                .to(Addresses::Table, Addresses::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_shopper_id")
                        .table(Orders::Table)
                        .col(Orders::ShopperId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_checkout_session_id")
                        .table(Orders::Table)
                        .col(Orders::CheckoutSessionId)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden, Clone, Copy)]
    enum Orders {
        Table,
        Id,
        OrderNumber,
        ShopperId,
        AddressId,
        ProductId,
        Quantity,
        UnitPrice,
        Subtotal,
        TaxAmount,
        ShippingCost,
        DiscountAmount,
        GrandTotal,
        OrderStatus,
        PaymentStatus,
        DeliveryStatus,
        PaymentMethod,
        CheckoutSessionId,
        TrackingNumber,
        Notes,
        CancellationReason,
        CancelledAt,
        RefundAmount,
        ProductName,
        RecipientName,
        ShippingLine1,
        ShippingLine2,
        ShippingCity,
        ShippingState,
        ShippingPostalCode,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000004_create_payment_session_receipts_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_payment_session_receipts_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentSessionReceipts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentSessionReceipts::SessionId)
                                .string_len(255)
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentSessionReceipts::ShopperId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentSessionReceipts::ReceivedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentSessionReceipts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentSessionReceipts {
        Table,
        SessionId,
        ShopperId,
        ReceivedAt,
    }
}
