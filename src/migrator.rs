use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_books_table::Migration),
            Box::new(m20240601_000002_create_invoices_table::Migration),
            Box::new(m20240601_000003_create_cart_snapshots_table::Migration),
        ]
    }
}

/// Money column: exact decimal on Postgres, REAL on SQLite so values
/// round-trip through the driver as floating point.
fn money_column<T: IntoIden>(manager: &SchemaManager, col: T) -> ColumnDef {
    let mut def = ColumnDef::new(col);
    match manager.get_database_backend() {
        sea_orm::DbBackend::Sqlite => def.double(),
        _ => def.decimal_len(19, 4),
    };
    def.not_null().to_owned()
}

mod m20240601_000001_create_books_table {
    use super::money_column;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_books_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Books::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Books::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Books::Title).string().not_null())
                        .col(&mut money_column(manager, Books::Price))
                        .col(
                            ColumnDef::new(Books::Quantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .check(Expr::col(Books::Quantity).gte(0))
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Books::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Books {
        Table,
        Id,
        Title,
        Price,
        Quantity,
    }
}

mod m20240601_000002_create_invoices_table {
    use super::money_column;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_invoices_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Invoices::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Invoices::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(&mut money_column(manager, Invoices::TotalPrice))
                        .col(ColumnDef::new(Invoices::Lines).json().not_null())
                        .col(ColumnDef::new(Invoices::UserId).string().not_null())
                        .col(
                            ColumnDef::new(Invoices::OrderStatus)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::PaymentStatus)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::PaymentMethod)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Invoices::TransactionId).string().null())
                        .col(ColumnDef::new(Invoices::RequestId).string().null())
                        .col(
                            ColumnDef::new(Invoices::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_invoices_user_id")
                        .table(Invoices::Table)
                        .col(Invoices::UserId)
                        .to_owned(),
                )
                .await?;

            // Reconciler sweep: method + payment status + age
            manager
                .create_index(
                    Index::create()
                        .name("idx_invoices_payment_sweep")
                        .table(Invoices::Table)
                        .col(Invoices::PaymentMethod)
                        .col(Invoices::PaymentStatus)
                        .col(Invoices::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Invoices::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Invoices {
        Table,
        Id,
        CreatedAt,
        TotalPrice,
        Lines,
        UserId,
        OrderStatus,
        PaymentStatus,
        PaymentMethod,
        TransactionId,
        RequestId,
        UpdatedAt,
    }
}

mod m20240601_000003_create_cart_snapshots_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_cart_snapshots_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CartSnapshots::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CartSnapshots::UserId)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CartSnapshots::Items).json().not_null())
                        .col(
                            ColumnDef::new(CartSnapshots::LastUpdated)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartSnapshots::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CartSnapshots {
        Table,
        UserId,
        Items,
        LastUpdated,
    }
}
