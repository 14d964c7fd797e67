use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_tenancy_tables::Migration),
            Box::new(m20240101_000002_create_catalog_tables::Migration),
            Box::new(m20240101_000003_create_crm_tables::Migration),
            Box::new(m20240101_000004_create_sales_document_tables::Migration),
            Box::new(m20240101_000005_create_invoice_payments_table::Migration),
            Box::new(m20240101_000006_create_payment_settings_table::Migration),
            Box::new(m20240101_000007_create_project_tables::Migration),
        ]
    }
}

fn id_column<T: IntoIden>(name: T) -> ColumnDef {
    ColumnDef::new(name)
        .integer()
        .not_null()
        .auto_increment()
        .primary_key()
        .to_owned()
}

fn money_column<T: IntoIden>(name: T) -> ColumnDef {
    ColumnDef::new(name)
        .decimal_len(15, 2)
        .not_null()
        .default(0)
        .to_owned()
}

mod m20240101_000001_create_tenancy_tables {

    use super::id_column;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_tenancy_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Plans::Table)
                        .if_not_exists()
                        .col(id_column(Plans::Id))
                        .col(ColumnDef::new(Plans::Name).string().not_null().unique_key())
                        .col(
                            ColumnDef::new(Plans::Price)
                                .decimal_len(15, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Plans::Duration).string_len(16).not_null())
                        .col(ColumnDef::new(Plans::MaxUsers).integer().not_null().default(-1))
                        .col(
                            ColumnDef::new(Plans::MaxProjects)
                                .integer()
                                .not_null()
                                .default(-1),
                        )
                        .col(
                            ColumnDef::new(Plans::MaxAccounts)
                                .integer()
                                .not_null()
                                .default(-1),
                        )
                        .col(
                            ColumnDef::new(Plans::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Plans::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Plans::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Companies::Table)
                        .if_not_exists()
                        .col(id_column(Companies::Id))
                        .col(ColumnDef::new(Companies::Name).string().not_null())
                        .col(ColumnDef::new(Companies::Email).string().null())
                        .col(
                            ColumnDef::new(Companies::Currency)
                                .string_len(3)
                                .not_null()
                                .default("USD"),
                        )
                        .col(ColumnDef::new(Companies::PlanId).integer().null())
                        .col(ColumnDef::new(Companies::PlanExpiresAt).timestamp().null())
                        .col(ColumnDef::new(Companies::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Companies::UpdatedAt).timestamp().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_companies_plan_id")
                                .from(Companies::Table, Companies::PlanId)
                                .to(Plans::Table, Plans::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(id_column(Users::Id))
                        .col(ColumnDef::new(Users::CompanyId).integer().not_null())
                        .col(ColumnDef::new(Users::Name).string().not_null())
                        .col(ColumnDef::new(Users::Email).string().not_null().unique_key())
                        .col(ColumnDef::new(Users::Role).string_len(16).not_null())
                        .col(
                            ColumnDef::new(Users::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Users::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Users::UpdatedAt).timestamp().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_users_company_id")
                                .from(Users::Table, Users::CompanyId)
                                .to(Companies::Table, Companies::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_users_company_id")
                        .table(Users::Table)
                        .col(Users::CompanyId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Companies::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Plans::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Plans {
        Table,
        Id,
        Name,
        Price,
        Duration,
        MaxUsers,
        MaxProjects,
        MaxAccounts,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum Companies {
        Table,
        Id,
        Name,
        Email,
        Currency,
        PlanId,
        PlanExpiresAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum Users {
        Table,
        Id,
        CompanyId,
        Name,
        Email,
        Role,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_catalog_tables {

    use super::id_column;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Taxes::Table)
                        .if_not_exists()
                        .col(id_column(Taxes::Id))
                        .col(ColumnDef::new(Taxes::CompanyId).integer().not_null())
                        .col(ColumnDef::new(Taxes::Name).string().not_null())
                        .col(ColumnDef::new(Taxes::Rate).decimal_len(7, 4).not_null())
                        .col(ColumnDef::new(Taxes::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(id_column(Products::Id))
                        .col(ColumnDef::new(Products::CompanyId).integer().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Sku).string().null())
                        .col(ColumnDef::new(Products::Description).text().null())
                        .col(
                            ColumnDef::new(Products::Price)
                                .decimal_len(15, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Products::TaxId).integer().null())
                        .col(
                            ColumnDef::new(Products::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Products::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Products::UpdatedAt).timestamp().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_products_tax_id")
                                .from(Products::Table, Products::TaxId)
                                .to(Taxes::Table, Taxes::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_products_company_id")
                        .table(Products::Table)
                        .col(Products::CompanyId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Taxes::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Taxes {
        Table,
        Id,
        CompanyId,
        Name,
        Rate,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
        CompanyId,
        Name,
        Sku,
        Description,
        Price,
        TaxId,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_crm_tables {

    use super::{id_column, money_column};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_crm_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Accounts::Table)
                        .if_not_exists()
                        .col(id_column(Accounts::Id))
                        .col(ColumnDef::new(Accounts::CompanyId).integer().not_null())
                        .col(ColumnDef::new(Accounts::Name).string().not_null())
                        .col(ColumnDef::new(Accounts::Email).string().null())
                        .col(ColumnDef::new(Accounts::Phone).string().null())
                        .col(ColumnDef::new(Accounts::Website).string().null())
                        .col(ColumnDef::new(Accounts::BillingAddress).text().null())
                        .col(ColumnDef::new(Accounts::AssignedTo).integer().null())
                        .col(ColumnDef::new(Accounts::CreatedBy).integer().not_null())
                        .col(ColumnDef::new(Accounts::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Accounts::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Contacts::Table)
                        .if_not_exists()
                        .col(id_column(Contacts::Id))
                        .col(ColumnDef::new(Contacts::CompanyId).integer().not_null())
                        .col(ColumnDef::new(Contacts::AccountId).integer().null())
                        .col(ColumnDef::new(Contacts::Name).string().not_null())
                        .col(ColumnDef::new(Contacts::Email).string().null())
                        .col(ColumnDef::new(Contacts::Phone).string().null())
                        .col(ColumnDef::new(Contacts::Title).string().null())
                        .col(ColumnDef::new(Contacts::AssignedTo).integer().null())
                        .col(ColumnDef::new(Contacts::CreatedBy).integer().not_null())
                        .col(ColumnDef::new(Contacts::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Contacts::UpdatedAt).timestamp().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_contacts_account_id")
                                .from(Contacts::Table, Contacts::AccountId)
                                .to(Accounts::Table, Accounts::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Leads::Table)
                        .if_not_exists()
                        .col(id_column(Leads::Id))
                        .col(ColumnDef::new(Leads::CompanyId).integer().not_null())
                        .col(ColumnDef::new(Leads::Name).string().not_null())
                        .col(ColumnDef::new(Leads::Email).string().null())
                        .col(ColumnDef::new(Leads::Phone).string().null())
                        .col(ColumnDef::new(Leads::Organization).string().null())
                        .col(ColumnDef::new(Leads::Source).string().null())
                        .col(ColumnDef::new(Leads::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Leads::AssignedTo).integer().null())
                        .col(ColumnDef::new(Leads::CreatedBy).integer().not_null())
                        .col(ColumnDef::new(Leads::ConvertedAccountId).integer().null())
                        .col(ColumnDef::new(Leads::ConvertedContactId).integer().null())
                        .col(
                            ColumnDef::new(Leads::ConvertedOpportunityId)
                                .integer()
                                .null(),
                        )
                        .col(ColumnDef::new(Leads::ConvertedAt).timestamp().null())
                        .col(ColumnDef::new(Leads::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Leads::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Opportunities::Table)
                        .if_not_exists()
                        .col(id_column(Opportunities::Id))
                        .col(ColumnDef::new(Opportunities::CompanyId).integer().not_null())
                        .col(ColumnDef::new(Opportunities::Name).string().not_null())
                        .col(ColumnDef::new(Opportunities::AccountId).integer().null())
                        .col(ColumnDef::new(Opportunities::ContactId).integer().null())
                        .col(
                            ColumnDef::new(Opportunities::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Opportunities::Probability)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Opportunities::ExpectedCloseDate)
                                .date()
                                .null(),
                        )
                        .col(ColumnDef::new(Opportunities::AssignedTo).integer().null())
                        .col(money_column(Opportunities::Subtotal))
                        .col(money_column(Opportunities::DiscountAmount))
                        .col(money_column(Opportunities::TaxAmount))
                        .col(money_column(Opportunities::ShippingAmount))
                        .col(
                            ColumnDef::new(Opportunities::OrderDiscountType)
                                .string_len(16)
                                .not_null()
                                .default("none"),
                        )
                        .col(money_column(Opportunities::OrderDiscountValue))
                        .col(money_column(Opportunities::TotalAmount))
                        .col(ColumnDef::new(Opportunities::CreatedBy).integer().not_null())
                        .col(
                            ColumnDef::new(Opportunities::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Opportunities::UpdatedAt).timestamp().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_opportunities_account_id")
                                .from(Opportunities::Table, Opportunities::AccountId)
                                .to(Accounts::Table, Accounts::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            for (name, table) in [
                ("idx_accounts_company_id", Accounts::Table.into_iden()),
                ("idx_contacts_company_id", Contacts::Table.into_iden()),
                ("idx_leads_company_id", Leads::Table.into_iden()),
                ("idx_opportunities_company_id", Opportunities::Table.into_iden()),
            ] {
                manager
                    .create_index(
                        Index::create()
                            .if_not_exists()
                            .name(name)
                            .table(table)
                            .col(Alias::new("company_id"))
                            .to_owned(),
                    )
                    .await?;
            }

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Opportunities::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Leads::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Contacts::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Accounts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Accounts {
        Table,
        Id,
        CompanyId,
        Name,
        Email,
        Phone,
        Website,
        BillingAddress,
        AssignedTo,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Contacts {
        Table,
        Id,
        CompanyId,
        AccountId,
        Name,
        Email,
        Phone,
        Title,
        AssignedTo,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Leads {
        Table,
        Id,
        CompanyId,
        Name,
        Email,
        Phone,
        Organization,
        Source,
        Status,
        AssignedTo,
        CreatedBy,
        ConvertedAccountId,
        ConvertedContactId,
        ConvertedOpportunityId,
        ConvertedAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Opportunities {
        Table,
        Id,
        CompanyId,
        Name,
        AccountId,
        ContactId,
        Status,
        Probability,
        ExpectedCloseDate,
        AssignedTo,
        Subtotal,
        DiscountAmount,
        TaxAmount,
        ShippingAmount,
        OrderDiscountType,
        OrderDiscountValue,
        TotalAmount,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000004_create_sales_document_tables {

    use super::{id_column, money_column};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_sales_document_tables"
        }
    }

    /// Columns every numbered document header carries. The unique index on
    /// `number` is what makes concurrent numbering safe to retry.
    fn header_table<T: IntoIden + 'static>(table: T) -> TableCreateStatement {
        Table::create()
            .table(table)
            .if_not_exists()
            .col(id_column(Header::Id))
            .col(ColumnDef::new(Header::CompanyId).integer().not_null())
            .col(
                ColumnDef::new(Header::Number)
                    .string_len(64)
                    .not_null()
                    .unique_key(),
            )
            .col(ColumnDef::new(Header::Status).string_len(32).not_null())
            .col(money_column(Header::Subtotal))
            .col(money_column(Header::DiscountAmount))
            .col(money_column(Header::TaxAmount))
            .col(money_column(Header::ShippingAmount))
            .col(
                ColumnDef::new(Header::OrderDiscountType)
                    .string_len(16)
                    .not_null()
                    .default("none"),
            )
            .col(money_column(Header::OrderDiscountValue))
            .col(money_column(Header::TotalAmount))
            .col(ColumnDef::new(Header::Notes).text().null())
            .col(ColumnDef::new(Header::CreatedBy).integer().not_null())
            .col(ColumnDef::new(Header::CreatedAt).timestamp().not_null())
            .col(ColumnDef::new(Header::UpdatedAt).timestamp().null())
            .to_owned()
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    header_table(Quotes::Table)
                        .col(ColumnDef::new(Quotes::AccountId).integer().null())
                        .col(ColumnDef::new(Quotes::ContactId).integer().null())
                        .col(ColumnDef::new(Quotes::OpportunityId).integer().null())
                        .col(ColumnDef::new(Quotes::ValidUntil).date().null())
                        .col(
                            ColumnDef::new(Quotes::ConvertedSalesOrderId)
                                .integer()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    header_table(SalesOrders::Table)
                        .col(ColumnDef::new(SalesOrders::AccountId).integer().null())
                        .col(ColumnDef::new(SalesOrders::ContactId).integer().null())
                        .col(ColumnDef::new(SalesOrders::QuoteId).integer().null())
                        .col(ColumnDef::new(SalesOrders::OrderDate).date().not_null())
                        .col(ColumnDef::new(SalesOrders::ShippingAddress).text().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    header_table(PurchaseOrders::Table)
                        .col(
                            ColumnDef::new(PurchaseOrders::VendorName)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseOrders::ExpectedDate).date().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    header_table(Invoices::Table)
                        .col(ColumnDef::new(Invoices::AccountId).integer().null())
                        .col(ColumnDef::new(Invoices::ContactId).integer().null())
                        .col(ColumnDef::new(Invoices::SalesOrderId).integer().null())
                        .col(ColumnDef::new(Invoices::IssueDate).date().not_null())
                        .col(ColumnDef::new(Invoices::DueDate).date().null())
                        .col(
                            ColumnDef::new(Invoices::Currency)
                                .string_len(3)
                                .not_null()
                                .default("USD"),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    header_table(DeliveryOrders::Table)
                        .col(ColumnDef::new(DeliveryOrders::SalesOrderId).integer().null())
                        .col(ColumnDef::new(DeliveryOrders::DeliveryDate).date().null())
                        .col(
                            ColumnDef::new(DeliveryOrders::ShippingAddress)
                                .text()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    header_table(ReturnOrders::Table)
                        .col(ColumnDef::new(ReturnOrders::SalesOrderId).integer().null())
                        .col(ColumnDef::new(ReturnOrders::InvoiceId).integer().null())
                        .col(ColumnDef::new(ReturnOrders::Reason).text().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    header_table(ReceiptOrders::Table)
                        .col(
                            ColumnDef::new(ReceiptOrders::PurchaseOrderId)
                                .integer()
                                .null(),
                        )
                        .col(ColumnDef::new(ReceiptOrders::ReceivedDate).date().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(DocumentLineItems::Table)
                        .if_not_exists()
                        .col(id_column(DocumentLineItems::Id))
                        .col(
                            ColumnDef::new(DocumentLineItems::DocumentKind)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DocumentLineItems::DocumentId)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DocumentLineItems::ProductId)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DocumentLineItems::Description).text().null())
                        .col(
                            ColumnDef::new(DocumentLineItems::Quantity)
                                .decimal_len(15, 4)
                                .not_null(),
                        )
                        .col(money_column(DocumentLineItems::UnitPrice))
                        .col(
                            ColumnDef::new(DocumentLineItems::DiscountType)
                                .string_len(16)
                                .not_null()
                                .default("none"),
                        )
                        .col(money_column(DocumentLineItems::DiscountValue))
                        .col(money_column(DocumentLineItems::DiscountAmount))
                        .col(
                            ColumnDef::new(DocumentLineItems::TaxRate)
                                .decimal_len(7, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(money_column(DocumentLineItems::TaxAmount))
                        .col(money_column(DocumentLineItems::TotalPrice))
                        .col(
                            ColumnDef::new(DocumentLineItems::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DocumentLineItems::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_document_line_items_document")
                        .table(DocumentLineItems::Table)
                        .col(DocumentLineItems::DocumentKind)
                        .col(DocumentLineItems::DocumentId)
                        .to_owned(),
                )
                .await?;

            for (name, table) in [
                ("idx_quotes_company_id", Quotes::Table.into_iden()),
                ("idx_sales_orders_company_id", SalesOrders::Table.into_iden()),
                ("idx_purchase_orders_company_id", PurchaseOrders::Table.into_iden()),
                ("idx_invoices_company_id", Invoices::Table.into_iden()),
                ("idx_delivery_orders_company_id", DeliveryOrders::Table.into_iden()),
                ("idx_return_orders_company_id", ReturnOrders::Table.into_iden()),
                ("idx_receipt_orders_company_id", ReceiptOrders::Table.into_iden()),
            ] {
                manager
                    .create_index(
                        Index::create()
                            .if_not_exists()
                            .name(name)
                            .table(table)
                            .col(Header::CompanyId)
                            .to_owned(),
                    )
                    .await?;
            }

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            for table in [
                DocumentLineItems::Table.into_iden(),
                ReceiptOrders::Table.into_iden(),
                ReturnOrders::Table.into_iden(),
                DeliveryOrders::Table.into_iden(),
                Invoices::Table.into_iden(),
                PurchaseOrders::Table.into_iden(),
                SalesOrders::Table.into_iden(),
                Quotes::Table.into_iden(),
            ] {
                manager
                    .drop_table(Table::drop().table(table).to_owned())
                    .await?;
            }
            Ok(())
        }
    }

    #[derive(DeriveIden)]
    enum Header {
        Id,
        CompanyId,
        Number,
        Status,
        Subtotal,
        DiscountAmount,
        TaxAmount,
        ShippingAmount,
        OrderDiscountType,
        OrderDiscountValue,
        TotalAmount,
        Notes,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Quotes {
        Table,
        AccountId,
        ContactId,
        OpportunityId,
        ValidUntil,
        ConvertedSalesOrderId,
    }

    #[derive(DeriveIden)]
    enum SalesOrders {
        Table,
        AccountId,
        ContactId,
        QuoteId,
        OrderDate,
        ShippingAddress,
    }

    #[derive(DeriveIden)]
    enum PurchaseOrders {
        Table,
        VendorName,
        ExpectedDate,
    }

    #[derive(DeriveIden)]
    enum Invoices {
        Table,
        AccountId,
        ContactId,
        SalesOrderId,
        IssueDate,
        DueDate,
        Currency,
    }

    #[derive(DeriveIden)]
    enum DeliveryOrders {
        Table,
        SalesOrderId,
        DeliveryDate,
        ShippingAddress,
    }

    #[derive(DeriveIden)]
    enum ReturnOrders {
        Table,
        SalesOrderId,
        InvoiceId,
        Reason,
    }

    #[derive(DeriveIden)]
    enum ReceiptOrders {
        Table,
        PurchaseOrderId,
        ReceivedDate,
    }

    #[derive(DeriveIden)]
    enum DocumentLineItems {
        Table,
        Id,
        DocumentKind,
        DocumentId,
        ProductId,
        Description,
        Quantity,
        UnitPrice,
        DiscountType,
        DiscountValue,
        DiscountAmount,
        TaxRate,
        TaxAmount,
        TotalPrice,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000005_create_invoice_payments_table {

    use super::id_column;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_invoice_payments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InvoicePayments::Table)
                        .if_not_exists()
                        .col(id_column(InvoicePayments::Id))
                        .col(
                            ColumnDef::new(InvoicePayments::CompanyId)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoicePayments::InvoiceId)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoicePayments::Amount)
                                .decimal_len(15, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoicePayments::PaymentType)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoicePayments::PaymentMethod)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(InvoicePayments::TransactionId).string().null())
                        .col(
                            ColumnDef::new(InvoicePayments::Status)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(InvoicePayments::Notes).text().null())
                        .col(ColumnDef::new(InvoicePayments::PaidAt).timestamp().null())
                        .col(ColumnDef::new(InvoicePayments::CreatedBy).integer().null())
                        .col(
                            ColumnDef::new(InvoicePayments::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_invoice_payments_invoice_id")
                                .from(InvoicePayments::Table, InvoicePayments::InvoiceId)
                                .to(Invoices::Table, Invoices::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_invoice_payments_invoice_id")
                        .table(InvoicePayments::Table)
                        .col(InvoicePayments::InvoiceId)
                        .to_owned(),
                )
                .await?;

            // gateway callbacks are replayed; one row per gateway transaction
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_invoice_payments_transaction")
                        .table(InvoicePayments::Table)
                        .col(InvoicePayments::PaymentMethod)
                        .col(InvoicePayments::TransactionId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InvoicePayments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Invoices {
        Table,
        Id,
    }

    #[derive(DeriveIden)]
    enum InvoicePayments {
        Table,
        Id,
        CompanyId,
        InvoiceId,
        Amount,
        PaymentType,
        PaymentMethod,
        TransactionId,
        Status,
        Notes,
        PaidAt,
        CreatedBy,
        CreatedAt,
    }
}

mod m20240101_000006_create_payment_settings_table {

    use super::id_column;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000006_create_payment_settings_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentSettings::Table)
                        .if_not_exists()
                        .col(id_column(PaymentSettings::Id))
                        .col(
                            ColumnDef::new(PaymentSettings::CompanyId)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentSettings::Key)
                                .string_len(128)
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentSettings::Value).text().not_null())
                        .col(
                            ColumnDef::new(PaymentSettings::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentSettings::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_settings_company_key")
                        .table(PaymentSettings::Table)
                        .col(PaymentSettings::CompanyId)
                        .col(PaymentSettings::Key)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentSettings::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentSettings {
        Table,
        Id,
        CompanyId,
        Key,
        Value,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000007_create_project_tables {

    use super::id_column;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000007_create_project_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Projects::Table)
                        .if_not_exists()
                        .col(id_column(Projects::Id))
                        .col(ColumnDef::new(Projects::CompanyId).integer().not_null())
                        .col(ColumnDef::new(Projects::Name).string().not_null())
                        .col(ColumnDef::new(Projects::Description).text().null())
                        .col(ColumnDef::new(Projects::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Projects::AccountId).integer().null())
                        .col(ColumnDef::new(Projects::StartDate).date().null())
                        .col(ColumnDef::new(Projects::EndDate).date().null())
                        .col(
                            ColumnDef::new(Projects::Progress)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Projects::CreatedBy).integer().not_null())
                        .col(ColumnDef::new(Projects::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Projects::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ProjectTasks::Table)
                        .if_not_exists()
                        .col(id_column(ProjectTasks::Id))
                        .col(ColumnDef::new(ProjectTasks::ProjectId).integer().not_null())
                        .col(ColumnDef::new(ProjectTasks::ParentId).integer().null())
                        .col(ColumnDef::new(ProjectTasks::Title).string().not_null())
                        .col(ColumnDef::new(ProjectTasks::Description).text().null())
                        .col(ColumnDef::new(ProjectTasks::Status).string_len(32).not_null())
                        .col(
                            ColumnDef::new(ProjectTasks::Priority)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProjectTasks::AssignedTo).integer().null())
                        .col(ColumnDef::new(ProjectTasks::DueDate).date().null())
                        .col(
                            ColumnDef::new(ProjectTasks::Progress)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(ProjectTasks::CreatedBy).integer().not_null())
                        .col(
                            ColumnDef::new(ProjectTasks::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProjectTasks::UpdatedAt).timestamp().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_project_tasks_project_id")
                                .from(ProjectTasks::Table, ProjectTasks::ProjectId)
                                .to(Projects::Table, Projects::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_project_tasks_project_id")
                        .table(ProjectTasks::Table)
                        .col(ProjectTasks::ProjectId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProjectTasks::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Projects::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Projects {
        Table,
        Id,
        CompanyId,
        Name,
        Description,
        Status,
        AccountId,
        StartDate,
        EndDate,
        Progress,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ProjectTasks {
        Table,
        Id,
        ProjectId,
        ParentId,
        Title,
        Description,
        Status,
        Priority,
        AssignedTo,
        DueDate,
        Progress,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }
}
