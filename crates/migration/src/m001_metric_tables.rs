use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_metric_tables"
    }
}

#[derive(DeriveIden)]
enum Gauges {
    Table,
    Name,
    Value,
}

#[derive(DeriveIden)]
enum Counters {
    Table,
    Name,
    Value,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Gauges::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Gauges::Name).string().not_null().primary_key())
                    .col(ColumnDef::new(Gauges::Value).double().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Counters::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Counters::Name).string().not_null().primary_key())
                    .col(ColumnDef::new(Counters::Value).big_integer().not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Counters::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Gauges::Table).if_exists().to_owned())
            .await
    }
}
