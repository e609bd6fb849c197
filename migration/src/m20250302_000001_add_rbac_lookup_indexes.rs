use sea_orm_migration::prelude::*;

use crate::m20250301_000001_create_rbac_tables::{AuthAssignment, AuthItem, AuthItemChild};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // checkAccess walks upwards, so parent lookups go by child
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_auth_item_child_child")
                    .table(AuthItemChild::Table)
                    .col(AuthItemChild::Child)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_auth_assignment_item")
                    .table(AuthAssignment::Table)
                    .col(AuthAssignment::ItemName)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_auth_item_type")
                    .table(AuthItem::Table)
                    .col(AuthItem::Type)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_auth_item_type")
                    .table(AuthItem::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_auth_assignment_item")
                    .table(AuthAssignment::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_auth_item_child_child")
                    .table(AuthItemChild::Table)
                    .to_owned(),
            )
            .await
    }
}
