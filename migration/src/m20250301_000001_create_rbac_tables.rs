use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Enable foreign keys for SQLite
        if manager.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        // Items: operations (0), tasks (1) and roles (2)
        manager
            .create_table(
                Table::create()
                    .table(AuthItem::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuthItem::Name)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(integer(AuthItem::Type))
                    .col(text_null(AuthItem::Description))
                    .col(text_null(AuthItem::Condition))
                    .col(text_null(AuthItem::Data))
                    .to_owned(),
            )
            .await?;

        // Parent -> child edges
        manager
            .create_table(
                Table::create()
                    .table(AuthItemChild::Table)
                    .if_not_exists()
                    .col(string_len(AuthItemChild::Parent, 64))
                    .col(string_len(AuthItemChild::Child, 64))
                    .primary_key(
                        Index::create()
                            .col(AuthItemChild::Parent)
                            .col(AuthItemChild::Child),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_auth_item_child_parent")
                            .from(AuthItemChild::Table, AuthItemChild::Parent)
                            .to(AuthItem::Table, AuthItem::Name)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_auth_item_child_child")
                            .from(AuthItemChild::Table, AuthItemChild::Child)
                            .to(AuthItem::Table, AuthItem::Name)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // User -> item assignments
        manager
            .create_table(
                Table::create()
                    .table(AuthAssignment::Table)
                    .if_not_exists()
                    .col(string_len(AuthAssignment::UserId, 64))
                    .col(string_len(AuthAssignment::ItemName, 64))
                    .col(text_null(AuthAssignment::Condition))
                    .col(text_null(AuthAssignment::Data))
                    .primary_key(
                        Index::create()
                            .col(AuthAssignment::UserId)
                            .col(AuthAssignment::ItemName),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_auth_assignment_item")
                            .from(AuthAssignment::Table, AuthAssignment::ItemName)
                            .to(AuthItem::Table, AuthItem::Name)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AuthAssignment::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AuthItemChild::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AuthItem::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum AuthItem {
    Table,
    Name,
    Type,
    Description,
    Condition,
    Data,
}

#[derive(DeriveIden)]
pub(crate) enum AuthItemChild {
    Table,
    Parent,
    Child,
}

#[derive(DeriveIden)]
pub(crate) enum AuthAssignment {
    Table,
    UserId,
    ItemName,
    Condition,
    Data,
}
