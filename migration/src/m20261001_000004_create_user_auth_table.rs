use sea_orm_migration::prelude::*;

/// Creates the `user_auth` table linking users to external provider identities.
///
/// A remote identity `(provider, provider_user_id)` belongs to at most one user.
#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(DeriveIden)]
enum UserAuth {
    Table,
    Id,
    UserId,
    Provider,
    ProviderUserId,
    DisplayName,
    Email,
    CreatedAt,
}

#[derive(DeriveIden)]
enum User {
    Table,
    Id,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserAuth::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(UserAuth::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(UserAuth::UserId).uuid().not_null())
                    .col(ColumnDef::new(UserAuth::Provider).string_len(32).not_null())
                    .col(
                        ColumnDef::new(UserAuth::ProviderUserId)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(UserAuth::DisplayName).string_len(255).null())
                    .col(ColumnDef::new(UserAuth::Email).string_len(255).null())
                    .col(
                        ColumnDef::new(UserAuth::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_auth_user_id")
                            .from(UserAuth::Table, UserAuth::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_auth_provider_identity")
                    .table(UserAuth::Table)
                    .col(UserAuth::Provider)
                    .col(UserAuth::ProviderUserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_auth_user_id")
                    .table(UserAuth::Table)
                    .col(UserAuth::UserId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserAuth::Table).to_owned())
            .await
    }
}
