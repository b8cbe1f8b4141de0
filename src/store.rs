//! Identity store: users, role assignments, profiles and provider links.
//!
//! Uniqueness of `user.name`, `user.email` and `user_auth(provider,
//! provider_user_id)` is enforced by the database. A violation comes back as
//! [`StoreError::Conflict`], which callers treat as a lost race rather than a
//! failure. Every call is bounded by the configured I/O timeout.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, SqlErr, TransactionTrait,
};
use uuid::Uuid;

use crate::entities::{user, user_auth, user_profile, user_role};
use crate::sessions::PendingProviderIdentity;
use crate::tokens::TokenService;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("identity store did not answer in time")]
    Timeout,
    #[error(transparent)]
    Db(DbErr),
}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => Self::Conflict(detail),
            _ => Self::Db(err),
        }
    }
}

/// Run `fut` against the store, failing with [`StoreError::Timeout`] past `timeout`.
///
/// # Errors
///
/// Returns the future's own error converted to [`StoreError`], or `Timeout`.
pub async fn bounded<T, E, F>(timeout: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<StoreError>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(Into::into)
}

/// Data for a new account. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role_id: i32,
}

#[derive(Debug, Clone)]
pub struct IdentityStore {
    db: DatabaseConnection,
    timeout: Duration,
}

impl IdentityStore {
    #[must_use]
    pub const fn new(db: DatabaseConnection, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// # Errors
    ///
    /// Fails if the database is unreachable.
    pub async fn ping(&self) -> Result<(), StoreError> {
        bounded(self.timeout, self.db.ping()).await
    }

    /// # Errors
    ///
    /// Fails on database errors or timeout.
    pub async fn find_user(&self, id: Uuid) -> Result<Option<user::Model>, StoreError> {
        bounded(self.timeout, user::Entity::find_by_id(id).one(&self.db)).await
    }

    /// # Errors
    ///
    /// Fails on database errors or timeout.
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<user::Model>, StoreError> {
        bounded(
            self.timeout,
            user::Entity::find()
                .filter(user::Column::Email.eq(email.to_lowercase()))
                .one(&self.db),
        )
        .await
    }

    /// # Errors
    ///
    /// Fails on database errors or timeout.
    pub async fn find_user_by_name(&self, name: &str) -> Result<Option<user::Model>, StoreError> {
        bounded(
            self.timeout,
            user::Entity::find()
                .filter(user::Column::Name.eq(name))
                .one(&self.db),
        )
        .await
    }

    /// # Errors
    ///
    /// Fails on database errors or timeout.
    pub async fn name_taken(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.find_user_by_name(name).await?.is_some())
    }

    /// # Errors
    ///
    /// Fails on database errors or timeout.
    pub async fn email_taken(&self, email: &str) -> Result<bool, StoreError> {
        Ok(self.find_user_by_email(email).await?.is_some())
    }

    /// Create a user with its default role, an empty profile and a fresh
    /// activation token, all in one transaction.
    ///
    /// Returns the user and the activation token.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the name or email was taken concurrently.
    pub async fn create_user(
        &self,
        new_user: NewUser,
        tokens: &TokenService,
    ) -> Result<(user::Model, String), StoreError> {
        bounded(self.timeout, async {
            let now = Utc::now().fixed_offset();
            let user_id = Uuid::new_v4();

            let txn = self.db.begin().await?;

            let user_model = user::ActiveModel {
                id: Set(user_id),
                name: Set(new_user.name),
                email: Set(new_user.email.to_lowercase()),
                password_hash: Set(new_user.password_hash),
                last_login_at: Set(None),
                last_login_ip: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;

            user_role::Entity::insert(user_role::ActiveModel {
                user_id: Set(user_id),
                role_id: Set(new_user.role_id),
            })
            .exec_without_returning(&txn)
            .await?;

            user_profile::ActiveModel {
                id: Set(user_id),
                display_name: Set(None),
                bio: Set(None),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;

            let token = tokens.issue_in(&txn, user_id).await?;

            txn.commit().await?;
            Ok::<_, DbErr>((user_model, token))
        })
        .await
    }

    /// Role ids assigned to a user.
    ///
    /// # Errors
    ///
    /// Fails on database errors or timeout.
    pub async fn roles(&self, user_id: Uuid) -> Result<Vec<i32>, StoreError> {
        let rows = bounded(
            self.timeout,
            user_role::Entity::find()
                .filter(user_role::Column::UserId.eq(user_id))
                .order_by_asc(user_role::Column::RoleId)
                .all(&self.db),
        )
        .await?;
        Ok(rows.into_iter().map(|r| r.role_id).collect())
    }

    /// # Errors
    ///
    /// Fails on database errors or timeout.
    pub async fn find_auth(
        &self,
        provider: &str,
        remote_user_id: &str,
    ) -> Result<Option<user_auth::Model>, StoreError> {
        bounded(
            self.timeout,
            user_auth::Entity::find()
                .filter(user_auth::Column::Provider.eq(provider))
                .filter(user_auth::Column::ProviderUserId.eq(remote_user_id))
                .one(&self.db),
        )
        .await
    }

    /// Link a remote identity to `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the remote identity already belongs to a user.
    pub async fn link_auth(
        &self,
        user_id: Uuid,
        identity: &PendingProviderIdentity,
    ) -> Result<user_auth::Model, StoreError> {
        let link = user_auth::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            provider: Set(identity.provider.clone()),
            provider_user_id: Set(identity.remote_user_id.clone()),
            display_name: Set(Some(identity.display_name.clone())),
            email: Set(identity.email.clone()),
            created_at: Set(Utc::now().fixed_offset()),
        };
        let model = bounded(self.timeout, link.insert(&self.db)).await?;

        tracing::info!(
            %user_id,
            provider = %identity.provider,
            "provider identity linked"
        );
        Ok(model)
    }

    /// # Errors
    ///
    /// Fails on database errors or timeout.
    pub async fn auths_for_user(&self, user_id: Uuid) -> Result<Vec<user_auth::Model>, StoreError> {
        bounded(
            self.timeout,
            user_auth::Entity::find()
                .filter(user_auth::Column::UserId.eq(user_id))
                .order_by_asc(user_auth::Column::CreatedAt)
                .all(&self.db),
        )
        .await
    }

    /// # Errors
    ///
    /// Fails on database errors or timeout.
    pub async fn count_auths(&self, provider: &str, remote_user_id: &str) -> Result<u64, StoreError> {
        bounded(
            self.timeout,
            user_auth::Entity::find()
                .filter(user_auth::Column::Provider.eq(provider))
                .filter(user_auth::Column::ProviderUserId.eq(remote_user_id))
                .count(&self.db),
        )
        .await
    }

    /// Stamp the login time and client address on a user.
    ///
    /// # Errors
    ///
    /// Fails on database errors or timeout.
    pub async fn record_login(
        &self,
        user_model: user::Model,
        client_ip: Option<String>,
    ) -> Result<user::Model, StoreError> {
        let now = Utc::now().fixed_offset();
        let mut active_user: user::ActiveModel = user_model.into();
        active_user.last_login_at = Set(Some(now));
        active_user.last_login_ip = Set(client_ip);
        active_user.updated_at = Set(now);
        bounded(self.timeout, active_user.update(&self.db)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stalled_call_times_out() {
        let stalled = std::future::pending::<Result<(), DbErr>>();
        let result = bounded(Duration::from_millis(20), stalled).await;
        assert!(matches!(result, Err(StoreError::Timeout)));
    }

    #[tokio::test]
    async fn answered_call_passes_through() {
        let answered = async { Ok::<_, DbErr>(7) };
        let result = bounded(Duration::from_secs(1), answered).await;
        assert_eq!(result.ok(), Some(7));

        let failed = async { Err::<(), _>(DbErr::Custom("boom".to_string())) };
        let result = bounded(Duration::from_secs(1), failed).await;
        assert!(matches!(result, Err(StoreError::Db(_))));
    }
}
