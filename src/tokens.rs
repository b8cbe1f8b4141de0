//! Account activation tokens.
//!
//! A user has at most one live (unconsumed, unexpired) token. Consuming a token
//! is a single conditional `UPDATE`, so two concurrent activations cannot both
//! succeed. Consumed rows are kept: they are what marks a user as activated.

use std::time::Duration;

use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter,
};
use uuid::Uuid;

use crate::entities::user_activation;
use crate::store::{StoreError, bounded};
use crate::utils::{generate_secret, is_well_formed_secret};

#[derive(Debug, Clone)]
pub struct TokenService {
    db: DatabaseConnection,
    ttl: chrono::Duration,
    timeout: Duration,
}

impl TokenService {
    #[must_use]
    pub const fn new(db: DatabaseConnection, ttl: chrono::Duration, timeout: Duration) -> Self {
        Self { db, ttl, timeout }
    }

    /// Issue a fresh token for `user_id`, invalidating any earlier live one.
    ///
    /// # Errors
    ///
    /// Fails on database errors or timeout.
    pub async fn issue(&self, user_id: Uuid) -> Result<String, StoreError> {
        bounded(self.timeout, self.issue_in(&self.db, user_id)).await
    }

    /// [`issue`](Self::issue) on a caller-provided connection or transaction.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub async fn issue_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
    ) -> Result<String, DbErr> {
        user_activation::Entity::delete_many()
            .filter(user_activation::Column::UserId.eq(user_id))
            .filter(user_activation::Column::ConsumedAt.is_null())
            .exec(conn)
            .await?;

        let now = Utc::now();
        let token = generate_secret();
        user_activation::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            token: Set(token.clone()),
            expires_at: Set((now + self.ttl).fixed_offset()),
            consumed_at: Set(None),
            created_at: Set(now.fixed_offset()),
        }
        .insert(conn)
        .await?;

        tracing::debug!(%user_id, "activation token issued");
        Ok(token)
    }

    /// Owner of a live token; `None` for unknown, consumed or expired tokens.
    ///
    /// # Errors
    ///
    /// Fails on database errors or timeout.
    pub async fn resolve(&self, token: &str) -> Result<Option<Uuid>, StoreError> {
        if !is_well_formed_secret(token) {
            return Ok(None);
        }
        let row = bounded(
            self.timeout,
            user_activation::Entity::find()
                .filter(user_activation::Column::Token.eq(token))
                .filter(user_activation::Column::ConsumedAt.is_null())
                .filter(user_activation::Column::ExpiresAt.gt(Utc::now().fixed_offset()))
                .one(&self.db),
        )
        .await?;
        Ok(row.map(|r| r.user_id))
    }

    /// Spend a live token. Returns its owner if this call consumed it, `None` if
    /// the token was unknown, already consumed or expired.
    ///
    /// # Errors
    ///
    /// Fails on database errors or timeout.
    pub async fn consume(&self, token: &str) -> Result<Option<Uuid>, StoreError> {
        if !is_well_formed_secret(token) {
            return Ok(None);
        }
        let now = Utc::now().fixed_offset();
        let result = bounded(
            self.timeout,
            user_activation::Entity::update_many()
                .col_expr(user_activation::Column::ConsumedAt, Expr::value(now))
                .filter(user_activation::Column::Token.eq(token))
                .filter(user_activation::Column::ConsumedAt.is_null())
                .filter(user_activation::Column::ExpiresAt.gt(now))
                .exec(&self.db),
        )
        .await?;

        if result.rows_affected != 1 {
            return Ok(None);
        }

        let row = bounded(
            self.timeout,
            user_activation::Entity::find()
                .filter(user_activation::Column::Token.eq(token))
                .one(&self.db),
        )
        .await?;
        Ok(row.map(|r| r.user_id))
    }

    /// Whether any token of the user has been consumed.
    ///
    /// # Errors
    ///
    /// Fails on database errors or timeout.
    pub async fn is_activated(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let consumed = bounded(
            self.timeout,
            user_activation::Entity::find()
                .filter(user_activation::Column::UserId.eq(user_id))
                .filter(user_activation::Column::ConsumedAt.is_not_null())
                .count(&self.db),
        )
        .await?;
        Ok(consumed > 0)
    }

    /// Number of live tokens held by the user (0 or 1).
    ///
    /// # Errors
    ///
    /// Fails on database errors or timeout.
    pub async fn live_tokens(&self, user_id: Uuid) -> Result<u64, StoreError> {
        bounded(
            self.timeout,
            user_activation::Entity::find()
                .filter(user_activation::Column::UserId.eq(user_id))
                .filter(user_activation::Column::ConsumedAt.is_null())
                .filter(user_activation::Column::ExpiresAt.gt(Utc::now().fixed_offset()))
                .count(&self.db),
        )
        .await
    }
}
