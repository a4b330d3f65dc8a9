// src/store/postgres/users.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, types::Json};

use super::like_pattern;
use crate::{
    error::AppError,
    models::user::{
        CartItem, Listing, ListingStatus, NewUser, ResetTokenChange, RoleFilter, User, UserChanges,
        UserFilter, WishlistItem,
    },
    store::UserStore,
    utils::hash::hash_password,
};

const USER_COLUMNS: &str = "id, name, email, email_verified, password_hash, country, contact, \
     profile_image, is_admin, is_active, reset_token_hash, reset_token_expires, reset_requests, \
     last_reset_request, password_history, password_changed_at, last_login, created_at, updated_at";

#[derive(FromRow)]
struct ListingRow {
    product_id: i64,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ListingRow> for Listing {
    type Error = AppError;

    fn try_from(row: ListingRow) -> Result<Self, Self::Error> {
        Ok(Listing {
            product_id: row.product_id,
            status: row.status.parse().map_err(AppError::Internal)?,
            created_at: row.created_at,
        })
    }
}

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    builder.push(" WHERE TRUE");
    if let Some(search) = filter.search.as_deref() {
        let pattern = like_pattern(search);
        builder
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR contact ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    match filter.role {
        Some(RoleFilter::Admin) => {
            builder.push(" AND is_admin");
        }
        Some(RoleFilter::User) => {
            builder.push(" AND NOT is_admin");
        }
        None => {}
    }
    if let Some(active) = filter.active {
        builder.push(" AND is_active = ").push_bind(active);
    }
    if let Some(since) = filter.created_since {
        builder.push(" AND created_at >= ").push_bind(since);
    }
    if let Some(since) = filter.logged_in_since {
        builder.push(" AND last_login >= ").push_bind(since);
    }
}

/// Appends the SET list for `changes` to an `UPDATE users SET ` builder.
fn push_changes(builder: &mut QueryBuilder<'_, Postgres>, changes: UserChanges, password_hash: Option<String>) {
    let mut separated = builder.separated(", ");

    if let Some(v) = changes.name {
        separated.push("name = ").push_bind_unseparated(v);
    }
    if let Some(v) = changes.email {
        separated.push("email = LOWER(").push_bind_unseparated(v).push_unseparated(")");
    }
    if let Some(v) = changes.country {
        separated.push("country = ").push_bind_unseparated(v);
    }
    if let Some(v) = changes.contact {
        separated.push("contact = ").push_bind_unseparated(v);
    }
    if let Some(v) = changes.profile_image {
        separated.push("profile_image = ").push_bind_unseparated(v);
    }
    if let Some(v) = changes.is_admin {
        separated.push("is_admin = ").push_bind_unseparated(v);
    }
    if let Some(v) = changes.is_active {
        separated.push("is_active = ").push_bind_unseparated(v);
    }
    if let Some(v) = password_hash {
        separated.push("password_hash = ").push_bind_unseparated(v);
    }
    if let Some(v) = changes.password_history {
        separated.push("password_history = ").push_bind_unseparated(Json(v));
    }
    if let Some(v) = changes.password_changed_at {
        separated.push("password_changed_at = ").push_bind_unseparated(v);
    }
    match changes.reset_token {
        Some(ResetTokenChange::Set {
            token_hash,
            expires_at,
            requested_at,
            request_count,
        }) => {
            separated.push("reset_token_hash = ").push_bind_unseparated(token_hash);
            separated.push("reset_token_expires = ").push_bind_unseparated(expires_at);
            separated.push("last_reset_request = ").push_bind_unseparated(requested_at);
            separated.push("reset_requests = ").push_bind_unseparated(request_count);
        }
        Some(ResetTokenChange::Clear) => {
            separated.push("reset_token_hash = NULL");
            separated.push("reset_token_expires = NULL");
        }
        None => {}
    }
    if let Some(v) = changes.reset_requests {
        separated.push("reset_requests = ").push_bind_unseparated(v);
    }
    if let Some(v) = changes.last_login {
        separated.push("last_login = ").push_bind_unseparated(v);
    }
    separated.push("updated_at = NOW()");
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {} FROM users WHERE LOWER(email) = LOWER($1)", USER_COLUMNS);
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, AppError> {
        let sql = format!(
            "SELECT {} FROM users WHERE reset_token_hash = $1 AND reset_token_expires > $2",
            USER_COLUMNS
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create(&self, new: NewUser) -> Result<User, AppError> {
        let password_hash = hash_password(new.password.expose_secret())?;
        let sql = format!(
            r#"
            INSERT INTO users
                (name, email, password_hash, country, contact, is_admin, is_active, email_verified, last_login)
            VALUES ($1, LOWER($2), $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&sql)
            .bind(&new.name)
            .bind(&new.email)
            .bind(password_hash)
            .bind(&new.country)
            .bind(&new.contact)
            .bind(new.is_admin)
            .bind(new.is_active)
            .bind(new.email_verified)
            .bind(new.last_login)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match AppError::from(e) {
                AppError::Conflict(_) => AppError::Conflict("Email already registered".to_string()),
                other => {
                    tracing::error!("Failed to create user: {:?}", other);
                    other
                }
            })
    }

    async fn update(&self, id: i64, changes: UserChanges) -> Result<Option<User>, AppError> {
        let password_hash = match &changes.password {
            Some(raw) => Some(hash_password(raw.expose_secret())?),
            None => None,
        };

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE users SET ");
        push_changes(&mut builder, changes, password_hash);
        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" RETURNING ")
            .push(USER_COLUMNS);

        builder
            .build_query_as::<User>()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| match AppError::from(e) {
                AppError::Conflict(_) => AppError::Conflict("Email already registered".to_string()),
                other => other,
            })
    }

    async fn consume_reset_token(
        &self,
        id: i64,
        token_hash: &str,
        now: DateTime<Utc>,
        changes: UserChanges,
    ) -> Result<Option<User>, AppError> {
        let password_hash = match &changes.password {
            Some(raw) => Some(hash_password(raw.expose_secret())?),
            None => None,
        };

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE users SET ");
        push_changes(&mut builder, changes, password_hash);
        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND reset_token_hash = ")
            .push_bind(token_hash.to_string())
            .push(" AND reset_token_expires > ")
            .push_bind(now)
            .push(" RETURNING ")
            .push(USER_COLUMNS);

        Ok(builder
            .build_query_as::<User>()
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list(&self, filter: &UserFilter, skip: i64, limit: i64) -> Result<Vec<User>, AppError> {
        let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM users", USER_COLUMNS));
        push_filter(&mut builder, filter);
        builder
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(skip);
        Ok(builder.build_query_as::<User>().fetch_all(&self.pool).await?)
    }

    async fn count(&self, filter: &UserFilter) -> Result<i64, AppError> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filter(&mut builder, filter);
        let (count,): (i64,) = builder.build_query_as().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn delete(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cart(&self, user_id: i64) -> Result<Vec<CartItem>, AppError> {
        Ok(sqlx::query_as::<_, CartItem>(
            "SELECT product_id, quantity, added_at FROM cart_items WHERE user_id = $1 ORDER BY added_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn add_to_cart(&self, user_id: i64, product_id: i64, quantity: i32) -> Result<CartItem, AppError> {
        Ok(sqlx::query_as::<_, CartItem>(
            r#"
            INSERT INTO cart_items (user_id, product_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, product_id)
            DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
            RETURNING product_id, quantity, added_at
            "#,
        )
        .bind(user_id)
        .bind(product_id)
        .bind(quantity)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn set_cart_quantity(&self, user_id: i64, product_id: i64, quantity: i32) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE cart_items SET quantity = $3 WHERE user_id = $1 AND product_id = $2")
            .bind(user_id)
            .bind(product_id)
            .bind(quantity)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_from_cart(&self, user_id: i64, product_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2")
            .bind(user_id)
            .bind(product_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_cart(&self, user_id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn wishlist(&self, user_id: i64) -> Result<Vec<WishlistItem>, AppError> {
        Ok(sqlx::query_as::<_, WishlistItem>(
            "SELECT product_id, added_at FROM wishlist_items WHERE user_id = $1 ORDER BY added_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn add_to_wishlist(&self, user_id: i64, product_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT INTO wishlist_items (user_id, product_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(product_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_from_wishlist(&self, user_id: i64, product_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM wishlist_items WHERE user_id = $1 AND product_id = $2")
            .bind(user_id)
            .bind(product_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn listings(&self, user_id: i64) -> Result<Vec<Listing>, AppError> {
        sqlx::query_as::<_, ListingRow>(
            "SELECT product_id, status, created_at FROM listings WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Listing::try_from)
        .collect()
    }

    async fn add_listing(&self, user_id: i64, product_id: i64) -> Result<(), AppError> {
        sqlx::query("INSERT INTO listings (user_id, product_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(user_id)
            .bind(product_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_listing_status(
        &self,
        user_id: i64,
        product_id: i64,
        status: ListingStatus,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE listings SET status = $3 WHERE user_id = $1 AND product_id = $2")
            .bind(user_id)
            .bind(product_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_listing(&self, user_id: i64, product_id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM listings WHERE user_id = $1 AND product_id = $2")
            .bind(user_id)
            .bind(product_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn pull_from_all_carts(&self, product_id: i64) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM cart_items WHERE product_id = $1")
            .bind(product_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn pull_from_all_wishlists(&self, product_id: i64) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM wishlist_items WHERE product_id = $1")
            .bind(product_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
