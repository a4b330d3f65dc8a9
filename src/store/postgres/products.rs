// src/store/postgres/products.rs

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, types::Json};

use super::like_pattern;
use crate::{
    error::AppError,
    models::product::{NewProduct, Product, ProductChanges, ProductFilter, ProductSort, StockAdjustment},
    store::ProductStore,
};

const PRODUCT_COLUMNS: &str = "id, title, price, category, description, image, stock, rating_rate, \
     rating_count, owner_id, features, is_active, created_at, updated_at";

pub struct PgProductStore {
    pool: PgPool,
}

impl PgProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &ProductFilter) {
    builder.push(" WHERE TRUE");
    if let Some(category) = filter.category.as_deref() {
        builder.push(" AND LOWER(category) = LOWER(").push_bind(category.to_string()).push(")");
    }
    if let Some(search) = filter.search.as_deref() {
        let pattern = like_pattern(search);
        builder
            .push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR category ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(min) = filter.min_price {
        builder.push(" AND price >= ").push_bind(min);
    }
    if let Some(max) = filter.max_price {
        builder.push(" AND price <= ").push_bind(max);
    }
    if let Some(active) = filter.active {
        builder.push(" AND is_active = ").push_bind(active);
    }
    if let Some(owner_id) = filter.owner_id {
        builder.push(" AND owner_id = ").push_bind(owner_id);
    }
    if let Some(limit) = filter.stock_below {
        builder.push(" AND stock < ").push_bind(limit);
    }
    if let Some(since) = filter.created_since {
        builder.push(" AND created_at >= ").push_bind(since);
    }
}

fn order_by(sort: ProductSort) -> &'static str {
    match sort {
        ProductSort::Newest => " ORDER BY created_at DESC, id DESC",
        ProductSort::PriceAsc => " ORDER BY price ASC, id",
        ProductSort::PriceDesc => " ORDER BY price DESC, id",
        ProductSort::Rating => " ORDER BY rating_rate DESC, id",
        ProductSort::StockAsc => " ORDER BY stock ASC, id",
    }
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Product>, AppError> {
        let sql = format!("SELECT {} FROM products WHERE id = $1", PRODUCT_COLUMNS);
        Ok(sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find(
        &self,
        filter: &ProductFilter,
        sort: ProductSort,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Product>, AppError> {
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("SELECT {} FROM products", PRODUCT_COLUMNS));
        push_filter(&mut builder, filter);
        builder
            .push(order_by(sort))
            .push(" LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(skip);
        Ok(builder.build_query_as::<Product>().fetch_all(&self.pool).await?)
    }

    async fn count(&self, filter: &ProductFilter) -> Result<i64, AppError> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM products");
        push_filter(&mut builder, filter);
        let (count,): (i64,) = builder.build_query_as().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn create(&self, new: NewProduct) -> Result<Product, AppError> {
        let sql = format!(
            r#"
            INSERT INTO products (title, price, category, description, image, stock, owner_id, features)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        );
        sqlx::query_as::<_, Product>(&sql)
            .bind(new.title)
            .bind(new.price)
            .bind(new.category)
            .bind(new.description)
            .bind(new.image)
            .bind(new.stock)
            .bind(new.owner_id)
            .bind(Json(new.features))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                // 23503: foreign_key_violation on owner_id
                if let sqlx::Error::Database(db_err) = &e {
                    if db_err.code().as_deref() == Some("23503") {
                        return AppError::NotFound("Owner not found".to_string());
                    }
                }
                tracing::error!("Failed to create product: {:?}", e);
                AppError::from(e)
            })
    }

    async fn update(&self, id: i64, changes: ProductChanges) -> Result<Option<Product>, AppError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE products SET ");
        let mut separated = builder.separated(", ");

        if let Some(v) = changes.title {
            separated.push("title = ").push_bind_unseparated(v);
        }
        if let Some(v) = changes.price {
            separated.push("price = ").push_bind_unseparated(v);
        }
        if let Some(v) = changes.category {
            separated.push("category = ").push_bind_unseparated(v);
        }
        if let Some(v) = changes.description {
            separated.push("description = ").push_bind_unseparated(v);
        }
        if let Some(v) = changes.image {
            separated.push("image = ").push_bind_unseparated(v);
        }
        if let Some(v) = changes.stock {
            separated.push("stock = ").push_bind_unseparated(v);
        }
        if let Some(v) = changes.features {
            separated.push("features = ").push_bind_unseparated(Json(v));
        }
        if let Some(v) = changes.is_active {
            separated.push("is_active = ").push_bind_unseparated(v);
        }
        separated.push("updated_at = NOW()");

        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" RETURNING ")
            .push(PRODUCT_COLUMNS);

        Ok(builder
            .build_query_as::<Product>()
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_stock(&self, id: i64, delta: i32, op_key: &str) -> Result<StockAdjustment, AppError> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "INSERT INTO stock_movements (op_key, product_id, delta) VALUES ($1, $2, $3) ON CONFLICT (op_key) DO NOTHING",
        )
        .bind(op_key)
        .bind(id)
        .bind(delta)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(StockAdjustment::AlreadyApplied);
        }

        let updated: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE products SET stock = stock + $2, updated_at = NOW()
            WHERE id = $1 AND stock + $2 >= 0
            RETURNING stock
            "#,
        )
        .bind(id)
        .bind(delta)
        .fetch_optional(&mut *tx)
        .await?;

        match updated {
            Some((stock,)) => {
                tx.commit().await?;
                Ok(StockAdjustment::Applied { stock })
            }
            None => {
                let current: Option<(i32,)> = sqlx::query_as("SELECT stock FROM products WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?;
                // Releases the key claim too.
                tx.rollback().await?;
                Ok(match current {
                    Some((available,)) => StockAdjustment::Insufficient { available },
                    None => StockAdjustment::Missing,
                })
            }
        }
    }

    async fn stock_op_applied(&self, op_key: &str) -> Result<bool, AppError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT op_key FROM stock_movements WHERE op_key = $1")
            .bind(op_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}
