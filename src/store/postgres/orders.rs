// src/store/postgres/orders.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, types::Json};

use crate::{
    error::AppError,
    models::order::{
        NewOrder, Order, OrderFilter, OrderItem, OrderStatusChange, OrderTotals, ShippingAddress,
        ShippingDetails,
    },
    store::OrderStore,
};

const ORDER_COLUMNS: &str = "id, user_id, order_number, items, shipping_address, payment_method, \
     payment_status, items_price, shipping_price, tax_price, total_price, order_status, \
     shipping_details, notes, saga_id, created_at, updated_at";

/// Row as stored; enums travel as their display text.
#[derive(FromRow)]
struct OrderRow {
    id: i64,
    user_id: i64,
    order_number: String,
    items: Json<Vec<OrderItem>>,
    shipping_address: Json<ShippingAddress>,
    payment_method: String,
    payment_status: String,
    items_price: Decimal,
    shipping_price: Decimal,
    tax_price: Decimal,
    total_price: Decimal,
    order_status: String,
    shipping_details: Json<ShippingDetails>,
    notes: String,
    saga_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = AppError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            order_number: row.order_number,
            items: row.items.0,
            shipping_address: row.shipping_address.0,
            payment_method: row.payment_method.parse().map_err(AppError::Internal)?,
            payment_status: row.payment_status.parse().map_err(AppError::Internal)?,
            items_price: row.items_price,
            shipping_price: row.shipping_price,
            tax_price: row.tax_price,
            total_price: row.total_price,
            order_status: row.order_status.parse().map_err(AppError::Internal)?,
            shipping_details: row.shipping_details.0,
            notes: row.notes,
            saga_id: row.saga_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TotalsRow {
    count: i64,
    revenue: Decimal,
}

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &OrderFilter) {
    builder.push(" WHERE TRUE");
    if let Some(user_id) = filter.user_id {
        builder.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(status) = filter.order_status {
        builder.push(" AND order_status = ").push_bind(status.as_str());
    }
    if let Some(status) = filter.payment_status {
        builder.push(" AND payment_status = ").push_bind(status.as_str());
    }
    if let Some(from) = filter.from {
        builder.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        builder.push(" AND created_at <= ").push_bind(to);
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create(&self, new: NewOrder) -> Result<Order, AppError> {
        let sql = format!(
            r#"
            INSERT INTO orders
                (user_id, order_number, items, shipping_address, payment_method, items_price,
                 shipping_price, tax_price, total_price, notes, saga_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
            RETURNING {}
            "#,
            ORDER_COLUMNS
        );
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(new.user_id)
            .bind(new.order_number)
            .bind(Json(new.items))
            .bind(Json(new.shipping_address))
            .bind(new.payment_method.as_str())
            .bind(new.items_price)
            .bind(new.shipping_price)
            .bind(new.tax_price)
            .bind(new.total_price)
            .bind(new.notes)
            .bind(new.saga_id)
            .bind(new.created_at)
            .fetch_one(&self.pool)
            .await?
            .try_into()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Order>, AppError> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn find_by_saga(&self, saga_id: &str) -> Result<Option<Order>, AppError> {
        let sql = format!("SELECT {} FROM orders WHERE saga_id = $1", ORDER_COLUMNS);
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(saga_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn list(&self, filter: &OrderFilter, skip: i64, limit: i64) -> Result<Vec<Order>, AppError> {
        let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM orders", ORDER_COLUMNS));
        push_filter(&mut builder, filter);
        builder
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(skip);
        builder
            .build_query_as::<OrderRow>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Order::try_from)
            .collect()
    }

    async fn totals(&self, filter: &OrderFilter) -> Result<OrderTotals, AppError> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) AS count, COALESCE(SUM(total_price), 0) AS revenue FROM orders",
        );
        push_filter(&mut builder, filter);
        let row = builder.build_query_as::<TotalsRow>().fetch_one(&self.pool).await?;
        Ok(OrderTotals {
            count: row.count,
            revenue: row.revenue,
        })
    }

    async fn count_referencing_product(&self, product_id: i64) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE items @> $1")
            .bind(Json(json!([{ "productId": product_id }])))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn update_status(&self, id: i64, change: OrderStatusChange) -> Result<Option<Order>, AppError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE orders SET ");
        let mut separated = builder.separated(", ");

        if let Some(v) = change.order_status {
            separated.push("order_status = ").push_bind_unseparated(v.as_str());
        }
        if let Some(v) = change.payment_status {
            separated.push("payment_status = ").push_bind_unseparated(v.as_str());
        }
        if let Some(v) = change.notes {
            separated.push("notes = ").push_bind_unseparated(v);
        }
        if let Some(v) = change.shipping_details {
            separated.push("shipping_details = ").push_bind_unseparated(Json(v));
        }
        separated.push("updated_at = NOW()");

        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" RETURNING ")
            .push(ORDER_COLUMNS);

        builder
            .build_query_as::<OrderRow>()
            .fetch_optional(&self.pool)
            .await?
            .map(Order::try_from)
            .transpose()
    }
}
