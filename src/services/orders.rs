// src/services/orders.rs

//! Order placement runs as a saga: stock is reserved first with keyed
//! conditional decrements, then the order row is written. Any failure after a
//! reservation releases what was taken, so stock and orders never disagree
//! once the saga reaches a terminal state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{Page, PageWindow, clock::Clock};
use crate::{
    error::AppError,
    models::{
        order::{
            NewOrder, Order, OrderFilter, OrderItem, OrderListParams, OrderStatus, OrderStatusChange,
            OrderSummary, OrderTotals, PlaceOrderRequest, UpdateOrderStatusRequest,
        },
        product::StockAdjustment,
        saga::{PlaceOrderInput, PlaceOrderSaga, PlaceOrderState, Saga},
    },
    store::{OrderStore, ProductStore, SagaStore, UserStore},
};

const ORDER_NUMBER_ATTEMPTS: usize = 5;

/// `ORD-YYYYMMDD-NNNNN`.
pub fn order_number(at: DateTime<Utc>, suffix: u32) -> String {
    format!("ORD-{}-{:05}", at.format("%Y%m%d"), suffix % 100_000)
}

#[derive(Clone)]
pub struct OrderService {
    users: Arc<dyn UserStore>,
    products: Arc<dyn ProductStore>,
    orders: Arc<dyn OrderStore>,
    sagas: Arc<dyn SagaStore>,
    clock: Arc<dyn Clock>,
}

impl OrderService {
    pub fn new(
        users: Arc<dyn UserStore>,
        products: Arc<dyn ProductStore>,
        orders: Arc<dyn OrderStore>,
        sagas: Arc<dyn SagaStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            products,
            orders,
            sagas,
            clock,
        }
    }

    /// Places an order for `user_id`.
    ///
    /// Every line item is checked against the catalog before anything is
    /// written; a request that cannot be filled leaves stock untouched.
    pub async fn place_order(&self, user_id: i64, req: PlaceOrderRequest) -> Result<Order, AppError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let items = self.snapshot_items(&req).await?;
        let items_price = items
            .iter()
            .map(|item| item.price * Decimal::from(item.quantity))
            .sum::<Decimal>();
        let shipping_price = Decimal::ZERO;
        let tax_price = Decimal::ZERO;

        let input = PlaceOrderInput {
            user_id,
            items,
            shipping_address: req.shipping_address,
            payment_method: req.payment_method,
            items_price,
            shipping_price,
            tax_price,
            total_price: items_price + shipping_price + tax_price,
            notes: req.notes.trim().to_string(),
        };

        let mut saga = PlaceOrderSaga::new(Uuid::new_v4().to_string(), input, self.clock.now());
        self.save(&saga).await?;
        tracing::debug!(saga_id = %saga.meta.id, user_id, "Order saga started");

        if let Err(e) = self.reserve_stock(&saga).await {
            // A failed release is retried by the coordinator; the caller
            // still learns why the order was refused.
            let _ = self
                .compensate(&mut saga, PlaceOrderSaga::STEP_RESERVE, e.to_string())
                .await;
            return Err(e);
        }
        saga.transition(PlaceOrderState::StockReserved, self.clock.now());
        self.save(&saga).await?;

        let order = match self.create_order(&saga).await {
            Ok(order) => order,
            Err(e) => {
                let _ = self
                    .compensate(&mut saga, PlaceOrderSaga::STEP_CREATE_ORDER, e.to_string())
                    .await;
                return Err(e);
            }
        };

        saga.transition(
            PlaceOrderState::Completed { order_id: order.id },
            self.clock.now(),
        );
        if let Err(e) = self.save(&saga).await {
            // The order exists; recovery will find it by saga id.
            tracing::error!(saga_id = %saga.meta.id, "Failed to record completed order saga: {}", e);
        }

        tracing::info!(
            order_number = %order.order_number,
            user_id,
            total = %order.total_price,
            "Order placed"
        );
        Ok(order)
    }

    /// Finishes a saga left behind by a crashed or timed-out request: if its
    /// order was written it is completed, otherwise every reservation is
    /// released.
    pub async fn resume(&self, mut saga: PlaceOrderSaga) -> Result<(), AppError> {
        if let Some(order) = self.orders.find_by_saga(&saga.meta.id).await? {
            saga.transition(
                PlaceOrderState::Completed { order_id: order.id },
                self.clock.now(),
            );
            tracing::info!(saga_id = %saga.meta.id, order_id = order.id, "Recovered order saga");
            return self.save(&saga).await;
        }

        let step = match saga.state {
            PlaceOrderState::StockReserved => PlaceOrderSaga::STEP_CREATE_ORDER,
            _ => PlaceOrderSaga::STEP_RESERVE,
        };
        self.compensate(&mut saga, step, "Abandoned before completion".to_string())
            .await
    }

    /// Resolves and prices every line item without writing anything.
    async fn snapshot_items(&self, req: &PlaceOrderRequest) -> Result<Vec<OrderItem>, AppError> {
        let mut requested: HashMap<i64, i32> = HashMap::new();
        let mut items = Vec::with_capacity(req.items.len());

        for line in &req.items {
            if line.quantity < 1 {
                return Err(AppError::Validation("Quantity must be at least 1".to_string()));
            }
            let product = self
                .products
                .find_by_id(line.product_id)
                .await?
                .filter(|p| p.is_active)
                .ok_or(AppError::ProductNotFound(line.product_id))?;

            // Repeated lines for one product draw from the same stock.
            let total = requested.entry(product.id).or_insert(0);
            *total += line.quantity;
            if *total > product.stock {
                return Err(AppError::InsufficientStock {
                    product_id: product.id,
                    title: product.title.clone(),
                    requested: *total,
                    available: product.stock,
                });
            }

            items.push(OrderItem {
                product_id: product.id,
                name: product.title,
                quantity: line.quantity,
                price: product.price,
                image: product.image,
            });
        }
        Ok(items)
    }

    async fn reserve_stock(&self, saga: &PlaceOrderSaga) -> Result<(), AppError> {
        for (idx, item) in saga.input.items.iter().enumerate() {
            let adjustment = self
                .products
                .increment_stock(item.product_id, -item.quantity, &saga.reserve_key(idx))
                .await?;
            match adjustment {
                StockAdjustment::Applied { .. } | StockAdjustment::AlreadyApplied => {}
                StockAdjustment::Insufficient { available } => {
                    return Err(AppError::InsufficientStock {
                        product_id: item.product_id,
                        title: item.name.clone(),
                        requested: item.quantity,
                        available,
                    });
                }
                StockAdjustment::Missing => return Err(AppError::ProductNotFound(item.product_id)),
            }
        }
        Ok(())
    }

    /// Writes the order row, drawing a new number when one collides.
    async fn create_order(&self, saga: &PlaceOrderSaga) -> Result<Order, AppError> {
        let input = &saga.input;
        // A product removed while its stock was held must not land on a new order.
        for item in &input.items {
            if self.products.find_by_id(item.product_id).await?.is_none() {
                return Err(AppError::ProductNotFound(item.product_id));
            }
        }

        for attempt in 1..=ORDER_NUMBER_ATTEMPTS {
            let now = self.clock.now();
            let number = order_number(now, rand::thread_rng().gen_range(0..100_000));
            let result = self
                .orders
                .create(NewOrder {
                    user_id: input.user_id,
                    order_number: number.clone(),
                    items: input.items.clone(),
                    shipping_address: input.shipping_address.clone(),
                    payment_method: input.payment_method,
                    items_price: input.items_price,
                    shipping_price: input.shipping_price,
                    tax_price: input.tax_price,
                    total_price: input.total_price,
                    notes: input.notes.clone(),
                    saga_id: saga.meta.id.clone(),
                    created_at: now,
                })
                .await;

            match result {
                Ok(order) => return Ok(order),
                Err(AppError::Conflict(_)) => {
                    if let Some(order) = self.orders.find_by_saga(&saga.meta.id).await? {
                        return Ok(order);
                    }
                    tracing::warn!(%number, attempt, "Order number collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(AppError::Conflict(
            "Could not allocate a unique order number".to_string(),
        ))
    }

    /// Gives back every reservation this saga applied. A release that fails
    /// leaves the saga scheduled for another attempt and is returned.
    async fn compensate(&self, saga: &mut PlaceOrderSaga, step: u8, reason: String) -> Result<(), AppError> {
        let released = self.release_stock(saga).await;
        match &released {
            Ok(()) => {
                tracing::info!(saga_id = %saga.meta.id, step, %reason, "Order saga compensated");
                saga.transition(PlaceOrderState::Compensated { step, reason }, self.clock.now());
            }
            Err(e) => {
                tracing::error!(saga_id = %saga.meta.id, step, "Stock release failed: {}", e);
                saga.fail(step, e.to_string(), self.clock.now());
            }
        }
        if let Err(e) = self.save(saga).await {
            tracing::error!(saga_id = %saga.meta.id, "Failed to record order saga: {}", e);
        }
        released
    }

    async fn release_stock(&self, saga: &PlaceOrderSaga) -> Result<(), AppError> {
        for (idx, item) in saga.input.items.iter().enumerate() {
            if !self.products.stock_op_applied(&saga.reserve_key(idx)).await? {
                continue;
            }
            let adjustment = self
                .products
                .increment_stock(item.product_id, item.quantity, &saga.release_key(idx))
                .await?;
            if adjustment == StockAdjustment::Missing {
                tracing::warn!(product_id = item.product_id, "Product gone, nothing to release");
            }
        }
        Ok(())
    }

    async fn save(&self, saga: &PlaceOrderSaga) -> Result<(), AppError> {
        self.sagas.save(&Saga::PlaceOrder(saga.clone())).await
    }

    // ------------------------------------------------------------------
    // Reads and admin edits
    // ------------------------------------------------------------------

    pub async fn list_for_user(
        &self,
        user_id: i64,
        params: &OrderListParams,
    ) -> Result<Page<OrderSummary>, AppError> {
        let filter = OrderFilter {
            user_id: Some(user_id),
            ..filter_from(params)
        };
        let (page, _) = self.list_filtered(&filter, params).await?;
        Ok(page)
    }

    /// An order owned by someone else is reported as missing.
    pub async fn get_for_user(&self, user_id: i64, order_id: i64) -> Result<Order, AppError> {
        self.orders
            .find_by_id(order_id)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| AppError::NotFound("Order not found".to_string()))
    }

    pub async fn get(&self, order_id: i64) -> Result<Order, AppError> {
        self.orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Order not found".to_string()))
    }

    /// Every order matching `params`, plus count and revenue over the whole
    /// filtered set.
    pub async fn list_all(
        &self,
        params: &OrderListParams,
    ) -> Result<(Page<OrderSummary>, OrderTotals), AppError> {
        self.list_filtered(&filter_from(params), params).await
    }

    async fn list_filtered(
        &self,
        filter: &OrderFilter,
        params: &OrderListParams,
    ) -> Result<(Page<OrderSummary>, OrderTotals), AppError> {
        let window = PageWindow::new(params.page, params.limit);
        let orders = self.orders.list(filter, window.skip(), window.limit()).await?;
        let totals = self.orders.totals(filter).await?;
        let items = orders.iter().map(OrderSummary::from).collect();
        Ok((window.wrap(items, totals.count), totals))
    }

    /// Whitelisted status edit. Entering `Shipped` or `Delivered` for the
    /// first time stamps the matching date.
    pub async fn update_status(
        &self,
        order_id: i64,
        req: UpdateOrderStatusRequest,
    ) -> Result<Order, AppError> {
        let order = self.get(order_id).await?;
        let now = self.clock.now();

        let mut details = order.shipping_details.clone();
        match req.order_status {
            Some(OrderStatus::Shipped) if details.shipped_date.is_none() => {
                details.shipped_date = Some(now);
            }
            Some(OrderStatus::Delivered) if details.delivered_date.is_none() => {
                details.delivered_date = Some(now);
            }
            _ => {}
        }
        if let Some(carrier) = req.carrier {
            details.carrier = Some(carrier);
        }
        if let Some(tracking) = req.tracking_number {
            details.tracking_number = Some(tracking);
        }
        if let Some(estimate) = req.estimated_delivery {
            details.estimated_delivery = Some(estimate);
        }

        let change = OrderStatusChange {
            order_status: req.order_status,
            payment_status: req.payment_status,
            notes: req.notes,
            shipping_details: (details != order.shipping_details).then_some(details),
        };
        if change.order_status.is_none()
            && change.payment_status.is_none()
            && change.notes.is_none()
            && change.shipping_details.is_none()
        {
            return Err(AppError::Validation("No valid fields to update".to_string()));
        }

        let updated = self
            .orders
            .update_status(order_id, change)
            .await?
            .ok_or_else(|| AppError::NotFound("Order not found".to_string()))?;

        tracing::info!(
            order_number = %updated.order_number,
            status = updated.order_status.as_str(),
            payment = updated.payment_status.as_str(),
            "Order status updated"
        );
        Ok(updated)
    }
}

fn filter_from(params: &OrderListParams) -> OrderFilter {
    OrderFilter {
        user_id: None,
        order_status: params.status,
        payment_status: params.payment_status,
        from: params.from,
        to: params.to,
    }
}
