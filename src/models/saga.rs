// src/models/saga.rs

//! Persisted saga records for the two workflows that touch several rows
//! without a shared transaction: order placement and product deletion.
//!
//! Every step is idempotent, and the record is saved after each step, so a
//! crash leaves enough behind for the coordinator to finish or undo the work.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{OrderItem, PaymentMethod, ShippingAddress};

pub type SagaId = String;

/// Failed attempts before a saga is parked in its terminal `Failed` state.
pub const MAX_RETRIES: u8 = 10;

pub const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// How long a saga driven inline by a request is left alone by the
/// coordinator before it is considered abandoned.
pub const IN_FLIGHT_LEASE: Duration = Duration::from_secs(60);

fn chrono_span(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_default()
}

/// Bookkeeping shared by every saga kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaMeta {
    pub id: SagaId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub retries: u8,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl SagaMeta {
    fn new(id: SagaId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            updated_at: now,
            retries: 0,
            next_retry_at: Some(now + chrono_span(IN_FLIGHT_LEASE)),
        }
    }

    /// 1s, 2s, 4s ... capped at [`MAX_BACKOFF`].
    pub fn next_backoff(&self) -> Duration {
        let backoff = Duration::from_secs(1) * 2u32.saturating_pow(self.retries as u32);
        std::cmp::min(backoff, MAX_BACKOFF)
    }

    fn ready(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at.is_none_or(|at| now >= at)
    }

    /// Counts a failure. Returns true when the retry budget is exhausted.
    fn record_failure(&mut self, now: DateTime<Utc>) -> bool {
        let backoff = self.next_backoff();
        self.retries = self.retries.saturating_add(1);
        self.updated_at = now;
        if self.retries >= MAX_RETRIES {
            self.next_retry_at = None;
            true
        } else {
            self.next_retry_at = Some(now + chrono_span(backoff));
            false
        }
    }

    /// Records a committed step. The lease is renewed so the coordinator
    /// keeps off a saga that is still being driven.
    fn advance(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.next_retry_at = Some(now + chrono_span(IN_FLIGHT_LEASE));
    }
}

// =============================================================================
// Place Order
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlaceOrderState {
    /// Nothing written yet; reservations may be partially applied after a crash.
    Pending,
    /// Every line item's stock has been decremented.
    StockReserved,
    Completed { order_id: i64 },
    /// Reservations were released; no order exists.
    Compensated { step: u8, reason: String },
    /// Compensation itself kept failing.
    Failed { step: u8, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrderInput {
    pub user_id: i64,
    pub items: Vec<OrderItem>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub items_price: Decimal,
    pub shipping_price: Decimal,
    pub tax_price: Decimal,
    pub total_price: Decimal,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrderSaga {
    pub meta: SagaMeta,
    pub state: PlaceOrderState,
    pub input: PlaceOrderInput,
}

impl PlaceOrderSaga {
    pub const STEP_RESERVE: u8 = 0;
    pub const STEP_CREATE_ORDER: u8 = 1;

    pub fn new(id: SagaId, input: PlaceOrderInput, now: DateTime<Utc>) -> Self {
        Self {
            meta: SagaMeta::new(id, now),
            state: PlaceOrderState::Pending,
            input,
        }
    }

    /// Idempotency key for decrementing line item `idx`.
    pub fn reserve_key(&self, idx: usize) -> String {
        format!("{}:reserve:{}", self.meta.id, idx)
    }

    /// Idempotency key for giving line item `idx` back.
    pub fn release_key(&self, idx: usize) -> String {
        format!("{}:release:{}", self.meta.id, idx)
    }

    pub fn transition(&mut self, state: PlaceOrderState, now: DateTime<Utc>) {
        self.state = state;
        self.meta.advance(now);
    }

    /// Compensation failed; back off, or give up after [`MAX_RETRIES`].
    pub fn fail(&mut self, step: u8, error: String, now: DateTime<Utc>) {
        if self.meta.record_failure(now) {
            self.state = PlaceOrderState::Failed { step, error };
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            PlaceOrderState::Completed { .. }
                | PlaceOrderState::Compensated { .. }
                | PlaceOrderState::Failed { .. }
        )
    }
}

// =============================================================================
// Delete Product
// =============================================================================

/// Forward-only cascade. Each state names the last step that committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeleteProductState {
    Pending,
    ProductRemoved,
    ListingsPulled,
    CartsPulled,
    Completed,
    /// Retry budget exhausted at `step`; needs an operator.
    Failed { step: u8, error: String },
}

impl DeleteProductState {
    /// Human-readable names of the steps that have committed.
    pub fn completed_steps(&self) -> Vec<String> {
        let done: &[&str] = match self {
            Self::Pending | Self::Failed { .. } => &[],
            Self::ProductRemoved => &["product_removed"],
            Self::ListingsPulled => &["product_removed", "listings_pulled"],
            Self::CartsPulled => &["product_removed", "listings_pulled", "carts_pulled"],
            Self::Completed => &[
                "product_removed",
                "listings_pulled",
                "carts_pulled",
                "wishlists_pulled",
            ],
        };
        done.iter().map(|s| s.to_string()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteProductInput {
    pub product_id: i64,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteProductSaga {
    pub meta: SagaMeta,
    pub state: DeleteProductState,
    pub input: DeleteProductInput,
    /// Last error seen while the saga is still retrying.
    pub last_error: Option<String>,
}

impl DeleteProductSaga {
    pub fn new(id: SagaId, input: DeleteProductInput, now: DateTime<Utc>) -> Self {
        Self {
            meta: SagaMeta::new(id, now),
            state: DeleteProductState::Pending,
            input,
            last_error: None,
        }
    }

    /// Index of the next step to run, if any.
    pub fn next_step(&self) -> Option<u8> {
        match self.state {
            DeleteProductState::Pending => Some(0),
            DeleteProductState::ProductRemoved => Some(1),
            DeleteProductState::ListingsPulled => Some(2),
            DeleteProductState::CartsPulled => Some(3),
            DeleteProductState::Completed | DeleteProductState::Failed { .. } => None,
        }
    }

    /// Moves past a committed step. Any pending backoff is replaced by a
    /// fresh lease.
    pub fn transition(&mut self, state: DeleteProductState, now: DateTime<Utc>) {
        self.state = state;
        self.last_error = None;
        self.meta.advance(now);
    }

    pub fn fail(&mut self, step: u8, error: String, now: DateTime<Utc>) {
        if self.meta.record_failure(now) {
            self.state = DeleteProductState::Failed {
                step,
                error: error.clone(),
            };
        }
        self.last_error = Some(error);
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            DeleteProductState::Completed | DeleteProductState::Failed { .. }
        )
    }
}

// =============================================================================
// Wrapper
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaKind {
    PlaceOrder,
    DeleteProduct,
}

impl SagaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlaceOrder => "place_order",
            Self::DeleteProduct => "delete_product",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Saga {
    PlaceOrder(PlaceOrderSaga),
    DeleteProduct(DeleteProductSaga),
}

impl Saga {
    pub fn meta(&self) -> &SagaMeta {
        match self {
            Saga::PlaceOrder(s) => &s.meta,
            Saga::DeleteProduct(s) => &s.meta,
        }
    }

    pub fn id(&self) -> &str {
        &self.meta().id
    }

    pub fn kind(&self) -> SagaKind {
        match self {
            Saga::PlaceOrder(_) => SagaKind::PlaceOrder,
            Saga::DeleteProduct(_) => SagaKind::DeleteProduct,
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            Saga::PlaceOrder(s) => s.is_terminal(),
            Saga::DeleteProduct(s) => s.is_terminal(),
        }
    }

    pub fn is_ready_for_retry(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.meta().ready(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn cascade() -> DeleteProductSaga {
        DeleteProductSaga::new(
            "saga-1".into(),
            DeleteProductInput {
                product_id: 9,
                owner_id: Some(1),
            },
            t0(),
        )
    }

    #[test]
    fn inline_sagas_are_leased_before_recovery() {
        let saga = Saga::DeleteProduct(cascade());
        assert!(!saga.is_ready_for_retry(t0()));
        assert!(saga.is_ready_for_retry(t0() + chrono_span(IN_FLIGHT_LEASE)));
    }

    #[test]
    fn committed_step_renews_the_lease() {
        let mut saga = cascade();
        let later = t0() + chrono::Duration::seconds(30);
        saga.transition(DeleteProductState::ProductRemoved, later);

        let saga = Saga::DeleteProduct(saga);
        assert!(!saga.is_ready_for_retry(later));
        assert!(!saga.is_ready_for_retry(t0() + chrono_span(IN_FLIGHT_LEASE)));
        assert!(saga.is_ready_for_retry(later + chrono_span(IN_FLIGHT_LEASE)));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut saga = cascade();
        saga.meta.retries = 0;
        assert_eq!(saga.meta.next_backoff(), Duration::from_secs(1));
        saga.meta.retries = 3;
        assert_eq!(saga.meta.next_backoff(), Duration::from_secs(8));
        saga.meta.retries = 9;
        assert_eq!(saga.meta.next_backoff(), MAX_BACKOFF);
    }

    #[test]
    fn failure_schedules_retry_then_parks() {
        let mut saga = cascade();
        saga.transition(DeleteProductState::ProductRemoved, t0());

        saga.fail(1, "boom".into(), t0());
        assert_eq!(saga.state, DeleteProductState::ProductRemoved);
        assert_eq!(saga.meta.next_retry_at, Some(t0() + chrono::Duration::seconds(1)));
        assert_eq!(saga.last_error.as_deref(), Some("boom"));

        for _ in 1..MAX_RETRIES {
            saga.fail(1, "boom".into(), t0());
        }
        assert!(matches!(saga.state, DeleteProductState::Failed { step: 1, .. }));
        assert!(saga.is_terminal());
    }

    #[test]
    fn completed_steps_track_progress() {
        assert_eq!(
            DeleteProductState::ListingsPulled.completed_steps(),
            ["product_removed", "listings_pulled"]
        );
        assert!(DeleteProductState::Pending.completed_steps().is_empty());
    }

    #[test]
    fn saga_round_trips_as_json() {
        let saga = Saga::DeleteProduct(cascade());
        let json = serde_json::to_string(&saga).unwrap();
        assert!(json.contains("\"kind\":\"delete_product\""));
        let back: Saga = serde_json::from_str(&json).unwrap();
        assert_eq!(back, saga);
    }
}
