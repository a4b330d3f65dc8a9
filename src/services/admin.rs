// src/services/admin.rs

use std::sync::Arc;

use chrono::NaiveTime;
use rand::{Rng, distributions::Alphanumeric, rngs::OsRng};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Serialize;

use super::{Page, PageWindow, catalog::DEFAULT_LOW_STOCK_THRESHOLD, clock::Clock};
use crate::{
    error::AppError,
    models::{
        order::{OrderFilter, OrderStatus},
        product::ProductFilter,
        user::{
            AdminCreateUserRequest, AdminUpdateUserRequest, AdminUserSummary, NewUser, RoleFilter,
            UserChanges, UserFilter, UserListParams,
        },
    },
    store::{OrderStore, ProductStore, UserStore},
    utils::validate::normalize_contact,
};

const GENERATED_PASSWORD_LEN: usize = 12;
const ACTIVE_USER_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStats {
    pub order_count: i64,
    pub total_spent: Decimal,
    pub average_order_value: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserDetails {
    pub user: AdminUserSummary,
    pub order_stats: OrderStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedUser {
    pub user: AdminUserSummary,
    /// Present only when the password was generated; shown this once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_users: i64,
    pub total_products: i64,
    pub total_orders: i64,
    pub new_users_today: i64,
    pub new_products_today: i64,
    pub active_users: i64,
    pub low_stock_products: i64,
    pub pending_orders: i64,
    pub delivered_orders: i64,
    pub total_revenue: Decimal,
    pub today_revenue: Decimal,
    pub average_order_value: Decimal,
}

/// User management and the dashboard. Product and order administration goes
/// through the catalog and order services.
#[derive(Clone)]
pub struct AdminService {
    users: Arc<dyn UserStore>,
    products: Arc<dyn ProductStore>,
    orders: Arc<dyn OrderStore>,
    clock: Arc<dyn Clock>,
}

impl AdminService {
    pub fn new(
        users: Arc<dyn UserStore>,
        products: Arc<dyn ProductStore>,
        orders: Arc<dyn OrderStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            products,
            orders,
            clock,
        }
    }

    pub async fn list_users(&self, params: &UserListParams) -> Result<Page<AdminUserSummary>, AppError> {
        let window = PageWindow::new(params.page, params.limit);
        let filter = UserFilter {
            search: params.search.clone().filter(|s| !s.trim().is_empty()),
            role: params.role,
            active: params.active,
            ..Default::default()
        };
        let users = self.users.list(&filter, window.skip(), window.limit()).await?;
        let total = self.users.count(&filter).await?;
        Ok(window.wrap(users.iter().map(AdminUserSummary::from).collect(), total))
    }

    pub async fn user_details(&self, id: i64) -> Result<AdminUserDetails, AppError> {
        let user = self
            .users
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let totals = self
            .orders
            .totals(&OrderFilter {
                user_id: Some(id),
                ..Default::default()
            })
            .await?;

        Ok(AdminUserDetails {
            user: AdminUserSummary::from(&user),
            order_stats: OrderStats {
                order_count: totals.count,
                total_spent: totals.revenue,
                average_order_value: average(totals.revenue, totals.count),
            },
        })
    }

    /// Admin-created accounts skip email verification. When no password is
    /// given one is generated and returned once.
    pub async fn create_user(&self, req: AdminCreateUserRequest) -> Result<CreatedUser, AppError> {
        let email = req.email.trim().to_lowercase();
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict(
                "User already exists with this email".to_string(),
            ));
        }

        let (password, generated_password) = match req.password {
            Some(password) => (password, None),
            None => {
                let generated = generate_password();
                (generated.clone(), Some(generated))
            }
        };

        let user = self
            .users
            .create(NewUser {
                name: req.name.trim().to_string(),
                email,
                password: SecretString::from(password),
                country: req.country.trim().to_string(),
                contact: normalize_contact(&req.contact),
                is_admin: req.is_admin,
                is_active: req.is_active.unwrap_or(true),
                email_verified: true,
                last_login: None,
            })
            .await?;

        tracing::info!(user_id = user.id, is_admin = user.is_admin, "User created by admin");
        Ok(CreatedUser {
            user: AdminUserSummary::from(&user),
            generated_password,
        })
    }

    pub async fn update_user(
        &self,
        actor_id: i64,
        id: i64,
        req: AdminUpdateUserRequest,
    ) -> Result<AdminUserSummary, AppError> {
        if id == actor_id && req.is_admin == Some(false) {
            return Err(AppError::Forbidden(
                "You cannot remove your own admin privileges".to_string(),
            ));
        }
        if id == actor_id && req.is_active == Some(false) {
            return Err(AppError::Forbidden(
                "You cannot deactivate your own account".to_string(),
            ));
        }

        let email = req.email.map(|e| e.trim().to_lowercase());
        if let Some(email) = &email {
            if let Some(existing) = self.users.find_by_email(email).await? {
                if existing.id != id {
                    return Err(AppError::Conflict("Email already in use".to_string()));
                }
            }
        }

        let password_changed_at = req.password.as_ref().map(|_| self.clock.now());
        let changes = UserChanges {
            name: req.name.map(|n| n.trim().to_string()),
            email,
            country: req.country.map(|c| c.trim().to_string()),
            contact: req.contact.as_deref().map(normalize_contact),
            is_admin: req.is_admin,
            is_active: req.is_active,
            password: req.password.map(SecretString::from),
            password_changed_at,
            ..Default::default()
        };

        let user = self
            .users
            .update(id, changes)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        tracing::info!(user_id = id, actor = actor_id, "User updated by admin");
        Ok(AdminUserSummary::from(&user))
    }

    /// Accounts that own orders are kept for the order history.
    pub async fn delete_user(&self, actor_id: i64, id: i64) -> Result<(), AppError> {
        if id == actor_id {
            return Err(AppError::Forbidden(
                "You cannot delete your own account".to_string(),
            ));
        }
        self.users
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let orders = self
            .orders
            .totals(&OrderFilter {
                user_id: Some(id),
                ..Default::default()
            })
            .await?;
        if orders.count > 0 {
            return Err(AppError::Conflict(format!(
                "User has {} order(s); deactivate the account instead",
                orders.count
            )));
        }

        self.users.delete(id).await?;
        tracing::info!(user_id = id, actor = actor_id, "User deleted by admin");
        Ok(())
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats, AppError> {
        let now = self.clock.now();
        let today = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let month_ago = now - chrono::Duration::days(ACTIVE_USER_WINDOW_DAYS);

        let customers = UserFilter {
            role: Some(RoleFilter::User),
            ..Default::default()
        };
        let total_users = self.users.count(&customers).await?;
        let new_users_today = self
            .users
            .count(&UserFilter {
                created_since: Some(today),
                ..customers.clone()
            })
            .await?;
        let active_users = self
            .users
            .count(&UserFilter {
                logged_in_since: Some(month_ago),
                ..customers
            })
            .await?;

        let total_products = self.products.count(&ProductFilter::default()).await?;
        let new_products_today = self
            .products
            .count(&ProductFilter {
                created_since: Some(today),
                ..Default::default()
            })
            .await?;
        let low_stock_products = self
            .products
            .count(&ProductFilter {
                active: Some(true),
                stock_below: Some(DEFAULT_LOW_STOCK_THRESHOLD),
                ..Default::default()
            })
            .await?;

        let all = self.orders.totals(&OrderFilter::default()).await?;
        let today_orders = self
            .orders
            .totals(&OrderFilter {
                from: Some(today),
                ..Default::default()
            })
            .await?;
        let pending = self
            .orders
            .totals(&OrderFilter {
                order_status: Some(OrderStatus::Pending),
                ..Default::default()
            })
            .await?;
        let delivered = self
            .orders
            .totals(&OrderFilter {
                order_status: Some(OrderStatus::Delivered),
                ..Default::default()
            })
            .await?;

        Ok(DashboardStats {
            total_users,
            total_products,
            total_orders: all.count,
            new_users_today,
            new_products_today,
            active_users,
            low_stock_products,
            pending_orders: pending.count,
            delivered_orders: delivered.count,
            total_revenue: all.revenue,
            today_revenue: today_orders.revenue,
            average_order_value: average(all.revenue, all.count),
        })
    }
}

fn generate_password() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Rounded to cents; zero when there is nothing to average.
fn average(total: Decimal, count: i64) -> Decimal {
    if count == 0 {
        return Decimal::ZERO;
    }
    (total / Decimal::from(count)).round_dp(2)
}
