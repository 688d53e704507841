//! Postgres store realizations.
//!
//! Expected schema (provisioned externally, enum types matching the
//! `sqlx(type_name)` derives in the model modules):
//!
//! ```sql
//! orders(id uuid pk, order_number text, buyer_id uuid, farmer_id uuid,
//!        total_amount bigint, status order_status,
//!        payment_status payment_status, payment_method payment_method,
//!        ship_street text, ship_city text, ship_state text, ship_zip text,
//!        ship_country text, delivery_date timestamptz null,
//!        blockchain_tx_id text null, blockchain_hash text null,
//!        blockchain_status settlement_status, version bigint,
//!        created_at timestamptz, updated_at timestamptz)
//! order_items(order_id uuid fk, item_position int, product_id uuid,
//!             product_name text, quantity int, unit_price bigint,
//!             total_price bigint)
//! blockchain_transactions(id uuid pk, order_id uuid fk, tx_id text unique,
//!                         hash text, status transaction_status,
//!                         block_number bigint null, gas_used bigint null,
//!                         created_at timestamptz, updated_at timestamptz)
//! notifications(id uuid pk, user_id uuid, notification_type
//!               notification_type, title text, message text,
//!               is_read boolean, priority notification_priority null,
//!               action_url text null, created_at timestamptz)
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::models::page_window;
use crate::notifications::{ListNotificationsQuery, Notification};
use crate::orders::{
    ListOrdersQuery, Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus,
    SettlementStatus, ShippingAddress,
};
use crate::settlement::{BlockchainTransaction, TransactionStatus};

use super::{NotificationStore, OrderStore, TransactionStore};

/// Flat row shape for the `orders` table; items are loaded separately.
#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    buyer_id: Uuid,
    farmer_id: Uuid,
    total_amount: i64,
    status: OrderStatus,
    payment_status: PaymentStatus,
    payment_method: PaymentMethod,
    ship_street: String,
    ship_city: String,
    ship_state: String,
    ship_zip: String,
    ship_country: String,
    delivery_date: Option<DateTime<Utc>>,
    blockchain_tx_id: Option<String>,
    blockchain_hash: Option<String>,
    blockchain_status: SettlementStatus,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Order {
        Order {
            id: self.id,
            order_number: self.order_number,
            buyer_id: self.buyer_id,
            farmer_id: self.farmer_id,
            items,
            total_amount: self.total_amount,
            status: self.status,
            payment_status: self.payment_status,
            payment_method: self.payment_method,
            shipping_address: ShippingAddress {
                street: self.ship_street,
                city: self.ship_city,
                state: self.ship_state,
                zip: self.ship_zip,
                country: self.ship_country,
            },
            delivery_date: self.delivery_date,
            blockchain_tx_id: self.blockchain_tx_id,
            blockchain_hash: self.blockchain_hash,
            blockchain_status: self.blockchain_status,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    order_id: Uuid,
    product_id: Uuid,
    product_name: String,
    quantity: i32,
    unit_price: i64,
    total_price: i64,
}

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_items(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItem>>> {
        let rows = sqlx::query_as::<_, OrderItemRow>(
            r#"
            SELECT order_id, product_id, product_name, quantity, unit_price, total_price
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, item_position
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            grouped.entry(row.order_id).or_default().push(OrderItem {
                product_id: row.product_id,
                product_name: row.product_name,
                quantity: row.quantity,
                unit_price: row.unit_price,
                total_price: row.total_price,
            });
        }
        Ok(grouped)
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn get(&self, id: Uuid) -> Result<Order> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::NotFound("order"))?;

        let mut items = self.load_items(&[id]).await?;
        Ok(row.into_order(items.remove(&id).unwrap_or_default()))
    }

    async fn insert(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, buyer_id, farmer_id, total_amount, status,
                payment_status, payment_method, ship_street, ship_city,
                ship_state, ship_zip, ship_country, delivery_date,
                blockchain_tx_id, blockchain_hash, blockchain_status, version,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.buyer_id)
        .bind(order.farmer_id)
        .bind(order.total_amount)
        .bind(order.status)
        .bind(order.payment_status)
        .bind(order.payment_method)
        .bind(&order.shipping_address.street)
        .bind(&order.shipping_address.city)
        .bind(&order.shipping_address.state)
        .bind(&order.shipping_address.zip)
        .bind(&order.shipping_address.country)
        .bind(order.delivery_date)
        .bind(&order.blockchain_tx_id)
        .bind(&order.blockchain_hash)
        .bind(order.blockchain_status)
        .bind(order.version)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if err
                .as_database_error()
                .map(|db| db.is_unique_violation())
                .unwrap_or(false)
            {
                return Err(Error::Conflict(format!("order {} already exists", order.id)));
            }
            return Err(err.into());
        }

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    order_id, item_position, product_id, product_name, quantity,
                    unit_price, total_price
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(order.id)
            .bind(position as i32)
            .bind(item.product_id)
            .bind(&item.product_name)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.total_price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save(&self, order: &Order) -> Result<Order> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1, payment_status = $2, total_amount = $3,
                delivery_date = $4, blockchain_tx_id = $5, blockchain_hash = $6,
                blockchain_status = $7, updated_at = $8, version = version + 1
            WHERE id = $9 AND version = $10
            "#,
        )
        .bind(order.status)
        .bind(order.payment_status)
        .bind(order.total_amount)
        .bind(order.delivery_date)
        .bind(&order.blockchain_tx_id)
        .bind(&order.blockchain_hash)
        .bind(order.blockchain_status)
        .bind(order.updated_at)
        .bind(order.id)
        .bind(order.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM orders WHERE id = $1)",
            )
            .bind(order.id)
            .fetch_one(&self.pool)
            .await?;

            return if exists {
                Err(Error::Conflict(format!(
                    "order {} was modified concurrently",
                    order.id
                )))
            } else {
                Err(Error::NotFound("order"))
            };
        }

        let mut saved = order.clone();
        saved.version += 1;
        Ok(saved)
    }

    async fn list(&self, query: &ListOrdersQuery) -> Result<Vec<Order>> {
        let (limit, offset) = page_window(query.page, query.limit);

        let mut builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("SELECT * FROM orders WHERE 1=1");

        if let Some(buyer_id) = query.buyer_id {
            builder.push(" AND buyer_id = ");
            builder.push_bind(buyer_id);
        }
        if let Some(farmer_id) = query.farmer_id {
            builder.push(" AND farmer_id = ");
            builder.push_bind(farmer_id);
        }
        if let Some(status) = query.status {
            builder.push(" AND status = ");
            builder.push_bind(status);
        }

        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        let rows = builder
            .build_query_as::<OrderRow>()
            .fetch_all(&self.pool)
            .await?;

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let mut items = self.load_items(&ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let order_items = items.remove(&row.id).unwrap_or_default();
                row.into_order(order_items)
            })
            .collect())
    }
}

pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn get_by_tx_id(&self, tx_id: &str) -> Result<BlockchainTransaction> {
        sqlx::query_as::<_, BlockchainTransaction>(
            "SELECT * FROM blockchain_transactions WHERE tx_id = $1",
        )
        .bind(tx_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::NotFound("settlement transaction"))
    }

    async fn active_for_order(&self, order_id: Uuid) -> Result<Option<BlockchainTransaction>> {
        Ok(sqlx::query_as::<_, BlockchainTransaction>(
            r#"
            SELECT * FROM blockchain_transactions
            WHERE order_id = $1 AND status <> $2
            LIMIT 1
            "#,
        )
        .bind(order_id)
        .bind(TransactionStatus::Failed)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn insert(&self, transaction: &BlockchainTransaction) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO blockchain_transactions (
                id, order_id, tx_id, hash, status, block_number, gas_used,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.order_id)
        .bind(&transaction.tx_id)
        .bind(&transaction.hash)
        .bind(transaction.status)
        .bind(transaction.block_number)
        .bind(transaction.gas_used)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_database_error()
                    .map(|db| db.is_unique_violation())
                    .unwrap_or(false) =>
            {
                Err(Error::Conflict(format!(
                    "transaction {} already recorded",
                    transaction.tx_id
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn mark_confirmed_if_pending(
        &self,
        tx_id: &str,
        block_number: Option<i64>,
        gas_used: Option<i64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE blockchain_transactions
            SET status = $1, block_number = $2, gas_used = $3, updated_at = $4
            WHERE tx_id = $5 AND status = $6
            "#,
        )
        .bind(TransactionStatus::Confirmed)
        .bind(block_number)
        .bind(gas_used)
        .bind(Utc::now())
        .bind(tx_id)
        .bind(TransactionStatus::Pending)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed_if_pending(&self, tx_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE blockchain_transactions
            SET status = $1, updated_at = $2
            WHERE tx_id = $3 AND status = $4
            "#,
        )
        .bind(TransactionStatus::Failed)
        .bind(Utc::now())
        .bind(tx_id)
        .bind(TransactionStatus::Pending)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<BlockchainTransaction>> {
        Ok(sqlx::query_as::<_, BlockchainTransaction>(
            r#"
            SELECT * FROM blockchain_transactions
            WHERE status = $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(TransactionStatus::Pending)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }
}

pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn create(&self, notification: &Notification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, user_id, notification_type, title, message, is_read,
                priority, action_url, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(notification.notification_type)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.is_read)
        .bind(notification.priority)
        .bind(&notification.action_url)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        query: &ListNotificationsQuery,
    ) -> Result<Vec<Notification>> {
        let (limit, offset) = page_window(query.page, query.limit);

        let mut builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("SELECT * FROM notifications WHERE user_id = ");
        builder.push_bind(user_id);

        if query.unread_only.unwrap_or(false) {
            builder.push(" AND is_read = FALSE");
        }

        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        Ok(builder
            .build_query_as::<Notification>()
            .fetch_all(&self.pool)
            .await?)
    }

    async fn mark_read(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE notifications SET is_read = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound("notification"));
        }
        Ok(())
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE user_id = $1 AND is_read = FALSE",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_unread(&self, user_id: Uuid) -> Result<i64> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = FALSE",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?)
    }
}
