use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, Money, OrderId, OrderStatus, PaymentMethod, ProductId, UserId, Version};
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    records::{
        CartLineRecord, CartRecord, DiscountRecord, InventoryRecord, NewDiscount, NewOrder,
        NewProduct, OrderLineRecord, OrderRecord, ProductRecord,
    },
    store::{CartRows, CatalogWrites, InventoryRows, OrderRows, ProductCatalog, Store, Transaction},
};

const ORDER_COLUMNS: &str = "id, user_id, total_amount_cents, status, payment_method, payment_reference, created_at, updated_at";
const CART_LINE_COLUMNS: &str =
    "cart_id, product_id, quantity, unit_price_cents, product_title, product_image, added_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        let tx = self.pool.begin().await?;
        Ok(PostgresTransaction { tx })
    }
}

/// A transaction on a pooled PostgreSQL connection.
///
/// Runs at the server's default isolation (READ COMMITTED). Inventory rows
/// are locked with `SELECT ... FOR UPDATE` and written with a version check.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

fn map_write_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && let Some(constraint) = db_err.constraint()
    {
        tracing::debug!(constraint, "write rejected by constraint");
        return StoreError::Constraint(format!("{constraint}: {}", db_err.message()));
    }
    // numeric_value_out_of_range
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.code().as_deref() == Some("22003")
    {
        return StoreError::Constraint(db_err.message().to_string());
    }
    StoreError::Database(e)
}

fn quantity_param(quantity: u32) -> Result<i32> {
    i32::try_from(quantity)
        .map_err(|_| StoreError::Constraint(format!("quantity {quantity} is out of range")))
}

fn decode_error(
    column: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}

fn row_quantity(row: &PgRow) -> Result<u32> {
    let raw: i32 = row.try_get("quantity")?;
    Ok(u32::try_from(raw).map_err(|e| decode_error("quantity", e))?)
}

fn row_to_product(row: PgRow) -> Result<ProductRecord> {
    Ok(ProductRecord {
        id: ProductId::new(row.try_get("id")?),
        title: row.try_get("title")?,
        image_url: row.try_get("image_url")?,
        base_price: Money::from_cents(row.try_get("base_price_cents")?),
        stock_quantity: row.try_get("stock_quantity")?,
        version: Version::new(row.try_get("version")?),
    })
}

fn row_to_discount(row: PgRow) -> Result<DiscountRecord> {
    Ok(DiscountRecord {
        id: row.try_get("id")?,
        product_id: ProductId::new(row.try_get("product_id")?),
        percent: row.try_get("percent")?,
        starts_at: row.try_get("starts_at")?,
        ends_at: row.try_get("ends_at")?,
    })
}

fn row_to_cart(row: PgRow) -> Result<CartRecord> {
    Ok(CartRecord {
        id: CartId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::new(row.try_get("user_id")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_cart_line(row: PgRow) -> Result<CartLineRecord> {
    Ok(CartLineRecord {
        cart_id: CartId::from_uuid(row.try_get::<Uuid, _>("cart_id")?),
        product_id: ProductId::new(row.try_get("product_id")?),
        quantity: row_quantity(&row)?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        product_title: row.try_get("product_title")?,
        product_image: row.try_get("product_image")?,
        added_at: row.try_get("added_at")?,
    })
}

fn row_to_order(row: PgRow) -> Result<OrderRecord> {
    let status: String = row.try_get("status")?;
    let payment_method: String = row.try_get("payment_method")?;

    Ok(OrderRecord {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::new(row.try_get("user_id")?),
        total_amount: Money::from_cents(row.try_get("total_amount_cents")?),
        status: status
            .parse::<OrderStatus>()
            .map_err(|e| decode_error("status", e))?,
        payment_method: payment_method
            .parse::<PaymentMethod>()
            .map_err(|e| decode_error("payment_method", e))?,
        payment_reference: row.try_get("payment_reference")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_order_line(row: PgRow) -> Result<OrderLineRecord> {
    Ok(OrderLineRecord {
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        product_id: ProductId::new(row.try_get("product_id")?),
        quantity: row_quantity(&row)?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
    })
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(map_write_error)
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl ProductCatalog for PostgresTransaction {
    async fn get_product(&mut self, product_id: ProductId) -> Result<Option<ProductRecord>> {
        let row = sqlx::query(
            r#"
            SELECT p.id, p.title, p.image_url, p.base_price_cents, i.stock_quantity, i.version
            FROM products p
            JOIN inventory i ON i.product_id = p.id
            WHERE p.id = $1
            "#,
        )
        .bind(product_id.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_product).transpose()
    }

    async fn active_discounts(
        &mut self,
        product_id: ProductId,
        now: DateTime<Utc>,
    ) -> Result<Vec<DiscountRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, percent, starts_at, ends_at
            FROM product_discounts
            WHERE product_id = $1 AND starts_at <= $2 AND ends_at >= $2
            ORDER BY id ASC
            "#,
        )
        .bind(product_id.as_i64())
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(row_to_discount).collect()
    }
}

#[async_trait]
impl CatalogWrites for PostgresTransaction {
    async fn insert_product(&mut self, product: NewProduct) -> Result<ProductRecord> {
        let product_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO products (title, image_url, base_price_cents)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(&product.title)
        .bind(&product.image_url)
        .bind(product.base_price.cents())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_write_error)?;

        sqlx::query(
            r#"
            INSERT INTO inventory (product_id, stock_quantity, version)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(product_id)
        .bind(product.initial_stock)
        .bind(Version::initial().as_i64())
        .execute(&mut *self.tx)
        .await
        .map_err(map_write_error)?;

        Ok(ProductRecord {
            id: ProductId::new(product_id),
            title: product.title,
            image_url: product.image_url,
            base_price: product.base_price,
            stock_quantity: product.initial_stock,
            version: Version::initial(),
        })
    }

    async fn insert_discount(&mut self, discount: NewDiscount) -> Result<DiscountRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO product_discounts (product_id, percent, starts_at, ends_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, product_id, percent, starts_at, ends_at
            "#,
        )
        .bind(discount.product_id.as_i64())
        .bind(discount.percent)
        .bind(discount.starts_at)
        .bind(discount.ends_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_write_error)?;

        row_to_discount(row)
    }
}

#[async_trait]
impl InventoryRows for PostgresTransaction {
    async fn lock_inventory(&mut self, product_id: ProductId) -> Result<Option<InventoryRecord>> {
        let row = sqlx::query(
            r#"
            SELECT product_id, stock_quantity, version
            FROM inventory
            WHERE product_id = $1
            FOR UPDATE
            "#,
        )
        .bind(product_id.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(|row| -> Result<InventoryRecord> {
            Ok(InventoryRecord {
                product_id: ProductId::new(row.try_get("product_id")?),
                stock_quantity: row.try_get("stock_quantity")?,
                version: Version::new(row.try_get("version")?),
            })
        })
        .transpose()
    }

    async fn write_inventory(
        &mut self,
        product_id: ProductId,
        new_stock: i64,
        expected_version: Version,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE inventory
            SET stock_quantity = $2, version = version + 1
            WHERE product_id = $1 AND version = $3
            "#,
        )
        .bind(product_id.as_i64())
        .bind(new_stock)
        .bind(expected_version.as_i64())
        .execute(&mut *self.tx)
        .await
        .map_err(map_write_error)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CartRows for PostgresTransaction {
    async fn ensure_cart(&mut self, user_id: UserId) -> Result<CartRecord> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query(
            r#"
            INSERT INTO carts (id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING id, user_id, created_at, updated_at
            "#,
        )
        .bind(CartId::new().as_uuid())
        .bind(user_id.as_i64())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_write_error)?;

        row_to_cart(row)
    }

    async fn find_cart(&mut self, user_id: UserId) -> Result<Option<CartRecord>> {
        let row = sqlx::query(
            "SELECT id, user_id, created_at, updated_at FROM carts WHERE user_id = $1",
        )
        .bind(user_id.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_cart).transpose()
    }

    async fn lock_cart(&mut self, user_id: UserId) -> Result<Option<CartRecord>> {
        let row = sqlx::query(
            "SELECT id, user_id, created_at, updated_at FROM carts WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_cart).transpose()
    }

    async fn cart_lines(&mut self, cart_id: CartId) -> Result<Vec<CartLineRecord>> {
        let sql = format!(
            "SELECT {CART_LINE_COLUMNS} FROM cart_items WHERE cart_id = $1 ORDER BY product_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(cart_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;

        rows.into_iter().map(row_to_cart_line).collect()
    }

    async fn upsert_cart_line(&mut self, line: CartLineRecord) -> Result<CartLineRecord> {
        let sql = format!(
            r#"
            INSERT INTO cart_items ({CART_LINE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (cart_id, product_id)
            DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
            RETURNING {CART_LINE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(line.cart_id.as_uuid())
            .bind(line.product_id.as_i64())
            .bind(quantity_param(line.quantity)?)
            .bind(line.unit_price.cents())
            .bind(&line.product_title)
            .bind(&line.product_image)
            .bind(line.added_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_write_error)?;

        sqlx::query("UPDATE carts SET updated_at = NOW() WHERE id = $1")
            .bind(line.cart_id.as_uuid())
            .execute(&mut *self.tx)
            .await?;

        row_to_cart_line(row)
    }

    async fn decrement_cart_line(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<Option<CartLineRecord>> {
        let sql = format!(
            r#"
            UPDATE cart_items
            SET quantity = quantity - 1
            WHERE cart_id = $1 AND product_id = $2 AND quantity > 1
            RETURNING {CART_LINE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(cart_id.as_uuid())
            .bind(product_id.as_i64())
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(row_to_cart_line).transpose()
    }

    async fn delete_cart_line(&mut self, cart_id: CartId, product_id: ProductId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1 AND product_id = $2")
            .bind(cart_id.as_uuid())
            .bind(product_id.as_i64())
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_cart_lines(&mut self, cart_id: CartId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id.as_uuid())
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OrderRows for PostgresTransaction {
    async fn insert_order(&mut self, order: NewOrder) -> Result<OrderRecord> {
        let sql = format!(
            r#"
            INSERT INTO orders (id, user_id, total_amount_cents, status, payment_method, payment_reference)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ORDER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(order.id.as_uuid())
            .bind(order.user_id.as_i64())
            .bind(order.total_amount.cents())
            .bind(OrderStatus::Pending.as_str())
            .bind(order.payment_method.as_str())
            .bind(&order.payment_reference)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_write_error)?;

        row_to_order(row)
    }

    async fn insert_order_line(&mut self, line: OrderLineRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO order_items (order_id, product_id, quantity, unit_price_cents)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(line.order_id.as_uuid())
        .bind(line.product_id.as_i64())
        .bind(quantity_param(line.quantity)?)
        .bind(line.unit_price.cents())
        .execute(&mut *self.tx)
        .await
        .map_err(map_write_error)?;

        Ok(())
    }

    async fn get_order(&mut self, order_id: OrderId) -> Result<Option<OrderRecord>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(row_to_order).transpose()
    }

    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<OrderRecord>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(row_to_order).transpose()
    }

    async fn orders_for_user(&mut self, user_id: UserId) -> Result<Vec<OrderRecord>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_i64())
            .fetch_all(&mut *self.tx)
            .await?;

        rows.into_iter().map(row_to_order).collect()
    }

    async fn order_lines(&mut self, order_id: OrderId) -> Result<Vec<OrderLineRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, quantity, unit_price_cents
            FROM order_items
            WHERE order_id = $1
            ORDER BY product_id ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(row_to_order_line).collect()
    }

    async fn update_order_status(
        &mut self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Option<OrderRecord>> {
        let sql = format!(
            "UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {ORDER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .bind(status.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_write_error)?;

        row.map(row_to_order).transpose()
    }
}
