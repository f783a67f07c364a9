//! # Data Repository Layer
//!
//! This module provides repository traits and PostgreSQL implementations
//! for the inventory entities: products, variants, sub-variants, and
//! stock transactions. Mutating operations take an explicit transaction
//! so the service layer can scope each logical operation atomically.

use async_trait::async_trait;
use model::{Product, ProductSummary, StockTransaction, SubVariant, Variant, VariantTreeRow};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Transaction};
use uuid::Uuid;

/// # RepositoryError
///
/// Error types that can occur during repository operations.
///
/// This enum represents the various error conditions that might arise
/// when interacting with the data storage layer.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database-related errors, wrapping the underlying PostgreSQL error
    #[error("Database error: {0}")]
    Db(#[from] tokio_postgres::Error),
    /// No result found.
    #[error("Not found")]
    NotFound,
    /// A unique constraint was violated (e.g. duplicate product code).
    #[error("Duplicate key")]
    DuplicateKey,
}

/// Maps a unique-violation SQLSTATE to [`RepositoryError::DuplicateKey`],
/// so the store's constraint stays the source of truth for uniqueness.
fn map_write_err(e: tokio_postgres::Error) -> RepositoryError {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        RepositoryError::DuplicateKey
    } else {
        RepositoryError::Db(e)
    }
}

/// # ProductsRepository
///
/// Repository interface for the product aggregate: the product row, its
/// variants, and their sub-variants. Writes are transactional; paginated
/// reads run on the repository's own connection.
///
/// Implementations of this trait provide specific storage mechanisms,
/// such as PostgreSQL database access.
#[async_trait]
pub trait ProductsRepository: Send + Sync {
    /// Check whether a product with the given code already exists.
    async fn code_exists_tx(
        &self,
        tx: &Transaction<'_>,
        product_code: &str,
    ) -> Result<bool, RepositoryError>;

    /// Insert the product row in a transaction.
    async fn insert_product_tx(
        &self,
        tx: &Transaction<'_>,
        product: &Product,
    ) -> Result<(), RepositoryError>;

    /// Insert a variant row in a transaction.
    async fn insert_variant_tx(
        &self,
        tx: &Transaction<'_>,
        variant: &Variant,
    ) -> Result<(), RepositoryError>;

    /// Insert a sub-variant row in a transaction.
    async fn insert_sub_variant_tx(
        &self,
        tx: &Transaction<'_>,
        sub_variant: &SubVariant,
    ) -> Result<(), RepositoryError>;

    /// Count products, optionally filtered by the active flag.
    async fn count_products(&self, active: Option<bool>) -> Result<i64, RepositoryError>;

    /// One page of products ordered by creation time descending,
    /// without their variant trees.
    async fn list_products(
        &self,
        offset: i64,
        limit: i64,
        active: Option<bool>,
    ) -> Result<Vec<ProductSummary>, RepositoryError>;

    /// Flattened variant/sub-variant join rows for the given products,
    /// ordered by product and variant identity.
    async fn variant_tree_for(
        &self,
        product_ids: &[Uuid],
    ) -> Result<Vec<VariantTreeRow>, RepositoryError>;
}

/// PostgreSQL implementation of the ProductsRepository trait.
pub struct PgProductsRepository {
    /// PostgreSQL client for database operations
    db: Client,
}

impl PgProductsRepository {
    pub fn new(db: Client) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProductsRepository for PgProductsRepository {
    async fn code_exists_tx(
        &self,
        tx: &Transaction<'_>,
        product_code: &str,
    ) -> Result<bool, RepositoryError> {
        let query = "SELECT 1 FROM products WHERE product_code = $1";
        let row = tx.query_opt(query, &[&product_code]).await?;
        Ok(row.is_some())
    }

    async fn insert_product_tx(
        &self,
        tx: &Transaction<'_>,
        product: &Product,
    ) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO products (
                id, product_code, product_name, hsn_code, created_user,
                is_favourite, active, total_stock, created_date, updated_date
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
        "#;
        tx.execute(query, &[
            &product.id,
            &product.product_code,
            &product.product_name,
            &product.hsn_code,
            &product.created_user,
            &product.is_favourite,
            &product.active,
            &product.total_stock,
            &product.created_date,
            &product.updated_date,
        ])
        .await
        .map_err(map_write_err)?;
        Ok(())
    }

    async fn insert_variant_tx(
        &self,
        tx: &Transaction<'_>,
        variant: &Variant,
    ) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO variants (id, product_id, name, created_date)
            VALUES ($1, $2, $3, $4)
        "#;
        tx.execute(query, &[
            &variant.id,
            &variant.product_id,
            &variant.name,
            &variant.created_date,
        ])
        .await?;
        Ok(())
    }

    async fn insert_sub_variant_tx(
        &self,
        tx: &Transaction<'_>,
        sub_variant: &SubVariant,
    ) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO sub_variants (id, variant_id, product_id, option_value, stock, sku, created_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#;
        tx.execute(query, &[
            &sub_variant.id,
            &sub_variant.variant_id,
            &sub_variant.product_id,
            &sub_variant.option_value,
            &sub_variant.stock,
            &sub_variant.sku,
            &sub_variant.created_date,
        ])
        .await?;
        Ok(())
    }

    async fn count_products(&self, active: Option<bool>) -> Result<i64, RepositoryError> {
        let row = match active {
            Some(flag) => {
                self.db
                    .query_one("SELECT COUNT(*) FROM products WHERE active = $1", &[&flag])
                    .await?
            }
            None => {
                self.db
                    .query_one("SELECT COUNT(*) FROM products", &[])
                    .await?
            }
        };
        Ok(row.get(0))
    }

    async fn list_products(
        &self,
        offset: i64,
        limit: i64,
        active: Option<bool>,
    ) -> Result<Vec<ProductSummary>, RepositoryError> {
        let rows = match active {
            Some(flag) => {
                let query = r#"
                    SELECT id, product_code, product_name, is_favourite, active,
                           hsn_code, total_stock, created_date
                    FROM products
                    WHERE active = $1
                    ORDER BY created_date DESC
                    OFFSET $2 LIMIT $3
                "#;
                self.db.query(query, &[&flag, &offset, &limit]).await?
            }
            None => {
                let query = r#"
                    SELECT id, product_code, product_name, is_favourite, active,
                           hsn_code, total_stock, created_date
                    FROM products
                    ORDER BY created_date DESC
                    OFFSET $1 LIMIT $2
                "#;
                self.db.query(query, &[&offset, &limit]).await?
            }
        };

        let mut products = Vec::new();
        for row in rows {
            products.push(ProductSummary {
                id: row.get("id"),
                product_code: row.get("product_code"),
                product_name: row.get("product_name"),
                is_favourite: row.get("is_favourite"),
                active: row.get("active"),
                hsn_code: row.get("hsn_code"),
                total_stock: row.get("total_stock"),
                created_date: row.get("created_date"),
                variants: Vec::new(), // filled in by the service
            });
        }
        Ok(products)
    }

    async fn variant_tree_for(
        &self,
        product_ids: &[Uuid],
    ) -> Result<Vec<VariantTreeRow>, RepositoryError> {
        let query = r#"
            SELECT v.id AS variant_id, v.product_id, v.name,
                   sv.id AS sub_variant_id, sv.option_value, sv.stock, sv.sku
            FROM variants v
            INNER JOIN sub_variants sv ON sv.variant_id = v.id
            WHERE v.product_id = ANY($1)
            ORDER BY v.product_id, v.id
        "#;
        let rows = self.db.query(query, &[&product_ids]).await?;
        let mut tree_rows = Vec::new();
        for row in rows {
            tree_rows.push(VariantTreeRow {
                variant_id: row.get("variant_id"),
                product_id: row.get("product_id"),
                variant_name: row.get("name"),
                sub_variant_id: row.get("sub_variant_id"),
                option_value: row.get("option_value"),
                stock: row.get("stock"),
                sku: row.get("sku"),
            });
        }
        Ok(tree_rows)
    }
}

/// # StockRepository
///
/// Repository interface for stock mutations: point reads and conditional
/// writes of a sub-variant's stock, recomputation of the product total,
/// and the append-only transaction log.
///
/// All methods are transactional — the service wraps one stock mutation
/// in a single transaction covering check, delta, recompute, and log.
#[async_trait]
pub trait StockRepository: Send + Sync {
    /// Check that the sub-variant exists under the given product.
    async fn sub_variant_exists_tx(
        &self,
        tx: &Transaction<'_>,
        sub_variant_id: Uuid,
        product_id: Uuid,
    ) -> Result<bool, RepositoryError>;

    /// Current stock quantity of the sub-variant.
    async fn sub_variant_stock_tx(
        &self,
        tx: &Transaction<'_>,
        sub_variant_id: Uuid,
    ) -> Result<Decimal, RepositoryError>;

    /// Apply a stock delta as one conditional update; the row is only
    /// touched when the resulting stock stays non-negative. Returns the
    /// number of affected rows (0 means the guard rejected the delta).
    async fn adjust_stock_tx(
        &self,
        tx: &Transaction<'_>,
        sub_variant_id: Uuid,
        delta: Decimal,
    ) -> Result<u64, RepositoryError>;

    /// Recompute the product's denormalized total from its sub-variants
    /// and bump the product's updated timestamp.
    async fn recompute_total_stock_tx(
        &self,
        tx: &Transaction<'_>,
        product_id: Uuid,
    ) -> Result<(), RepositoryError>;

    /// Append one immutable stock movement record.
    async fn insert_transaction_tx(
        &self,
        tx: &Transaction<'_>,
        record: &StockTransaction,
    ) -> Result<(), RepositoryError>;
}

/// PostgreSQL implementation of the StockRepository trait.
///
/// Stateless: every operation runs on the transaction handed in by the
/// service, so no dedicated connection is held here.
pub struct PgStockRepository;

impl PgStockRepository {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PgStockRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StockRepository for PgStockRepository {
    async fn sub_variant_exists_tx(
        &self,
        tx: &Transaction<'_>,
        sub_variant_id: Uuid,
        product_id: Uuid,
    ) -> Result<bool, RepositoryError> {
        let query = "SELECT 1 FROM sub_variants WHERE id = $1 AND product_id = $2";
        let row = tx.query_opt(query, &[&sub_variant_id, &product_id]).await?;
        Ok(row.is_some())
    }

    async fn sub_variant_stock_tx(
        &self,
        tx: &Transaction<'_>,
        sub_variant_id: Uuid,
    ) -> Result<Decimal, RepositoryError> {
        let query = "SELECT stock FROM sub_variants WHERE id = $1";
        let row = tx.query_opt(query, &[&sub_variant_id]).await?;
        match row {
            Some(row) => Ok(row.get("stock")),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn adjust_stock_tx(
        &self,
        tx: &Transaction<'_>,
        sub_variant_id: Uuid,
        delta: Decimal,
    ) -> Result<u64, RepositoryError> {
        // The guard keeps stock non-negative even under concurrent
        // mutations of the same row.
        let query = r#"
            UPDATE sub_variants
            SET stock = stock + $2
            WHERE id = $1 AND stock + $2 >= 0
        "#;
        let affected = tx.execute(query, &[&sub_variant_id, &delta]).await?;
        Ok(affected)
    }

    async fn recompute_total_stock_tx(
        &self,
        tx: &Transaction<'_>,
        product_id: Uuid,
    ) -> Result<(), RepositoryError> {
        let query = r#"
            UPDATE products
            SET total_stock = (SELECT COALESCE(SUM(stock), 0) FROM sub_variants WHERE product_id = $1),
                updated_date = NOW()
            WHERE id = $1
        "#;
        tx.execute(query, &[&product_id]).await?;
        Ok(())
    }

    async fn insert_transaction_tx(
        &self,
        tx: &Transaction<'_>,
        record: &StockTransaction,
    ) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO stock_transactions (
                id, product_id, sub_variant_id, transaction_type,
                quantity, transaction_date, notes
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#;
        tx.execute(query, &[
            &record.id,
            &record.product_id,
            &record.sub_variant_id,
            &record.transaction_type.as_str(),
            &record.quantity,
            &record.transaction_date,
            &record.notes,
        ])
        .await?;
        Ok(())
    }
}
