//! Business logic layer for product and stock management.
//!
//! This module defines the [`ProductService`] and [`StockService`] traits and their
//! async implementations [`ProductServiceImpl`] and [`StockServiceImpl`].
//! The services coordinate multi-table persistence and stock mutation, providing
//! transactional guarantees, business validation, and repository abstraction.
//!
//! # Features
//! - Atomic creation of a product aggregate (product, variants, sub-variants)
//!   in a single transaction.
//! - Atomic stock mutation: existence check, conditional delta, total recompute,
//!   and transaction log in one unit, so stock never goes negative and the
//!   denormalized product total never drifts from its sub-variants.
//! - Validation of input data before persistence, with field-level errors.
//! - Dependency injection for testability and loose coupling.
//! - Well-typed error handling via [`ServiceError`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Pool, PoolError};
use model::{
    NewProduct, PagedResult, Product, ProductSummary, StockRequest, StockTransaction, SubVariant,
    SubVariantSummary, TransactionType, Variant, VariantSummary, VariantTreeRow, build_sku,
};
use repository::{ProductsRepository, RepositoryError, StockRepository};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

/// Page number used when the requested one is out of range.
pub const DEFAULT_PAGE: i64 = 1;
/// Page size used when the requested one is out of range.
pub const DEFAULT_PAGE_SIZE: i64 = 10;
/// Largest accepted page size.
pub const MAX_PAGE_SIZE: i64 = 100;

const MAX_NAME_LEN: usize = 200;
const MAX_HSN_CODE_LEN: usize = 100;
const MAX_PRODUCT_CODE_LEN: usize = 50;
const MAX_NOTES_LEN: usize = 500;

/// One field-level validation failure, surfaced in the API error payload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// The main error type for all operations in the service layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The input is structurally or semantically invalid.
    #[error("Validation failed")]
    Invalid(Vec<FieldError>),
    /// The supplied product code is already taken.
    #[error("Product code '{0}' already exists.")]
    DuplicateCode(String),
    /// The referenced sub-variant does not exist under the given product.
    #[error("SubVariant not found for this product.")]
    SubVariantNotFound,
    /// A removal asked for more stock than the sub-variant holds.
    #[error("Insufficient stock. Available: {available}, Requested: {requested}")]
    InsufficientStock {
        available: Decimal,
        requested: Decimal,
    },
    /// A repository (database) operation failed.
    #[error("Database error: {0}")]
    Db(#[from] RepositoryError),
    /// Failed to obtain a database connection from the pool.
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
    /// Some unexpected or unhandled error.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Validates a product-creation input.
///
/// Collects every failing field instead of stopping at the first, so the
/// caller can surface them all at once.
pub fn validate_new_product(input: &NewProduct) -> Result<(), ServiceError> {
    let mut errors = Vec::new();

    if input.name.trim().is_empty() {
        errors.push(FieldError::new("name", "Product name is required."));
    } else if input.name.chars().count() > MAX_NAME_LEN {
        errors.push(FieldError::new(
            "name",
            format!("Product name must be at most {MAX_NAME_LEN} characters."),
        ));
    }

    if input.hsn_code.trim().is_empty() {
        errors.push(FieldError::new("hsnCode", "HSN Code is required."));
    } else if input.hsn_code.chars().count() > MAX_HSN_CODE_LEN {
        errors.push(FieldError::new(
            "hsnCode",
            format!("HSN Code must be at most {MAX_HSN_CODE_LEN} characters."),
        ));
    }

    if input.product_code.trim().is_empty() {
        errors.push(FieldError::new("productCode", "ProductCode is required."));
    } else if input.product_code.chars().count() > MAX_PRODUCT_CODE_LEN {
        errors.push(FieldError::new(
            "productCode",
            format!("ProductCode must be at most {MAX_PRODUCT_CODE_LEN} characters."),
        ));
    }

    if input.variants.is_empty() {
        errors.push(FieldError::new(
            "variants",
            "At least one variant is required.",
        ));
    }
    for (i, variant) in input.variants.iter().enumerate() {
        if variant.name.trim().is_empty() {
            errors.push(FieldError::new(
                format!("variants[{i}].name"),
                "Variant name is required.",
            ));
        }
        if variant.options.is_empty() {
            errors.push(FieldError::new(
                format!("variants[{i}].options"),
                "Variant options are required.",
            ));
        }
        for (j, option) in variant.options.iter().enumerate() {
            if option.trim().is_empty() {
                errors.push(FieldError::new(
                    format!("variants[{i}].options[{j}]"),
                    "Option value must not be empty.",
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::Invalid(errors))
    }
}

/// Validates a stock mutation request: positive quantity, bounded notes.
pub fn validate_stock_request(req: &StockRequest) -> Result<(), ServiceError> {
    let mut errors = Vec::new();

    if req.quantity <= Decimal::ZERO {
        errors.push(FieldError::new(
            "quantity",
            "Quantity must be greater than 0.",
        ));
    }
    if let Some(notes) = &req.notes {
        if notes.chars().count() > MAX_NOTES_LEN {
            errors.push(FieldError::new(
                "notes",
                format!("Notes must be at most {MAX_NOTES_LEN} characters."),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::Invalid(errors))
    }
}

/// Clamps paging parameters: `page < 1` falls back to 1, `page_size`
/// outside `[1, 100]` falls back to 10. Out-of-range values are never
/// rejected, only replaced.
pub fn clamp_paging(page: i64, page_size: i64) -> (i64, i64) {
    let page = if page < 1 { DEFAULT_PAGE } else { page };
    let page_size = if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        DEFAULT_PAGE_SIZE
    } else {
        page_size
    };
    (page, page_size)
}

/// Groups flattened join rows into per-product variant trees, preserving
/// the row order of variants and attaching sub-variants by variant id.
pub fn group_variant_tree(rows: Vec<VariantTreeRow>) -> HashMap<Uuid, Vec<VariantSummary>> {
    let mut by_product: HashMap<Uuid, Vec<VariantSummary>> = HashMap::new();
    let mut variant_slot: HashMap<Uuid, usize> = HashMap::new();

    for row in rows {
        let VariantTreeRow {
            variant_id,
            product_id,
            variant_name,
            sub_variant_id,
            option_value,
            stock,
            sku,
        } = row;

        let variants = by_product.entry(product_id).or_default();
        let slot = match variant_slot.get(&variant_id) {
            Some(&slot) => slot,
            None => {
                variants.push(VariantSummary {
                    id: variant_id,
                    name: variant_name,
                    sub_variants: Vec::new(),
                });
                let slot = variants.len() - 1;
                variant_slot.insert(variant_id, slot);
                slot
            }
        };
        variants[slot].sub_variants.push(SubVariantSummary {
            id: sub_variant_id,
            option_value,
            stock,
            sku,
        });
    }

    by_product
}

/// Trait describing business operations for product management.
#[async_trait]
pub trait ProductService: Send + Sync {
    /// Atomically persists a new product aggregate: the product row, its
    /// variants, and one sub-variant per option value (zero stock, derived SKU).
    ///
    /// # Errors
    /// Returns [`ServiceError::Invalid`] if validation fails,
    /// [`ServiceError::DuplicateCode`] if the product code is taken,
    /// [`ServiceError::Db`] for DB-level errors, or [`ServiceError::Pool`]
    /// if a connection cannot be obtained.
    async fn create_product(&self, input: &NewProduct) -> Result<Uuid, ServiceError>;

    /// One page of products ordered by creation time descending, each with
    /// its full variant/sub-variant tree. Out-of-range paging parameters
    /// are clamped, not rejected.
    async fn get_products(
        &self,
        page: i64,
        page_size: i64,
        active: Option<bool>,
    ) -> Result<PagedResult<ProductSummary>, ServiceError>;
}

/// Async implementation of [`ProductService`] using repository pattern.
pub struct ProductServiceImpl<R> {
    db_pool: Pool,
    products_repo: R,
}

impl<R> ProductServiceImpl<R>
where
    R: ProductsRepository + Send + Sync,
{
    /// Constructs a new [`ProductServiceImpl`] from the provided dependencies.
    ///
    /// # Arguments
    /// * `db_pool` - The Postgres connection pool to use for transactions.
    /// * `products_repo` - The repository for the product aggregate.
    pub fn new(db_pool: Pool, products_repo: R) -> Self {
        Self {
            db_pool,
            products_repo,
        }
    }
}

#[async_trait]
impl<R> ProductService for ProductServiceImpl<R>
where
    R: ProductsRepository + Send + Sync,
{
    #[instrument(skip(self, input))]
    async fn create_product(&self, input: &NewProduct) -> Result<Uuid, ServiceError> {
        validate_new_product(input)?;

        let mut client = self.db_pool.get().await.map_err(ServiceError::from)?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| ServiceError::Unexpected(format!("Begin transaction failed: {e}")))?;

        if self
            .products_repo
            .code_exists_tx(&tx, &input.product_code)
            .await?
        {
            return Err(ServiceError::DuplicateCode(input.product_code.clone()));
        }

        let now = Utc::now();
        let created_user = match input.created_user {
            Some(user) if !user.is_nil() => user,
            _ => Uuid::new_v4(),
        };
        let product = Product {
            id: Uuid::new_v4(),
            product_code: input.product_code.clone(),
            product_name: input.name.clone(),
            hsn_code: input.hsn_code.clone(),
            created_user,
            is_favourite: input.is_favourite,
            active: true,
            total_stock: Decimal::ZERO,
            created_date: now,
            updated_date: now,
        };

        // The unique constraint on product_code is the source of truth: a
        // concurrent insert that slips past the existence check still fails
        // here and rolls the aggregate back.
        if let Err(e) = self.products_repo.insert_product_tx(&tx, &product).await {
            return Err(match e {
                RepositoryError::DuplicateKey => {
                    ServiceError::DuplicateCode(input.product_code.clone())
                }
                other => ServiceError::Db(other),
            });
        }

        for new_variant in &input.variants {
            let variant = Variant {
                id: Uuid::new_v4(),
                product_id: product.id,
                name: new_variant.name.clone(),
                created_date: now,
            };
            self.products_repo.insert_variant_tx(&tx, &variant).await?;

            for option in &new_variant.options {
                let sub_variant = SubVariant {
                    id: Uuid::new_v4(),
                    variant_id: variant.id,
                    product_id: product.id,
                    option_value: option.clone(),
                    stock: Decimal::ZERO,
                    sku: Some(build_sku(&input.product_code, &new_variant.name, option)),
                    created_date: now,
                };
                self.products_repo
                    .insert_sub_variant_tx(&tx, &sub_variant)
                    .await?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| ServiceError::Unexpected(format!("Commit failed: {e}")))?;

        info!(product_id = %product.id, product_code = %product.product_code, "Product created");
        Ok(product.id)
    }

    #[instrument(skip(self))]
    async fn get_products(
        &self,
        page: i64,
        page_size: i64,
        active: Option<bool>,
    ) -> Result<PagedResult<ProductSummary>, ServiceError> {
        let (page, page_size) = clamp_paging(page, page_size);

        let total_count = self.products_repo.count_products(active).await?;
        let offset = (page - 1) * page_size;
        let mut products = self
            .products_repo
            .list_products(offset, page_size, active)
            .await?;

        if !products.is_empty() {
            let ids: Vec<Uuid> = products.iter().map(|p| p.id).collect();
            let rows = self.products_repo.variant_tree_for(&ids).await?;
            let mut grouped = group_variant_tree(rows);
            for product in &mut products {
                if let Some(variants) = grouped.remove(&product.id) {
                    product.variants = variants;
                }
            }
        }

        Ok(PagedResult::new(products, total_count, page, page_size))
    }
}

/// Trait describing business operations for stock management.
///
/// Implementations apply one bounded quantity change to one sub-variant and
/// keep the product-level total consistent, with an auditable trail.
#[async_trait]
pub trait StockService: Send + Sync {
    /// Adds stock to a sub-variant and records a `PURCHASE` transaction.
    ///
    /// # Errors
    /// Returns [`ServiceError::Invalid`] for a non-positive quantity or
    /// over-long notes, [`ServiceError::SubVariantNotFound`] if the
    /// sub-variant does not exist under the given product.
    async fn add_stock(&self, req: &StockRequest) -> Result<(), ServiceError>;

    /// Removes stock from a sub-variant and records a `SALE` transaction.
    ///
    /// # Errors
    /// In addition to the failures of [`StockService::add_stock`], returns
    /// [`ServiceError::InsufficientStock`] when the sub-variant holds less
    /// than the requested quantity; stock is left unmodified in that case.
    async fn remove_stock(&self, req: &StockRequest) -> Result<(), ServiceError>;
}

/// Async implementation of [`StockService`] using repository pattern.
pub struct StockServiceImpl<R> {
    db_pool: Pool,
    stock_repo: R,
}

impl<R> StockServiceImpl<R>
where
    R: StockRepository + Send + Sync,
{
    pub fn new(db_pool: Pool, stock_repo: R) -> Self {
        Self {
            db_pool,
            stock_repo,
        }
    }

    /// Applies one stock movement inside a single transaction:
    /// existence check, conditional delta, total recompute, audit record.
    async fn apply_movement(
        &self,
        req: &StockRequest,
        transaction_type: TransactionType,
    ) -> Result<(), ServiceError> {
        validate_stock_request(req)?;

        let mut client = self.db_pool.get().await.map_err(ServiceError::from)?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| ServiceError::Unexpected(format!("Begin transaction failed: {e}")))?;

        if !self
            .stock_repo
            .sub_variant_exists_tx(&tx, req.sub_variant_id, req.product_id)
            .await?
        {
            return Err(ServiceError::SubVariantNotFound);
        }

        let delta = match transaction_type {
            TransactionType::Purchase => req.quantity,
            TransactionType::Sale => -req.quantity,
        };
        let affected = self
            .stock_repo
            .adjust_stock_tx(&tx, req.sub_variant_id, delta)
            .await?;
        if affected == 0 {
            // The conditional update refused the delta; report how much is
            // actually available. Dropping the transaction rolls back.
            let available = self
                .stock_repo
                .sub_variant_stock_tx(&tx, req.sub_variant_id)
                .await?;
            return Err(ServiceError::InsufficientStock {
                available,
                requested: req.quantity,
            });
        }

        self.stock_repo
            .recompute_total_stock_tx(&tx, req.product_id)
            .await?;

        self.stock_repo
            .insert_transaction_tx(&tx, &StockTransaction {
                id: Uuid::new_v4(),
                product_id: req.product_id,
                sub_variant_id: req.sub_variant_id,
                transaction_type,
                quantity: req.quantity,
                transaction_date: Utc::now(),
                notes: req.notes.clone(),
            })
            .await?;

        tx.commit()
            .await
            .map_err(|e| ServiceError::Unexpected(format!("Commit failed: {e}")))?;

        info!(
            sub_variant_id = %req.sub_variant_id,
            quantity = %req.quantity,
            kind = transaction_type.as_str(),
            "Stock movement applied"
        );
        Ok(())
    }
}

#[async_trait]
impl<R> StockService for StockServiceImpl<R>
where
    R: StockRepository + Send + Sync,
{
    #[instrument(skip(self, req))]
    async fn add_stock(&self, req: &StockRequest) -> Result<(), ServiceError> {
        self.apply_movement(req, TransactionType::Purchase).await
    }

    #[instrument(skip(self, req))]
    async fn remove_stock(&self, req: &StockRequest) -> Result<(), ServiceError> {
        self.apply_movement(req, TransactionType::Sale).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::NewVariant;

    fn sample_input() -> NewProduct {
        NewProduct {
            name: "Cotton T-Shirt".to_string(),
            hsn_code: "6109".to_string(),
            product_code: "SKU-1".to_string(),
            created_user: None,
            is_favourite: false,
            variants: vec![NewVariant {
                name: "Color".to_string(),
                options: vec!["Red".to_string(), "Blue".to_string()],
            }],
        }
    }

    fn fields(err: ServiceError) -> Vec<String> {
        match err {
            ServiceError::Invalid(errors) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_input_passes() {
        assert!(validate_new_product(&sample_input()).is_ok());
    }

    #[test]
    fn test_missing_required_fields() {
        let mut input = sample_input();
        input.name = "  ".to_string();
        input.hsn_code = String::new();
        input.product_code = String::new();
        let fields = fields(validate_new_product(&input).unwrap_err());
        assert_eq!(fields, vec!["name", "hsnCode", "productCode"]);
    }

    #[test]
    fn test_length_bounds() {
        let mut input = sample_input();
        input.name = "x".repeat(201);
        input.hsn_code = "x".repeat(101);
        input.product_code = "x".repeat(51);
        let fields = fields(validate_new_product(&input).unwrap_err());
        assert_eq!(fields, vec!["name", "hsnCode", "productCode"]);

        // ровно на границе — допустимо
        let mut input = sample_input();
        input.name = "x".repeat(200);
        input.hsn_code = "x".repeat(100);
        input.product_code = "x".repeat(50);
        assert!(validate_new_product(&input).is_ok());
    }

    #[test]
    fn test_variants_must_not_be_empty() {
        let mut input = sample_input();
        input.variants.clear();
        let fields = fields(validate_new_product(&input).unwrap_err());
        assert_eq!(fields, vec!["variants"]);
    }

    #[test]
    fn test_variant_options_validated() {
        let mut input = sample_input();
        input.variants = vec![NewVariant {
            name: String::new(),
            options: vec![],
        }];
        let name_option_fields = fields(validate_new_product(&input).unwrap_err());
        assert_eq!(
            name_option_fields,
            vec!["variants[0].name", "variants[0].options"]
        );

        let mut input = sample_input();
        input.variants[0].options = vec!["Red".to_string(), " ".to_string()];
        let option_fields = fields(validate_new_product(&input).unwrap_err());
        assert_eq!(option_fields, vec!["variants[0].options[1]"]);
    }

    #[test]
    fn test_stock_request_quantity_must_be_positive() {
        let mut req = StockRequest {
            product_id: Uuid::new_v4(),
            sub_variant_id: Uuid::new_v4(),
            quantity: Decimal::ZERO,
            notes: None,
        };
        let fields = fields(validate_stock_request(&req).unwrap_err());
        assert_eq!(fields, vec!["quantity"]);

        req.quantity = Decimal::from(-5);
        assert!(validate_stock_request(&req).is_err());

        req.quantity = Decimal::new(1, 2); // 0.01
        assert!(validate_stock_request(&req).is_ok());
    }

    #[test]
    fn test_stock_request_notes_bounded() {
        let req = StockRequest {
            product_id: Uuid::new_v4(),
            sub_variant_id: Uuid::new_v4(),
            quantity: Decimal::from(1),
            notes: Some("x".repeat(501)),
        };
        let fields = fields(validate_stock_request(&req).unwrap_err());
        assert_eq!(fields, vec!["notes"]);
    }

    #[test]
    fn test_clamp_paging() {
        assert_eq!(clamp_paging(1, 10), (1, 10));
        assert_eq!(clamp_paging(0, 10), (1, 10));
        assert_eq!(clamp_paging(-3, 10), (1, 10));
        assert_eq!(clamp_paging(2, 0), (2, 10));
        assert_eq!(clamp_paging(2, 101), (2, 10));
        assert_eq!(clamp_paging(2, 100), (2, 100));
    }

    #[test]
    fn test_group_variant_tree_preserves_order() {
        let product_a = Uuid::new_v4();
        let product_b = Uuid::new_v4();
        let color = Uuid::new_v4();
        let size = Uuid::new_v4();

        let row = |variant_id, product_id, name: &str, option: &str| VariantTreeRow {
            variant_id,
            product_id,
            variant_name: name.to_string(),
            sub_variant_id: Uuid::new_v4(),
            option_value: option.to_string(),
            stock: Decimal::ZERO,
            sku: None,
        };

        let rows = vec![
            row(color, product_a, "Color", "Red"),
            row(color, product_a, "Color", "Blue"),
            row(size, product_a, "Size", "M"),
            row(Uuid::new_v4(), product_b, "Material", "Wool"),
        ];

        let grouped = group_variant_tree(rows);
        assert_eq!(grouped.len(), 2);

        let variants_a = &grouped[&product_a];
        assert_eq!(variants_a.len(), 2);
        assert_eq!(variants_a[0].name, "Color");
        assert_eq!(variants_a[0].sub_variants.len(), 2);
        assert_eq!(variants_a[0].sub_variants[0].option_value, "Red");
        assert_eq!(variants_a[0].sub_variants[1].option_value, "Blue");
        assert_eq!(variants_a[1].name, "Size");

        assert_eq!(grouped[&product_b].len(), 1);
        assert_eq!(grouped[&product_b][0].sub_variants[0].option_value, "Wool");
    }
}
