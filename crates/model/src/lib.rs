use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Product — карточка товара с денормализованным суммарным остатком.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub product_code: String,
    pub product_name: String,
    pub hsn_code: String,
    pub created_user: Uuid,
    pub is_favourite: bool,
    pub active: bool,
    pub total_stock: Decimal,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
}

/// Variant — ось вариативности товара (например, "Color").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub created_date: DateTime<Utc>,
}

/// SubVariant — конкретное значение опции, единица учёта остатка.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubVariant {
    pub id: Uuid,
    pub variant_id: Uuid,
    pub product_id: Uuid,
    pub option_value: String,
    pub stock: Decimal,
    pub sku: Option<String>,
    pub created_date: DateTime<Utc>,
}

/// StockTransaction — неизменяемая запись одного движения остатка.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StockTransaction {
    pub id: Uuid,
    pub product_id: Uuid,
    pub sub_variant_id: Uuid,
    pub transaction_type: TransactionType,
    pub quantity: Decimal,
    pub transaction_date: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Direction of a stock movement, stored as text in the transaction log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransactionType {
    #[serde(rename = "PURCHASE")]
    Purchase,
    #[serde(rename = "SALE")]
    Sale,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Purchase => "PURCHASE",
            TransactionType::Sale => "SALE",
        }
    }
}

/// Input for creating a product aggregate with its variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    pub hsn_code: String,
    pub product_code: String,
    #[serde(default)]
    pub created_user: Option<Uuid>,
    #[serde(default)]
    pub is_favourite: bool,
    pub variants: Vec<NewVariant>,
}

/// One variant axis with its option values (e.g. "Size": ["S", "M"]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewVariant {
    pub name: String,
    pub options: Vec<String>,
}

/// Input for a single stock mutation (purchase or sale).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StockRequest {
    pub product_id: Uuid,
    pub sub_variant_id: Uuid,
    pub quantity: Decimal,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Product row as returned by the paged listing, with its variant tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    pub id: Uuid,
    pub product_code: String,
    pub product_name: String,
    pub is_favourite: bool,
    pub active: bool,
    pub hsn_code: String,
    pub total_stock: Decimal,
    pub created_date: DateTime<Utc>,
    #[serde(default)]
    pub variants: Vec<VariantSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariantSummary {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub sub_variants: Vec<SubVariantSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubVariantSummary {
    pub id: Uuid,
    pub option_value: String,
    pub stock: Decimal,
    pub sku: Option<String>,
}

/// One flattened row of the variants/sub-variants join, keyed by product.
/// The service groups these back into [`VariantSummary`] trees.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantTreeRow {
    pub variant_id: Uuid,
    pub product_id: Uuid,
    pub variant_name: String,
    pub sub_variant_id: Uuid,
    pub option_value: String,
    pub stock: Decimal,
    pub sku: Option<String>,
}

/// Generic page of results with the total count across all pages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total_count: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, total_count: i64, page: i64, page_size: i64) -> Self {
        // ceil(total_count / page_size); page_size is clamped to >= 1 upstream
        let total_pages = (total_count + page_size - 1) / page_size;
        Self {
            items,
            total_count,
            page,
            page_size,
            total_pages,
        }
    }
}

/// Builds the SKU for a sub-variant: `{CODE}-{VARIANT}-{OPTION}`, upper-cased.
pub fn build_sku(product_code: &str, variant_name: &str, option_value: &str) -> String {
    format!("{product_code}-{variant_name}-{option_value}").to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_new_product_from_json() {
        let json = r#"
        {
           "name": "Cotton T-Shirt",
           "hsnCode": "6109",
           "productCode": "SKU-1",
           "createdUser": "b2f7cbb0-51f4-4fbb-9fe6-3d90b03eca6c",
           "isFavourite": true,
           "variants": [
              {
                 "name": "Color",
                 "options": ["Red", "Blue"]
              }
           ]
        }
        "#;
        let input: NewProduct = serde_json::from_str(json).unwrap();
        assert_eq!(input.product_code, "SKU-1");
        assert_eq!(input.variants.len(), 1);
        assert_eq!(input.variants[0].options, vec!["Red", "Blue"]);
        assert!(input.is_favourite);
        assert_eq!(
            input.created_user.unwrap().to_string(),
            "b2f7cbb0-51f4-4fbb-9fe6-3d90b03eca6c"
        );
    }

    #[test]
    fn test_new_product_optional_fields_default() {
        // createdUser и isFavourite могут отсутствовать в запросе
        let json = r#"
        {
           "name": "Plain Mug",
           "hsnCode": "6912",
           "productCode": "MUG-1",
           "variants": [{ "name": "Size", "options": ["Small"] }]
        }
        "#;
        let input: NewProduct = serde_json::from_str(json).unwrap();
        assert!(input.created_user.is_none());
        assert!(!input.is_favourite);
    }

    #[test]
    fn test_build_sku_is_uppercased_and_deterministic() {
        assert_eq!(build_sku("SKU-1", "Color", "Red"), "SKU-1-COLOR-RED");
        assert_eq!(build_sku("SKU-1", "Color", "Blue"), "SKU-1-COLOR-BLUE");
        assert_eq!(build_sku("sku-1", "color", "red"), "SKU-1-COLOR-RED");
    }

    #[test]
    fn test_transaction_type_as_str() {
        assert_eq!(TransactionType::Purchase.as_str(), "PURCHASE");
        assert_eq!(TransactionType::Sale.as_str(), "SALE");
        let json = serde_json::to_string(&TransactionType::Sale).unwrap();
        assert_eq!(json, r#""SALE""#);
    }

    #[test]
    fn test_paged_result_total_pages() {
        let paged = PagedResult::<i32>::new(vec![], 25, 1, 10);
        assert_eq!(paged.total_pages, 3);

        let paged = PagedResult::<i32>::new(vec![], 30, 1, 10);
        assert_eq!(paged.total_pages, 3);

        let paged = PagedResult::<i32>::new(vec![], 0, 1, 10);
        assert_eq!(paged.total_pages, 0);

        let paged = PagedResult::<i32>::new(vec![], 1, 1, 100);
        assert_eq!(paged.total_pages, 1);
    }

    #[test]
    fn test_stock_request_notes_optional() {
        let json = r#"
        {
           "productId": "5f0f1fd2-6c3b-41c7-a6f3-2b9f6f3f2a10",
           "subVariantId": "c0a80121-7ac0-4e1c-9f43-1a2b3c4d5e6f",
           "quantity": "5"
        }
        "#;
        let req: StockRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.quantity, Decimal::from(5));
        assert!(req.notes.is_none());
    }
}
