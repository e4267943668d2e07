//! # Domain Types
//!
//! Core domain types used throughout the stock ledger.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │    Purchase     │   │      Sale       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  company/branch │   │  total_cost     │   │  total_sale_    │       │
//! │  │  total_count    │   │  items[]        │   │  price, items[] │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Transfer     │   │  CashFlowEntry  │   │     Scope       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  from → to      │   │  amount         │   │  company_id     │       │
//! │  │  lines[]        │   │  income/expense │   │  branch_id      │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tenancy
//! Every stored row carries `company_id` and `branch_id`; every ledger
//! query filters by both. A row outside the caller's [`Scope`] is treated as
//! if it did not exist.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::pricing::LineItem;
use crate::validation::{self, ValidationResult};

// =============================================================================
// Scope
// =============================================================================

/// Company + branch a ledger operation is confined to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub company_id: String,
    pub branch_id: String,
}

impl Scope {
    pub fn new(company_id: impl Into<String>, branch_id: impl Into<String>) -> Self {
        Scope {
            company_id: company_id.into(),
            branch_id: branch_id.into(),
        }
    }

    /// Both fields must be present.
    pub fn validate(&self) -> ValidationResult<()> {
        validation::validate_required("company_id", &self.company_id)?;
        validation::validate_required("branch_id", &self.branch_id)?;
        Ok(())
    }

    /// Same company, another branch.
    pub fn with_branch(&self, branch_id: impl Into<String>) -> Self {
        Scope::new(self.company_id.clone(), branch_id)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.company_id, self.branch_id)
    }
}

// =============================================================================
// Payment Method
// =============================================================================

/// Free-form payment label (`cash`, `card`, `uzs`, `usd`, ...).
///
/// Cash-flow aggregates are grouped by this value, so it is normalised to
/// trimmed lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PaymentMethod(String);

impl PaymentMethod {
    pub fn new(label: impl AsRef<str>) -> Self {
        PaymentMethod(label.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for PaymentMethod {
    fn from(label: &str) -> Self {
        PaymentMethod::new(label)
    }
}

impl From<String> for PaymentMethod {
    fn from(label: String) -> Self {
        PaymentMethod::new(label)
    }
}

impl From<PaymentMethod> for String {
    fn from(method: PaymentMethod) -> Self {
        method.0
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Product & Category
// =============================================================================

/// A stocked product at one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub category_id: Option<String>,
    pub name: String,
    /// Unit of measure printed on bills ("pcs", "kg", ...).
    pub bill_format: Option<String>,
    pub image_url: Option<String>,
    pub incoming_price: Decimal,
    pub standard_price: Decimal,
    /// Stock level. Never negative; changed only by the stock ledger.
    pub total_count: i64,
    pub company_id: String,
    pub branch_id: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn scope(&self) -> Scope {
        Scope::new(self.company_id.clone(), self.branch_id.clone())
    }
}

/// Input for registering a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub scope: Scope,
    pub category_id: Option<String>,
    pub name: String,
    pub bill_format: Option<String>,
    pub image_url: Option<String>,
    pub incoming_price: Decimal,
    pub standard_price: Decimal,
    #[serde(default)]
    pub initial_count: i64,
    pub created_by: Option<String>,
}

/// A product category at one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub company_id: String,
    pub branch_id: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Stock
// =============================================================================

/// Current count of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: String,
    pub total_count: i64,
}

/// A requested change of `quantity` units for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub product_id: String,
    pub quantity: i64,
}

impl StockDelta {
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        StockDelta {
            product_id: product_id.into(),
            quantity,
        }
    }
}

// =============================================================================
// Cash Flow
// =============================================================================

/// Direction of a cash-flow entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum CashFlowDirection {
    Income,
    Expense,
}

impl CashFlowDirection {
    /// The direction of the compensating entry.
    pub const fn inverse(self) -> Self {
        match self {
            CashFlowDirection::Income => CashFlowDirection::Expense,
            CashFlowDirection::Expense => CashFlowDirection::Income,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            CashFlowDirection::Income => "income",
            CashFlowDirection::Expense => "expense",
        }
    }
}

impl fmt::Display for CashFlowDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CashFlowDirection {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "income" => Ok(CashFlowDirection::Income),
            "expense" => Ok(CashFlowDirection::Expense),
            other => Err(crate::error::ValidationError::InvalidFormat {
                field: "transaction_type".to_string(),
                reason: format!("'{other}' is not income or expense"),
            }),
        }
    }
}

/// One append-only cash-flow row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashFlowEntry {
    pub id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub direction: CashFlowDirection,
    pub description: String,
    pub payment_method: PaymentMethod,
    pub company_id: String,
    pub branch_id: String,
    pub transaction_date: DateTime<Utc>,
}

/// Input for `CreateIncome` / `CreateExpense`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCashFlowEntry {
    pub scope: Scope,
    pub user_id: String,
    pub amount: Decimal,
    pub description: String,
    pub payment_method: PaymentMethod,
}

impl NewCashFlowEntry {
    pub fn validate(&self) -> ValidationResult<()> {
        self.scope.validate()?;
        validation::validate_required("user_id", &self.user_id)?;
        validation::validate_amount(self.amount)?;
        validation::validate_description(&self.description)?;
        Ok(())
    }
}

// =============================================================================
// Purchase
// =============================================================================

/// A stored purchase with its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub supplier_id: String,
    pub purchased_by: String,
    pub total_cost: Decimal,
    pub payment_method: PaymentMethod,
    pub description: Option<String>,
    pub company_id: String,
    pub branch_id: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<PurchaseItem>,
}

impl Purchase {
    pub fn scope(&self) -> Scope {
        Scope::new(self.company_id.clone(), self.branch_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseItem {
    pub id: String,
    pub purchase_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub purchase_price: Decimal,
    pub total_price: Decimal,
}

/// Input for `CreatePurchase`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPurchase {
    pub scope: Scope,
    pub supplier_id: String,
    pub purchased_by: String,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub description: Option<String>,
    pub items: Vec<NewPurchaseItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPurchaseItem {
    pub product_id: String,
    pub quantity: i64,
    pub purchase_price: Decimal,
}

impl NewPurchase {
    /// Header-level checks; line items are checked by the pricing step.
    pub fn validate(&self) -> ValidationResult<()> {
        self.scope.validate()?;
        validation::validate_required("supplier_id", &self.supplier_id)?;
        validation::validate_required("purchased_by", &self.purchased_by)?;
        validation::validate_payment_method(&self.payment_method)?;
        if let Some(description) = &self.description {
            validation::validate_description(description)?;
        }
        validation::validate_line_count(self.items.len())?;
        for item in &self.items {
            validation::validate_required("product_id", &item.product_id)?;
        }
        Ok(())
    }

    pub fn line_items(&self) -> Vec<LineItem> {
        self.items
            .iter()
            .map(|item| LineItem::new(&item.product_id, item.quantity, item.purchase_price))
            .collect()
    }
}

/// Editable purchase fields. Quantities and prices are not editable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurchasePatch {
    pub supplier_id: Option<String>,
    pub description: Option<String>,
    pub payment_method: Option<PaymentMethod>,
}

impl PurchasePatch {
    pub fn is_empty(&self) -> bool {
        self.supplier_id.is_none() && self.description.is_none() && self.payment_method.is_none()
    }
}

// =============================================================================
// Sale
// =============================================================================

/// A stored sale with its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: String,
    pub client_id: String,
    pub sold_by: String,
    pub total_sale_price: Decimal,
    pub payment_method: PaymentMethod,
    pub company_id: String,
    pub branch_id: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<SaleItem>,
}

impl Sale {
    pub fn scope(&self) -> Scope {
        Scope::new(self.company_id.clone(), self.branch_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub sale_price: Decimal,
    pub total_price: Decimal,
}

/// Input for `CreateSale`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSale {
    pub scope: Scope,
    pub client_id: String,
    pub sold_by: String,
    pub payment_method: PaymentMethod,
    pub items: Vec<NewSaleItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSaleItem {
    pub product_id: String,
    pub quantity: i64,
    pub sale_price: Decimal,
}

impl NewSale {
    pub fn validate(&self) -> ValidationResult<()> {
        self.scope.validate()?;
        validation::validate_required("client_id", &self.client_id)?;
        validation::validate_required("sold_by", &self.sold_by)?;
        validation::validate_payment_method(&self.payment_method)?;
        validation::validate_line_count(self.items.len())?;
        for item in &self.items {
            validation::validate_required("product_id", &item.product_id)?;
        }
        Ok(())
    }

    pub fn line_items(&self) -> Vec<LineItem> {
        self.items
            .iter()
            .map(|item| LineItem::new(&item.product_id, item.quantity, item.sale_price))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SalePatch {
    pub client_id: Option<String>,
    pub payment_method: Option<PaymentMethod>,
}

impl SalePatch {
    pub fn is_empty(&self) -> bool {
        self.client_id.is_none() && self.payment_method.is_none()
    }
}

// =============================================================================
// Transfer
// =============================================================================

/// A committed inter-branch transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub transferred_by: String,
    pub from_branch_id: String,
    pub to_branch_id: String,
    pub description: Option<String>,
    pub company_id: String,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<TransferLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub id: String,
    pub transfer_id: String,
    /// Product row at the source branch.
    pub product_id: String,
    /// Product row the units landed on at the destination branch.
    pub destination_product_id: String,
    pub quantity: i64,
}

/// Input for `CreateTransfers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransfer {
    pub company_id: String,
    pub from_branch_id: String,
    pub to_branch_id: String,
    pub transferred_by: String,
    #[serde(default)]
    pub description: Option<String>,
    pub items: Vec<StockDelta>,
}

impl NewTransfer {
    pub fn source(&self) -> Scope {
        Scope::new(self.company_id.clone(), self.from_branch_id.clone())
    }

    pub fn destination(&self) -> Scope {
        Scope::new(self.company_id.clone(), self.to_branch_id.clone())
    }

    pub fn validate(&self) -> ValidationResult<()> {
        self.source().validate()?;
        validation::validate_required("to_branch_id", &self.to_branch_id)?;
        validation::validate_required("transferred_by", &self.transferred_by)?;
        if self.from_branch_id.trim() == self.to_branch_id.trim() {
            return Err(crate::error::ValidationError::MustDiffer {
                field: "to_branch_id".to_string(),
                other: "from_branch_id".to_string(),
            });
        }
        if let Some(description) = &self.description {
            validation::validate_description(description)?;
        }
        validation::validate_line_count(self.items.len())?;
        for item in &self.items {
            validation::validate_required("product_id", &item.product_id)?;
            validation::validate_quantity(item.quantity)?;
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn transfer(from: &str, to: &str, qty: i64) -> NewTransfer {
        NewTransfer {
            company_id: "c1".into(),
            from_branch_id: from.into(),
            to_branch_id: to.into(),
            transferred_by: "u1".into(),
            description: None,
            items: vec![StockDelta::new("p1", qty)],
        }
    }

    #[test]
    fn test_scope_requires_both_ids() {
        assert!(Scope::new("c1", "b1").validate().is_ok());
        assert!(Scope::new("", "b1").validate().is_err());
        assert!(Scope::new("c1", "   ").validate().is_err());
    }

    #[test]
    fn test_payment_method_normalised() {
        assert_eq!(PaymentMethod::new("  Cash ").as_str(), "cash");
        assert!(PaymentMethod::new("  ").is_blank());
    }

    #[test]
    fn test_direction_inverse_and_parse() {
        assert_eq!(CashFlowDirection::Income.inverse(), CashFlowDirection::Expense);
        assert_eq!("EXPENSE".parse::<CashFlowDirection>().unwrap(), CashFlowDirection::Expense);
        assert!("refund".parse::<CashFlowDirection>().is_err());
    }

    #[test]
    fn test_transfer_validation() {
        assert!(transfer("a", "b", 4).validate().is_ok());
        assert!(transfer("a", "a", 4).validate().is_err());
        assert!(transfer("a", "b", 0).validate().is_err());

        let mut empty = transfer("a", "b", 1);
        empty.items.clear();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_new_purchase_line_items() {
        let purchase = NewPurchase {
            scope: Scope::new("c1", "b1"),
            supplier_id: "s1".into(),
            purchased_by: "u1".into(),
            payment_method: PaymentMethod::new("cash"),
            description: None,
            items: vec![NewPurchaseItem {
                product_id: "p1".into(),
                quantity: 3,
                purchase_price: dec!(1500.005),
            }],
        };
        assert!(purchase.validate().is_ok());
        assert_eq!(
            purchase.line_items(),
            vec![LineItem::new("p1", 3, dec!(1500.005))]
        );
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(PurchasePatch::default().is_empty());
        let patch = SalePatch {
            client_id: Some("c2".into()),
            payment_method: None,
        };
        assert!(!patch.is_empty());
    }
}
