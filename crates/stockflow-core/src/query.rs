//! # List Filters
//!
//! Filter and pagination inputs for the `List*` operations, plus the
//! aggregate shapes returned by the cash-flow statistics.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{CashFlowDirection, PaymentMethod, Scope};
use crate::validation::{self, ValidationResult};

/// Largest page size a caller may request.
pub const MAX_PAGE_LIMIT: u32 = 500;

/// Page size used when the caller does not choose one.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Entries per ranking when the caller does not choose a limit.
pub const DEFAULT_RANKING_LIMIT: u32 = 10;

// =============================================================================
// Pagination
// =============================================================================

/// 1-based page number and page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Page {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl Page {
    pub fn new(page: u32, limit: u32) -> Self {
        Page { page, limit }
    }

    pub fn validate(&self) -> ValidationResult<()> {
        if self.page == 0 {
            return Err(ValidationError::must_be_positive("page"));
        }
        if self.limit == 0 {
            return Err(ValidationError::must_be_positive("limit"));
        }
        if self.limit > MAX_PAGE_LIMIT {
            return Err(ValidationError::TooMany {
                field: "limit".to_string(),
                max: MAX_PAGE_LIMIT as usize,
            });
        }
        Ok(())
    }

    /// SQL `OFFSET` for this page.
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit)
    }

    /// SQL `LIMIT` for this page.
    pub fn limit(&self) -> i64 {
        i64::from(self.limit)
    }
}

/// One page of results and the number of rows matching the filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listed<T> {
    pub items: Vec<T>,
    pub total_count: i64,
}

// =============================================================================
// Date Range
// =============================================================================

/// Inclusive `[start, end]` bounds; either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        DateRange {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn validate(&self) -> ValidationResult<()> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(ValidationError::InvalidFormat {
                    field: "date_range".to_string(),
                    reason: "start is after end".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| at >= s) && self.end.map_or(true, |e| at <= e)
    }
}

// =============================================================================
// Filters
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseFilter {
    pub scope: Scope,
    #[serde(default)]
    pub supplier_id: Option<String>,
    #[serde(default)]
    pub purchased_by: Option<String>,
    #[serde(default)]
    pub range: DateRange,
    #[serde(default)]
    pub page: Page,
}

impl PurchaseFilter {
    pub fn for_scope(scope: Scope) -> Self {
        PurchaseFilter {
            scope,
            supplier_id: None,
            purchased_by: None,
            range: DateRange::default(),
            page: Page::default(),
        }
    }

    pub fn validate(&self) -> ValidationResult<()> {
        self.scope.validate()?;
        self.range.validate()?;
        self.page.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleFilter {
    pub scope: Scope,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub sold_by: Option<String>,
    #[serde(default)]
    pub range: DateRange,
    #[serde(default)]
    pub page: Page,
}

impl SaleFilter {
    pub fn for_scope(scope: Scope) -> Self {
        SaleFilter {
            scope,
            client_id: None,
            sold_by: None,
            range: DateRange::default(),
            page: Page::default(),
        }
    }

    pub fn validate(&self) -> ValidationResult<()> {
        self.scope.validate()?;
        self.range.validate()?;
        self.page.validate()
    }
}

/// Transfers are company-wide; `branch_id` matches either side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferFilter {
    pub company_id: String,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub transferred_by: Option<String>,
    #[serde(default)]
    pub range: DateRange,
    #[serde(default)]
    pub page: Page,
}

impl TransferFilter {
    pub fn for_company(company_id: impl Into<String>) -> Self {
        TransferFilter {
            company_id: company_id.into(),
            branch_id: None,
            transferred_by: None,
            range: DateRange::default(),
            page: Page::default(),
        }
    }

    pub fn validate(&self) -> ValidationResult<()> {
        validation::validate_required("company_id", &self.company_id)?;
        self.range.validate()?;
        self.page.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashFlowFilter {
    pub scope: Scope,
    #[serde(default)]
    pub direction: Option<CashFlowDirection>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    /// Substring match on the description.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub range: DateRange,
    #[serde(default)]
    pub page: Page,
}

impl CashFlowFilter {
    pub fn for_scope(scope: Scope) -> Self {
        CashFlowFilter {
            scope,
            direction: None,
            payment_method: None,
            description: None,
            range: DateRange::default(),
            page: Page::default(),
        }
    }

    pub fn validate(&self) -> ValidationResult<()> {
        self.scope.validate()?;
        self.range.validate()?;
        self.page.validate()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Sum of amounts for one payment method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTotal {
    pub payment_method: PaymentMethod,
    pub total: Decimal,
}

/// Income of one branch, split by payment method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchIncome {
    pub branch_id: String,
    pub by_payment_method: Vec<PaymentTotal>,
    pub total: Decimal,
}

/// Income of every branch of a company plus the grand total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchIncomeReport {
    pub branches: Vec<BranchIncome>,
    pub total: Decimal,
}

/// Stock value of one branch: `standard_price * total_count` summed over
/// its products.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockValue {
    pub company_id: String,
    pub branch_id: String,
    pub total: Decimal,
}

// =============================================================================
// Rankings
// =============================================================================

/// Top-N request over a closed date range. The branch is optional; without
/// it the ranking covers the whole company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingQuery {
    pub company_id: String,
    #[serde(default)]
    pub branch_id: Option<String>,
    pub range: DateRange,
    #[serde(default = "default_ranking_limit")]
    pub limit: u32,
}

fn default_ranking_limit() -> u32 {
    DEFAULT_RANKING_LIMIT
}

impl RankingQuery {
    pub fn new(company_id: impl Into<String>, range: DateRange) -> Self {
        RankingQuery {
            company_id: company_id.into(),
            branch_id: None,
            range,
            limit: DEFAULT_RANKING_LIMIT,
        }
    }

    pub fn for_branch(mut self, branch_id: impl Into<String>) -> Self {
        self.branch_id = Some(branch_id.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn validate(&self) -> ValidationResult<()> {
        validation::validate_required("company_id", &self.company_id)?;
        if let Some(branch_id) = &self.branch_id {
            validation::validate_required("branch_id", branch_id)?;
        }
        if self.range.start.is_none() {
            return Err(ValidationError::required("start_date"));
        }
        if self.range.end.is_none() {
            return Err(ValidationError::required("end_date"));
        }
        self.range.validate()?;
        Page::new(1, self.limit).validate()
    }
}

/// Units of one product sold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSales {
    pub product_id: String,
    pub name: String,
    pub quantity: i64,
}

/// Best sellers of one UTC calendar day, most units first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySales {
    pub day: NaiveDate,
    pub products: Vec<ProductSales>,
}

/// A client or supplier with the money moved with them and the number of
/// headers behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyTotal {
    pub party_id: String,
    pub total: Decimal,
    pub operations: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================
