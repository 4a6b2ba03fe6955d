//! Import batch input and the entities it persists.

use core::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;

/// Identifier assigned to a store by the backing service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(String);

impl StoreId {
    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for StoreId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for StoreId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A store the onboarding flow wants to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDraft {
    /// Display name.
    pub name: String,
    /// Postal address.
    #[serde(default)]
    pub address: Option<String>,
    /// ISO 4217 currency code.
    #[serde(default)]
    pub currency: Option<String>,
}

impl StoreDraft {
    /// Create a draft with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            currency: None,
        }
    }

    /// Stable slug derived from the name.
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }
}

/// A store persisted by the backing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    /// Backend identifier.
    pub id: StoreId,
    /// Display name.
    pub name: String,
    /// URL-safe slug derived from the name.
    pub slug: String,
    /// Postal address.
    #[serde(default)]
    pub address: Option<String>,
    /// ISO 4217 currency code.
    #[serde(default)]
    pub currency: Option<String>,
}

/// One line of a supplier invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub product: String,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    pub total: Decimal,
}

/// A supplier invoice parsed from an import file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub invoice_number: String,
    pub supplier: String,
    pub issued_on: Date,
    #[serde(default)]
    pub lines: Vec<InvoiceLine>,
}

/// A sales row parsed from an import file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub sold_on: Date,
    /// Name of the store the sale belongs to, as written in the source file.
    #[serde(default)]
    pub store_name: Option<String>,
    pub product: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
}

/// Everything an onboarding import submits at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBatch {
    #[serde(default)]
    pub store_drafts: Vec<StoreDraft>,
    #[serde(default)]
    pub invoice_records: Vec<InvoiceRecord>,
    #[serde(default)]
    pub sale_records: Vec<SaleRecord>,
}

impl ImportBatch {
    /// Number of invoice line items across all invoices.
    pub fn invoice_line_count(&self) -> usize {
        self.invoice_records.iter().map(|r| r.lines.len()).sum()
    }

    /// Earliest and latest sale dates, if there are any sales.
    pub fn sales_period(&self) -> Option<Period> {
        Period::covering(self.sale_records.iter().map(|s| s.sold_on))
    }

    /// Earliest and latest dates across invoices and sales.
    pub fn period(&self) -> Option<Period> {
        Period::covering(
            self.invoice_records
                .iter()
                .map(|r| r.issued_on)
                .chain(self.sale_records.iter().map(|s| s.sold_on)),
        )
    }
}

/// A purchase line persisted for a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub store_id: StoreId,
    pub supplier: String,
    pub invoice_number: String,
    pub purchased_on: Date,
    pub product: String,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    pub total: Decimal,
}

impl PurchaseLine {
    /// Build a purchase line from an invoice line item.
    pub fn from_invoice(store_id: &StoreId, invoice: &InvoiceRecord, line: &InvoiceLine) -> Self {
        Self {
            store_id: store_id.clone(),
            supplier: invoice.supplier.clone(),
            invoice_number: invoice.invoice_number.clone(),
            purchased_on: invoice.issued_on,
            product: line.product.clone(),
            quantity: line.quantity,
            unit: line.unit.clone(),
            unit_price: line.unit_price,
            total: line.total,
        }
    }
}

/// A sale line persisted for a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub store_id: StoreId,
    pub sold_on: Date,
    pub product: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
}

impl SaleLine {
    /// Build a sale line from an imported sales row.
    pub fn from_record(store_id: &StoreId, record: &SaleRecord) -> Self {
        Self {
            store_id: store_id.clone(),
            sold_on: record.sold_on,
            product: record.product.clone(),
            quantity: record.quantity,
            unit_price: record.unit_price,
            total: record.total,
        }
    }
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: Date,
    pub end: Date,
}

impl Period {
    /// Smallest period covering every date, or `None` for no dates.
    pub fn covering(dates: impl IntoIterator<Item = Date>) -> Option<Self> {
        dates.into_iter().fold(None, |acc, d| match acc {
            None => Some(Period { start: d, end: d }),
            Some(p) => Some(Period {
                start: p.start.min(d),
                end: p.end.max(d),
            }),
        })
    }
}

/// Totals reported after a successful import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub total_purchases: Decimal,
    pub total_sales: Decimal,
    pub period: Option<Period>,
}

/// Outcome of a successful import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub stores: Vec<Store>,
    pub summary: ImportSummary,
}

/// Derive a URL-safe slug from a display name.
///
/// Lowercases, folds common Latin accents to ASCII, replaces every run of
/// other characters with a single `-`, and trims leading/trailing dashes.
///
/// ```
/// use larder_types::slugify;
///
/// assert_eq!(slugify("  Le Petit Bistrot  "), "le-petit-bistrot");
/// assert_eq!(slugify("Crêperie & Co."), "creperie-co");
/// ```
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars().flat_map(char::to_lowercase) {
        let c = fold_accent(c);
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }

    slug
}

fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}
