use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// key: billing-models -> invoices,run summaries
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub booking_count: i64,
    pub total_fee_cents: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub exported_at: Option<DateTime<Utc>>,
}

/// One provider's share of a billing run. A zero-count item means the
/// provider already carried an invoice for the period and nothing new was
/// picked up.
#[derive(Debug, Clone, Serialize)]
pub struct BillingRunItem {
    pub provider_id: Uuid,
    pub provider_number: Option<i64>,
    pub invoice_id: Uuid,
    pub booking_count: i64,
    pub total_fee_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillingRunSummary {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub invoices_created: usize,
    pub items: Vec<BillingRunItem>,
    pub failed_providers: Vec<Uuid>,
}

/// key: billing-overview -> dry-run projection
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BillingOverviewEntry {
    pub provider_id: Uuid,
    pub provider_name: String,
    pub provider_number: Option<i64>,
    pub booking_count: i64,
    pub total_fee_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillingOverview {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub entries: Vec<BillingOverviewEntry>,
    pub grand_total_cents: i64,
}
