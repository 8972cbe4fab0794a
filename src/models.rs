use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// key: marketplace-models -> providers,slots,bookings
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Provider {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
    pub status: String,
    pub is_admin: bool,
    pub provider_number: Option<i64>,
    pub booking_fee_cents: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Slot {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub title: String,
    pub category: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub zip: Option<String>,
    pub city: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub capacity: i32,
    pub price_cents: Option<i32>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Booking {
    pub id: Uuid,
    pub slot_id: Uuid,
    pub provider_id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub status: String,
    pub fee_status: String,
    pub fee_cents: i32,
    pub invoice_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

/// Closed set of slot categories. The store keeps plain text; values are
/// validated here before anything is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotCategory {
    Friseur,
    Kosmetik,
    Massage,
    Physiotherapie,
    Coaching,
    Beratung,
    Sonstiges,
}

impl SlotCategory {
    pub const ALL: [SlotCategory; 7] = [
        SlotCategory::Friseur,
        SlotCategory::Kosmetik,
        SlotCategory::Massage,
        SlotCategory::Physiotherapie,
        SlotCategory::Coaching,
        SlotCategory::Beratung,
        SlotCategory::Sonstiges,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotCategory::Friseur => "Friseur",
            SlotCategory::Kosmetik => "Kosmetik",
            SlotCategory::Massage => "Massage",
            SlotCategory::Physiotherapie => "Physiotherapie",
            SlotCategory::Coaching => "Coaching",
            SlotCategory::Beratung => "Beratung",
            SlotCategory::Sonstiges => "Sonstiges",
        }
    }

    pub fn parse(raw: &str) -> Option<SlotCategory> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }
}
