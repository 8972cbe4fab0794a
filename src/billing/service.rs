use anyhow::Result;
use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::models::{BillingOverview, BillingOverviewEntry, BillingRunItem, BillingRunSummary};

/// Single definition of which bookings a billing run picks up. The run and
/// the overview must never disagree on this. Eligibility is keyed on the
/// booking's creation date, not its confirmation date.
const ELIGIBLE_BOOKINGS: &str =
    "b.status = 'confirmed' AND b.fee_status = 'open' AND b.created_at >= $1 AND b.created_at < $2";

/// key: billing-service -> monthly fee runs
#[derive(Clone)]
pub struct BillingService {
    pool: PgPool,
}

impl BillingService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Invoices every provider with eligible bookings in the period. Each
    /// provider is billed in its own transaction; one failing group does not
    /// abort the rest.
    pub async fn run_billing(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<BillingRunSummary> {
        let sql = format!(
            "SELECT DISTINCT b.provider_id FROM bookings b WHERE {ELIGIBLE_BOOKINGS} ORDER BY b.provider_id"
        );
        let provider_ids: Vec<Uuid> = sqlx::query_scalar(&sql)
            .bind(period_start)
            .bind(period_end)
            .fetch_all(&self.pool)
            .await?;

        let mut items = Vec::new();
        let mut failed_providers = Vec::new();
        for provider_id in provider_ids {
            match self.bill_provider(provider_id, period_start, period_end).await {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(?error, %provider_id, "billing group failed; continuing with the rest");
                    failed_providers.push(provider_id);
                }
            }
        }
        let invoices_created = items.len();

        // Providers whose invoice for this period predates the run show up
        // with zero new bookings so reruns stay transparent.
        let fresh: Vec<Uuid> = items.iter().map(|item| item.invoice_id).collect();
        let existing = sqlx::query_as::<_, (Uuid, Option<i64>, Uuid)>(
            r#"
            SELECT i.provider_id, p.provider_number, i.id
            FROM invoices i
            JOIN providers p ON p.id = i.provider_id
            WHERE i.period_start = $1 AND i.period_end = $2 AND i.id != ALL($3)
            ORDER BY i.created_at ASC
            "#,
        )
        .bind(period_start)
        .bind(period_end)
        .bind(&fresh)
        .fetch_all(&self.pool)
        .await?;
        for (provider_id, provider_number, invoice_id) in existing {
            items.push(BillingRunItem {
                provider_id,
                provider_number,
                invoice_id,
                booking_count: 0,
                total_fee_cents: 0,
            });
        }

        Ok(BillingRunSummary {
            period_start,
            period_end,
            invoices_created,
            items,
            failed_providers,
        })
    }

    async fn bill_provider(
        &self,
        provider_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Option<BillingRunItem>> {
        let mut tx = self.pool.begin().await?;

        // Lock in id order so concurrent runs cannot deadlock on each other.
        let sql = format!(
            "SELECT b.id, b.fee_cents FROM bookings b WHERE {ELIGIBLE_BOOKINGS} AND b.provider_id = $3 ORDER BY b.id FOR UPDATE"
        );
        let rows: Vec<(Uuid, i32)> = sqlx::query_as(&sql)
            .bind(period_start)
            .bind(period_end)
            .bind(provider_id)
            .fetch_all(&mut *tx)
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let booking_count = rows.len() as i64;
        let total_fee_cents: i64 = rows.iter().map(|(_, fee)| i64::from(*fee)).sum();
        let booking_ids: Vec<Uuid> = rows.into_iter().map(|(id, _)| id).collect();

        let provider_number: Option<i64> =
            sqlx::query_scalar("SELECT provider_number FROM providers WHERE id = $1")
                .bind(provider_id)
                .fetch_one(&mut *tx)
                .await?;

        let invoice_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO invoices (id, provider_id, period_start, period_end, booking_count, total_fee_cents, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'open')
            "#,
        )
        .bind(invoice_id)
        .bind(provider_id)
        .bind(period_start)
        .bind(period_end)
        .bind(booking_count)
        .bind(total_fee_cents)
        .execute(&mut *tx)
        .await?;

        let marked = sqlx::query(
            "UPDATE bookings SET fee_status = 'invoiced', invoice_id = $1 WHERE id = ANY($2) AND fee_status = 'open'",
        )
        .bind(invoice_id)
        .bind(&booking_ids)
        .execute(&mut *tx)
        .await?;
        if marked.rows_affected() != booking_count as u64 {
            anyhow::bail!(
                "invoice {invoice_id}: marked {} of {booking_count} bookings, rolling back",
                marked.rows_affected()
            );
        }

        tx.commit().await?;

        tracing::info!(
            %provider_id,
            %invoice_id,
            booking_count,
            total_fee_cents,
            "invoiced provider"
        );
        Ok(Some(BillingRunItem {
            provider_id,
            provider_number,
            invoice_id,
            booking_count,
            total_fee_cents,
        }))
    }

    /// Read-only projection of what a run over the same period would invoice.
    pub async fn billing_overview(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<BillingOverview> {
        let sql = format!(
            r#"
            SELECT b.provider_id, p.name AS provider_name, p.provider_number,
                   COUNT(*) AS booking_count, SUM(b.fee_cents)::bigint AS total_fee_cents
            FROM bookings b
            JOIN providers p ON p.id = b.provider_id
            WHERE {ELIGIBLE_BOOKINGS}
            GROUP BY b.provider_id, p.name, p.provider_number
            ORDER BY p.provider_number NULLS LAST, b.provider_id
            "#
        );
        let entries = sqlx::query_as::<_, BillingOverviewEntry>(&sql)
            .bind(period_start)
            .bind(period_end)
            .fetch_all(&self.pool)
            .await?;
        let grand_total_cents = entries.iter().map(|entry| entry.total_fee_cents).sum();
        Ok(BillingOverview {
            period_start,
            period_end,
            entries,
            grand_total_cents,
        })
    }
}

/// First instant of `year`/`month` and of the following month, UTC. The
/// period is half-open so a booking created exactly at the boundary falls
/// into the later month.
pub fn month_bounds(year: i32, month: u32) -> AppResult<(DateTime<Utc>, DateTime<Utc>)> {
    let Some(start_date) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return Err(AppError::BadRequest(format!(
            "invalid billing period {year}-{month:02}"
        )));
    };
    let start = Utc.from_utc_datetime(&start_date.and_time(NaiveTime::MIN));
    let end = start + Months::new(1);
    Ok((start, end))
}

/// Default billing period: the calendar month before `now`.
pub fn previous_month(now: DateTime<Utc>) -> (i32, u32) {
    if now.month() == 1 {
        (now.year() - 1, 12)
    } else {
        (now.year(), now.month() - 1)
    }
}
