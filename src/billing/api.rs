use axum::{
    extract::{Extension, Path, Query},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::capabilities::Capabilities;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthProvider;
use crate::models::Booking;

use super::models::{BillingOverview, BillingRunSummary, Invoice};
use super::service::{month_bounds, previous_month, BillingService};

/// key: billing-api -> rest endpoints
pub fn routes() -> Router {
    Router::new()
        .route("/api/invoices", get(list_my_invoices))
        .route("/admin/billing/overview", get(admin_billing_overview))
        .route("/admin/billing/run", post(admin_run_billing))
        .route("/admin/invoices", get(admin_list_invoices))
        .route("/admin/invoices/:id", get(admin_get_invoice))
        .route("/admin/invoices/:id/archive", post(admin_archive_invoice))
        .route("/admin/invoices/:id/mark_exported", post(admin_mark_invoice_exported))
}

#[derive(Debug, Deserialize)]
pub struct BillingPeriodParams {
    pub year: Option<i32>,
    pub month: Option<u32>,
}

fn resolve_period(
    year: Option<i32>,
    month: Option<u32>,
) -> AppResult<(DateTime<Utc>, DateTime<Utc>)> {
    match (year, month) {
        (Some(year), Some(month)) => month_bounds(year, month),
        (None, None) => {
            let (year, month) = previous_month(Utc::now());
            month_bounds(year, month)
        }
        _ => Err(AppError::BadRequest(
            "year and month must be provided together".into(),
        )),
    }
}

/// Omitting the body bills the previous calendar month.
pub async fn admin_run_billing(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    payload: Option<Json<BillingPeriodParams>>,
) -> AppResult<Json<BillingRunSummary>> {
    let caps = Capabilities::resolve(&pool, &caller).await?;
    caps.require_admin()?;

    let (year, month) = match payload {
        Some(Json(params)) => (params.year, params.month),
        None => (None, None),
    };
    let (period_start, period_end) = resolve_period(year, month)?;

    let summary = BillingService::new(pool)
        .run_billing(period_start, period_end)
        .await
        .map_err(|error| {
            tracing::error!(?error, "billing run failed");
            AppError::Message("billing run failed".into())
        })?;
    Ok(Json(summary))
}

pub async fn admin_billing_overview(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    Query(params): Query<BillingPeriodParams>,
) -> AppResult<Json<BillingOverview>> {
    let caps = Capabilities::resolve(&pool, &caller).await?;
    caps.require_admin()?;

    let (period_start, period_end) = resolve_period(params.year, params.month)?;
    let overview = BillingService::new(pool)
        .billing_overview(period_start, period_end)
        .await
        .map_err(|error| {
            tracing::error!(?error, "billing overview failed");
            AppError::Message("billing overview failed".into())
        })?;
    Ok(Json(overview))
}

pub async fn list_my_invoices(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
) -> AppResult<Json<Vec<Invoice>>> {
    let invoices = sqlx::query_as::<_, Invoice>(
        "SELECT * FROM invoices WHERE provider_id = $1 ORDER BY period_start DESC",
    )
    .bind(caller.provider_id)
    .fetch_all(&pool)
    .await?;
    Ok(Json(invoices))
}

#[derive(Debug, Deserialize)]
pub struct InvoiceListParams {
    pub status: Option<String>,
}

pub async fn admin_list_invoices(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    Query(params): Query<InvoiceListParams>,
) -> AppResult<Json<Vec<Invoice>>> {
    let caps = Capabilities::resolve(&pool, &caller).await?;
    caps.require_admin()?;
    let invoices = sqlx::query_as::<_, Invoice>(
        r#"
        SELECT * FROM invoices
        WHERE ($1::text IS NULL OR status = $1)
        ORDER BY period_start DESC, created_at DESC
        "#,
    )
    .bind(params.status)
    .fetch_all(&pool)
    .await?;
    Ok(Json(invoices))
}

#[derive(Debug, serde::Serialize)]
pub struct InvoiceDetail {
    pub invoice: Invoice,
    pub bookings: Vec<Booking>,
}

pub async fn admin_get_invoice(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    Path(id): Path<Uuid>,
) -> AppResult<Json<InvoiceDetail>> {
    let caps = Capabilities::resolve(&pool, &caller).await?;
    caps.require_admin()?;

    let invoice = load_invoice(&pool, id).await?;
    let bookings = sqlx::query_as::<_, Booking>(
        "SELECT * FROM bookings WHERE invoice_id = $1 ORDER BY created_at ASC",
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;
    Ok(Json(InvoiceDetail { invoice, bookings }))
}

pub async fn admin_archive_invoice(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Invoice>> {
    let caps = Capabilities::resolve(&pool, &caller).await?;
    caps.require_admin()?;

    let invoice = load_invoice(&pool, id).await?;
    if invoice.status == "archived" {
        return Ok(Json(invoice));
    }
    let invoice = sqlx::query_as::<_, Invoice>(
        "UPDATE invoices SET status = 'archived' WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_one(&pool)
    .await?;
    Ok(Json(invoice))
}

/// Marking records the export handoff time once; re-marking is a no-op.
pub async fn admin_mark_invoice_exported(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Invoice>> {
    let caps = Capabilities::resolve(&pool, &caller).await?;
    caps.require_admin()?;

    let invoice = load_invoice(&pool, id).await?;
    match invoice.status.as_str() {
        "exported" => Ok(Json(invoice)),
        "archived" => Err(AppError::InvalidStateTransition),
        _ => {
            let invoice = sqlx::query_as::<_, Invoice>(
                "UPDATE invoices SET status = 'exported', exported_at = NOW() WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .fetch_one(&pool)
            .await?;
            Ok(Json(invoice))
        }
    }
}

async fn load_invoice(pool: &PgPool, id: Uuid) -> AppResult<Invoice> {
    sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_period_resolves() {
        let (start, end) = resolve_period(Some(2026), Some(3)).unwrap();
        assert!(start < end);
    }

    #[test]
    fn partial_period_rejected() {
        assert!(matches!(
            resolve_period(Some(2026), None),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            resolve_period(None, Some(3)),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn omitted_period_defaults_to_previous_month() {
        let (start, end) = resolve_period(None, None).unwrap();
        assert!(start < end);
        assert!(end <= Utc::now());
    }
}
