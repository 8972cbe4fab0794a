use axum::{
    extract::{Extension, Path, Query},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use uuid::Uuid;

use crate::capabilities::Capabilities;
use crate::config;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthProvider;
use crate::mailer::Mailer;
use crate::models::{Booking, Slot};

/// Outcome of a confirmation attempt. `StaleCanceled` records that a
/// confirmation signal arrived for a booking that was already canceled; the
/// booking stays canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    AlreadyConfirmed,
    StaleCanceled,
}

impl ConfirmOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmOutcome::Confirmed => "confirmed",
            ConfirmOutcome::AlreadyConfirmed => "already_confirmed",
            ConfirmOutcome::StaleCanceled => "stale_canceled",
        }
    }
}

pub fn routes() -> Router {
    Router::new()
        .route("/public/bookings", post(public_create_booking))
        .route("/public/bookings/confirm", post(public_confirm_booking))
        .route("/public/bookings/cancel", post(public_cancel_booking))
        .route("/api/bookings", get(list_provider_bookings))
        .route("/api/bookings/:id/cancel", post(provider_cancel_booking))
        .route("/admin/bookings/expire_holds", post(admin_expire_holds))
}

/// Creates a hold against a published slot. The slot row lock serializes
/// concurrent holds so the capacity count stays accurate.
pub async fn create_hold(
    pool: &PgPool,
    slot_id: Uuid,
    customer_name: &str,
    customer_email: &str,
) -> AppResult<Booking> {
    let mut tx = pool.begin().await?;

    let slot = sqlx::query_as::<_, Slot>("SELECT * FROM slots WHERE id = $1 FOR UPDATE")
        .bind(slot_id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(slot) = slot else {
        return Err(AppError::NotFound);
    };
    if slot.status != "published" || slot.start_at <= Utc::now() {
        return Err(AppError::SlotNotBookable);
    }

    let active: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM bookings WHERE slot_id = $1 AND status IN ('hold', 'confirmed')",
    )
    .bind(slot_id)
    .fetch_one(&mut *tx)
    .await?;
    if active >= i64::from(slot.capacity) {
        return Err(AppError::CapacityExceeded);
    }

    // One active booking per customer email and provider in the same time
    // window. Bookings with other providers are not restricted.
    let clash: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM bookings b
        JOIN slots s ON s.id = b.slot_id
        WHERE b.customer_email = $1
          AND b.status IN ('hold', 'confirmed')
          AND s.provider_id = $2
          AND s.start_at < $3
          AND s.end_at > $4
        "#,
    )
    .bind(customer_email)
    .bind(slot.provider_id)
    .bind(slot.end_at)
    .bind(slot.start_at)
    .fetch_one(&mut *tx)
    .await?;
    if clash > 0 {
        return Err(AppError::DuplicateBooking);
    }

    // Snapshot the provider's current per-booking fee onto the booking.
    let fee_cents: i32 = sqlx::query_scalar("SELECT booking_fee_cents FROM providers WHERE id = $1")
        .bind(slot.provider_id)
        .fetch_one(&mut *tx)
        .await?;

    let booking = sqlx::query_as::<_, Booking>(
        r#"
        INSERT INTO bookings (id, slot_id, provider_id, customer_name, customer_email, status, fee_status, fee_cents)
        VALUES ($1, $2, $3, $4, $5, 'hold', 'open', $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(slot_id)
    .bind(slot.provider_id)
    .bind(customer_name)
    .bind(customer_email)
    .bind(fee_cents)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(booking)
}

async fn lock_booking(conn: &mut PgConnection, booking_id: Uuid) -> AppResult<Booking> {
    sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1 FOR UPDATE")
        .bind(booking_id)
        .fetch_optional(conn)
        .await?
        .ok_or(AppError::BookingNotFound)
}

/// Confirms a hold inside the caller's transaction. Re-confirming is a no-op
/// success and leaves `confirmed_at` untouched; a canceled booking is never
/// resurrected.
pub async fn confirm_in_tx(conn: &mut PgConnection, booking_id: Uuid) -> AppResult<ConfirmOutcome> {
    let booking = lock_booking(&mut *conn, booking_id).await?;
    match booking.status.as_str() {
        "confirmed" => Ok(ConfirmOutcome::AlreadyConfirmed),
        "canceled" => {
            tracing::warn!(
                %booking_id,
                "confirmation arrived for a canceled booking; leaving it canceled"
            );
            Ok(ConfirmOutcome::StaleCanceled)
        }
        "hold" => {
            sqlx::query("UPDATE bookings SET status = 'confirmed', confirmed_at = NOW() WHERE id = $1")
                .bind(booking_id)
                .execute(&mut *conn)
                .await?;
            Ok(ConfirmOutcome::Confirmed)
        }
        other => Err(AppError::Message(format!(
            "booking {booking_id} has unexpected status {other}"
        ))),
    }
}

/// Cancels a hold or confirmed booking inside the caller's transaction,
/// releasing the slot's capacity immediately.
pub async fn cancel_in_tx(conn: &mut PgConnection, booking_id: Uuid) -> AppResult<()> {
    let booking = lock_booking(&mut *conn, booking_id).await?;
    match booking.status.as_str() {
        "hold" | "confirmed" => {
            sqlx::query("UPDATE bookings SET status = 'canceled', canceled_at = NOW() WHERE id = $1")
                .bind(booking_id)
                .execute(&mut *conn)
                .await?;
            Ok(())
        }
        _ => Err(AppError::InvalidStateTransition),
    }
}

/// Batch-cancels all holds created before `cutoff`, returning how many were
/// expired.
pub async fn expire_stale_holds(pool: &PgPool, cutoff: DateTime<Utc>) -> AppResult<u64> {
    let result = sqlx::query(
        "UPDATE bookings SET status = 'canceled', canceled_at = NOW() WHERE status = 'hold' AND created_at < $1",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub slot_id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
}

#[derive(Debug, Serialize)]
pub struct PublicBookingResponse {
    pub booking_id: Uuid,
    pub status: String,
    pub token: String,
    pub confirm_url: String,
    pub cancel_url: String,
}

pub async fn public_create_booking(
    Extension(pool): Extension<PgPool>,
    Extension(mailer): Extension<Arc<dyn Mailer>>,
    Json(payload): Json<CreateBookingRequest>,
) -> AppResult<Json<PublicBookingResponse>> {
    let name = payload.customer_name.trim();
    let email = payload.customer_email.trim();
    if name.is_empty() || !email.contains('@') {
        return Err(AppError::BadRequest("customer name and email required".into()));
    }

    let booking = create_hold(&pool, payload.slot_id, name, email).await?;
    let token = issue_booking_token(booking.id)?;
    let base = config::BASE_URL.as_str();
    let confirm_url = format!("{base}/public/bookings/confirm?token={token}");
    let cancel_url = format!("{base}/public/bookings/cancel?token={token}");

    let mail_body = format!(
        "Please confirm your booking within {} minutes:\n{confirm_url}\n\nTo cancel instead:\n{cancel_url}\n",
        *config::BOOKING_HOLD_TTL_MIN
    );
    if let Err(error) = mailer.send(email, "Please confirm your booking", &mail_body).await {
        tracing::warn!(?error, booking_id = %booking.id, "handing booking mail to the mailer failed");
    }

    Ok(Json(PublicBookingResponse {
        booking_id: booking.id,
        status: booking.status,
        token,
        confirm_url,
        cancel_url,
    }))
}

#[derive(Debug, Deserialize)]
pub struct BookingTokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ConfirmBookingResponse {
    pub booking_id: Uuid,
    pub status: String,
    pub already_confirmed: bool,
}

/// Link-click confirmation. Holds older than the configured TTL are canceled
/// on the spot instead of being confirmed.
pub async fn public_confirm_booking(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<BookingTokenRequest>,
) -> AppResult<Json<ConfirmBookingResponse>> {
    let booking_id = decode_booking_token(&payload.token)?;
    let mut tx = pool.begin().await?;
    let booking = lock_booking(&mut *tx, booking_id).await?;

    if booking.status == "hold" {
        let ttl = Duration::minutes(*config::BOOKING_HOLD_TTL_MIN);
        if booking.created_at + ttl < Utc::now() {
            sqlx::query("UPDATE bookings SET status = 'canceled', canceled_at = NOW() WHERE id = $1")
                .bind(booking_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Err(AppError::HoldExpired);
        }
    }

    let outcome = confirm_in_tx(&mut *tx, booking_id).await?;
    tx.commit().await?;
    match outcome {
        ConfirmOutcome::Confirmed => Ok(Json(ConfirmBookingResponse {
            booking_id,
            status: "confirmed".into(),
            already_confirmed: false,
        })),
        ConfirmOutcome::AlreadyConfirmed => Ok(Json(ConfirmBookingResponse {
            booking_id,
            status: "confirmed".into(),
            already_confirmed: true,
        })),
        ConfirmOutcome::StaleCanceled => Err(AppError::InvalidStateTransition),
    }
}

#[derive(Debug, Serialize)]
pub struct CancelBookingResponse {
    pub booking_id: Uuid,
    pub status: String,
}

pub async fn public_cancel_booking(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<BookingTokenRequest>,
) -> AppResult<Json<CancelBookingResponse>> {
    let booking_id = decode_booking_token(&payload.token)?;
    let mut tx = pool.begin().await?;
    cancel_in_tx(&mut *tx, booking_id).await?;
    tx.commit().await?;
    Ok(Json(CancelBookingResponse {
        booking_id,
        status: "canceled".into(),
    }))
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ProviderBooking {
    pub id: Uuid,
    pub slot_id: Uuid,
    pub slot_title: String,
    pub slot_start_at: DateTime<Utc>,
    pub customer_name: String,
    pub customer_email: String,
    pub status: String,
    pub fee_status: String,
    pub fee_cents: i32,
    pub invoice_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

pub async fn list_provider_bookings(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
) -> AppResult<Json<Vec<ProviderBooking>>> {
    let bookings = sqlx::query_as::<_, ProviderBooking>(
        r#"
        SELECT b.id, b.slot_id, s.title AS slot_title, s.start_at AS slot_start_at,
               b.customer_name, b.customer_email, b.status, b.fee_status, b.fee_cents,
               b.invoice_id, b.created_at, b.confirmed_at
        FROM bookings b
        JOIN slots s ON s.id = b.slot_id
        WHERE b.provider_id = $1
        ORDER BY s.start_at DESC
        "#,
    )
    .bind(caller.provider_id)
    .fetch_all(&pool)
    .await?;
    Ok(Json(bookings))
}

pub async fn provider_cancel_booking(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    Path(id): Path<Uuid>,
) -> AppResult<Json<CancelBookingResponse>> {
    let mut tx = pool.begin().await?;
    let booking = lock_booking(&mut *tx, id).await?;
    if booking.provider_id != caller.provider_id {
        return Err(AppError::BookingNotFound);
    }
    cancel_in_tx(&mut *tx, id).await?;
    tx.commit().await?;
    Ok(Json(CancelBookingResponse {
        booking_id: id,
        status: "canceled".into(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ExpireHoldsParams {
    pub minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ExpireHoldsResponse {
    pub expired: u64,
    pub cutoff: DateTime<Utc>,
}

pub async fn admin_expire_holds(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    Query(params): Query<ExpireHoldsParams>,
) -> AppResult<Json<ExpireHoldsResponse>> {
    let caps = Capabilities::resolve(&pool, &caller).await?;
    caps.require_admin()?;
    let minutes = params.minutes.unwrap_or(*config::BOOKING_HOLD_TTL_MIN);
    if minutes <= 0 {
        return Err(AppError::BadRequest("minutes must be positive".into()));
    }
    let cutoff = Utc::now() - Duration::minutes(minutes);
    let expired = expire_stale_holds(&pool, cutoff).await?;
    tracing::info!(expired, %cutoff, "expired stale holds");
    Ok(Json(ExpireHoldsResponse { expired, cutoff }))
}

#[derive(Debug, Serialize, Deserialize)]
struct BookingTokenClaims {
    sub: String,
    typ: String,
    iss: String,
    exp: usize,
}

/// Signs the confirm/cancel link token sent to the customer.
pub fn issue_booking_token(booking_id: Uuid) -> AppResult<String> {
    let expires = Utc::now() + Duration::hours(*config::BOOKING_TOKEN_TTL_HOURS);
    let claims = BookingTokenClaims {
        sub: booking_id.to_string(),
        typ: "booking".into(),
        iss: config::JWT_ISSUER.clone(),
        exp: expires.timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config::JWT_SECRET.as_bytes()),
    )
    .map_err(|error| AppError::Message(format!("failed to sign booking token: {error}")))
}

pub fn decode_booking_token(token: &str) -> AppResult<Uuid> {
    let mut validation = Validation::default();
    validation.set_issuer(&[config::JWT_ISSUER.as_str()]);
    let decoded = decode::<BookingTokenClaims>(
        token,
        &DecodingKey::from_secret(config::JWT_SECRET.as_bytes()),
        &validation,
    )
    .map_err(|_| AppError::InvalidToken)?;
    if decoded.claims.typ != "booking" {
        return Err(AppError::InvalidToken);
    }
    decoded
        .claims
        .sub
        .parse::<Uuid>()
        .map_err(|_| AppError::InvalidToken)
}
