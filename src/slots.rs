use axum::{
    extract::{Extension, Path, Query},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::capabilities::Capabilities;
use crate::config;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthProvider;
use crate::models::{Slot, SlotCategory};

pub fn routes() -> Router {
    Router::new()
        .route("/public/slots", get(public_list_slots))
        .route("/api/slots", get(list_my_slots).post(create_slot))
        .route("/api/slots/:id", put(update_slot).delete(delete_slot))
        .route("/api/slots/:id/submit", post(submit_slot))
        .route("/api/slots/:id/archive", post(archive_slot))
        .route("/admin/slots/:id/publish", post(admin_publish_slot))
        .route("/admin/slots/:id/reject", post(admin_reject_slot))
}

#[derive(Debug, Deserialize)]
pub struct PublicSlotsParams {
    pub category: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
}

/// Public search over published, future slots.
pub async fn public_list_slots(
    Extension(pool): Extension<PgPool>,
    Query(params): Query<PublicSlotsParams>,
) -> AppResult<Json<Vec<Slot>>> {
    if let Some(category) = params.category.as_deref() {
        if SlotCategory::parse(category).is_none() {
            return Err(AppError::BadRequest(format!("unknown category {category}")));
        }
    }

    let slots = sqlx::query_as::<_, Slot>(
        r#"
        SELECT * FROM slots
        WHERE status = 'published'
          AND start_at > NOW()
          AND ($1::text IS NULL OR category = $1)
          AND ($2::text IS NULL OR city = $2)
          AND ($3::text IS NULL OR zip = $3)
        ORDER BY start_at ASC
        LIMIT 200
        "#,
    )
    .bind(params.category)
    .bind(params.city)
    .bind(params.zip)
    .fetch_all(&pool)
    .await?;
    Ok(Json(slots))
}

pub async fn list_my_slots(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
) -> AppResult<Json<Vec<Slot>>> {
    let slots = sqlx::query_as::<_, Slot>(
        "SELECT * FROM slots WHERE provider_id = $1 ORDER BY start_at DESC",
    )
    .bind(caller.provider_id)
    .fetch_all(&pool)
    .await?;
    Ok(Json(slots))
}

#[derive(Debug, Deserialize)]
pub struct SlotPayload {
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
}

#[derive(Debug, Deserialize)]
pub struct CreateSlotRequest {
    #[serde(flatten)]
    pub slot: SlotPayload,
    pub status: Option<String>,
}

fn validate_slot_payload(payload: &SlotPayload) -> AppResult<()> {
    if payload.title.trim().is_empty() {
        return Err(AppError::BadRequest("title is required".into()));
    }
    if SlotCategory::parse(&payload.category).is_none() {
        return Err(AppError::BadRequest(format!(
            "unknown category {}",
            payload.category
        )));
    }
    if payload.end_at <= payload.start_at {
        return Err(AppError::BadRequest("end_at must be after start_at".into()));
    }
    if payload.start_at <= Utc::now() {
        return Err(AppError::BadRequest("slot must start in the future".into()));
    }
    if payload.capacity < 1 {
        return Err(AppError::BadRequest("capacity must be at least 1".into()));
    }
    if matches!(payload.price_cents, Some(price) if price < 0) {
        return Err(AppError::BadRequest("price_cents must not be negative".into()));
    }
    Ok(())
}

pub async fn create_slot(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    Json(payload): Json<CreateSlotRequest>,
) -> AppResult<Json<Slot>> {
    let caps = Capabilities::resolve(&pool, &caller).await?;
    caps.require_approved()?;
    validate_slot_payload(&payload.slot)?;

    let status = payload.status.as_deref().unwrap_or("pending_review");
    if status != "draft" && status != "pending_review" {
        return Err(AppError::BadRequest(format!(
            "status must be draft or pending_review, got {status}"
        )));
    }

    let open: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM slots WHERE provider_id = $1 AND status != 'archived'",
    )
    .bind(caller.provider_id)
    .fetch_one(&pool)
    .await?;
    if open >= *config::MAX_OPEN_SLOTS_PER_PROVIDER {
        return Err(AppError::SlotQuotaReached);
    }

    let slot = sqlx::query_as::<_, Slot>(
        r#"
        INSERT INTO slots (id, provider_id, title, category, description, location, zip, city,
                           start_at, end_at, capacity, price_cents, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(caller.provider_id)
    .bind(payload.slot.title.trim())
    .bind(&payload.slot.category)
    .bind(&payload.slot.description)
    .bind(&payload.slot.location)
    .bind(&payload.slot.zip)
    .bind(&payload.slot.city)
    .bind(payload.slot.start_at)
    .bind(payload.slot.end_at)
    .bind(payload.slot.capacity)
    .bind(payload.slot.price_cents)
    .bind(status)
    .fetch_one(&pool)
    .await?;
    Ok(Json(slot))
}

async fn load_own_slot(pool: &PgPool, slot_id: Uuid, provider_id: Uuid) -> AppResult<Slot> {
    sqlx::query_as::<_, Slot>("SELECT * FROM slots WHERE id = $1 AND provider_id = $2")
        .bind(slot_id)
        .bind(provider_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound)
}

async fn load_slot(pool: &PgPool, slot_id: Uuid) -> AppResult<Slot> {
    sqlx::query_as::<_, Slot>("SELECT * FROM slots WHERE id = $1")
        .bind(slot_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound)
}

/// Full replace of the editable fields. Only unpublished slots can change.
pub async fn update_slot(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    Path(id): Path<Uuid>,
    Json(payload): Json<SlotPayload>,
) -> AppResult<Json<Slot>> {
    let slot = load_own_slot(&pool, id, caller.provider_id).await?;
    if slot.status != "draft" && slot.status != "pending_review" {
        return Err(AppError::InvalidStateTransition);
    }
    validate_slot_payload(&payload)?;

    let slot = sqlx::query_as::<_, Slot>(
        r#"
        UPDATE slots
        SET title = $2, category = $3, description = $4, location = $5, zip = $6, city = $7,
            start_at = $8, end_at = $9, capacity = $10, price_cents = $11
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(payload.title.trim())
    .bind(&payload.category)
    .bind(&payload.description)
    .bind(&payload.location)
    .bind(&payload.zip)
    .bind(&payload.city)
    .bind(payload.start_at)
    .bind(payload.end_at)
    .bind(payload.capacity)
    .bind(payload.price_cents)
    .fetch_one(&pool)
    .await?;
    Ok(Json(slot))
}

/// Slots that were never published carry no bookings and can be removed
/// outright; everything else must be archived instead.
pub async fn delete_slot(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let slot = load_own_slot(&pool, id, caller.provider_id).await?;
    if slot.status != "draft" && slot.status != "pending_review" {
        return Err(AppError::InvalidStateTransition);
    }
    sqlx::query("DELETE FROM slots WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

pub async fn submit_slot(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Slot>> {
    let slot = load_own_slot(&pool, id, caller.provider_id).await?;
    if slot.status != "draft" {
        return Err(AppError::InvalidStateTransition);
    }
    let slot = set_slot_status(&pool, id, "pending_review").await?;
    Ok(Json(slot))
}

pub async fn archive_slot(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Slot>> {
    let slot = load_own_slot(&pool, id, caller.provider_id).await?;
    if slot.status == "archived" {
        return Err(AppError::InvalidStateTransition);
    }
    let slot = set_slot_status(&pool, id, "archived").await?;
    Ok(Json(slot))
}

pub async fn admin_publish_slot(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Slot>> {
    let caps = Capabilities::resolve(&pool, &caller).await?;
    caps.require_admin()?;
    let slot = load_slot(&pool, id).await?;
    if slot.status != "pending_review" {
        return Err(AppError::InvalidStateTransition);
    }
    let slot = set_slot_status(&pool, id, "published").await?;
    tracing::info!(slot_id = %id, provider_id = %slot.provider_id, "slot published");
    Ok(Json(slot))
}

pub async fn admin_reject_slot(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Slot>> {
    let caps = Capabilities::resolve(&pool, &caller).await?;
    caps.require_admin()?;
    let slot = load_slot(&pool, id).await?;
    if slot.status != "pending_review" {
        return Err(AppError::InvalidStateTransition);
    }
    let slot = set_slot_status(&pool, id, "archived").await?;
    tracing::info!(slot_id = %id, provider_id = %slot.provider_id, "slot rejected");
    Ok(Json(slot))
}

async fn set_slot_status(pool: &PgPool, slot_id: Uuid, status: &str) -> AppResult<Slot> {
    let slot = sqlx::query_as::<_, Slot>("UPDATE slots SET status = $2 WHERE id = $1 RETURNING *")
        .bind(slot_id)
        .bind(status)
        .fetch_one(pool)
        .await?;
    Ok(slot)
}
