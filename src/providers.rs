use axum::{
    extract::{Extension, Path, Query},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::capabilities::Capabilities;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthProvider;
use crate::models::Provider;

pub fn routes() -> Router {
    Router::new()
        .route("/api/me", get(me))
        .route("/admin/providers", get(admin_list_providers))
        .route("/admin/providers/backfill_numbers", post(admin_backfill_numbers))
        .route("/admin/providers/:id/approve", post(admin_approve_provider))
        .route("/admin/providers/:id/reject", post(admin_reject_provider))
}

pub async fn me(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
) -> AppResult<Json<Provider>> {
    let provider = sqlx::query_as::<_, Provider>("SELECT * FROM providers WHERE id = $1")
        .bind(caller.provider_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::Unauthorized)?;
    Ok(Json(provider))
}

#[derive(Debug, Deserialize)]
pub struct ProviderListParams {
    pub status: Option<String>,
}

pub async fn admin_list_providers(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    Query(params): Query<ProviderListParams>,
) -> AppResult<Json<Vec<Provider>>> {
    let caps = Capabilities::resolve(&pool, &caller).await?;
    caps.require_admin()?;
    let providers = sqlx::query_as::<_, Provider>(
        "SELECT * FROM providers WHERE ($1::text IS NULL OR status = $1) ORDER BY created_at ASC",
    )
    .bind(params.status)
    .fetch_all(&pool)
    .await?;
    Ok(Json(providers))
}

/// Approval also hands out the provider's billing number. Approving an
/// already approved provider changes nothing.
pub async fn admin_approve_provider(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Provider>> {
    let caps = Capabilities::resolve(&pool, &caller).await?;
    caps.require_admin()?;

    let mut tx = pool.begin().await?;
    let provider = sqlx::query_as::<_, Provider>("SELECT * FROM providers WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(provider) = provider else {
        return Err(AppError::NotFound);
    };
    if provider.status == "approved" {
        return Ok(Json(provider));
    }

    // provider_number is assigned once and never reused; the unique index
    // backstops a concurrent assignment.
    let provider = sqlx::query_as::<_, Provider>(
        r#"
        UPDATE providers
        SET status = 'approved',
            provider_number = COALESCE(provider_number,
                (SELECT COALESCE(MAX(provider_number), 0) + 1 FROM providers))
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(provider_id = %id, provider_number = ?provider.provider_number, "provider approved");
    Ok(Json(provider))
}

pub async fn admin_reject_provider(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Provider>> {
    let caps = Capabilities::resolve(&pool, &caller).await?;
    caps.require_admin()?;

    let provider = sqlx::query_as::<_, Provider>("SELECT * FROM providers WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await?;
    let Some(provider) = provider else {
        return Err(AppError::NotFound);
    };
    match provider.status.as_str() {
        "rejected" => Ok(Json(provider)),
        "approved" => Err(AppError::InvalidStateTransition),
        _ => {
            let provider = sqlx::query_as::<_, Provider>(
                "UPDATE providers SET status = 'rejected' WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .fetch_one(&pool)
            .await?;
            tracing::info!(provider_id = %id, "provider rejected");
            Ok(Json(provider))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BackfillResponse {
    pub assigned: u64,
}

/// Assigns billing numbers to providers that predate number assignment, in
/// registration order. Safe to run repeatedly.
pub async fn admin_backfill_numbers(
    Extension(pool): Extension<PgPool>,
    caller: AuthProvider,
) -> AppResult<Json<BackfillResponse>> {
    let caps = Capabilities::resolve(&pool, &caller).await?;
    caps.require_admin()?;

    let result = sqlx::query(
        r#"
        WITH numbered AS (
            SELECT id, ROW_NUMBER() OVER (ORDER BY created_at, id) AS rn
            FROM providers
            WHERE provider_number IS NULL
        ), base AS (
            SELECT COALESCE(MAX(provider_number), 0) AS max_n FROM providers
        )
        UPDATE providers p
        SET provider_number = base.max_n + numbered.rn
        FROM numbered, base
        WHERE p.id = numbered.id
        "#,
    )
    .execute(&pool)
    .await?;

    let assigned = result.rows_affected();
    if assigned > 0 {
        tracing::info!(assigned, "backfilled provider numbers");
    }
    Ok(Json(BackfillResponse { assigned }))
}
