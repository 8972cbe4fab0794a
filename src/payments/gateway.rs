use axum::{
    body::Bytes,
    extract::Extension,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::bookings;
use crate::config;
use crate::error::{AppError, AppResult};

use super::signature;

pub fn routes() -> Router {
    Router::new()
        .route("/webhooks/stripe", post(stripe_webhook))
        .route("/webhooks/copecart", post(copecart_webhook))
}

/// key: payment-gateway -> webhook ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDisposition {
    Accepted,
    AlreadyProcessed,
    Ignored,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub disposition: EventDisposition,
    pub event_key: String,
    pub booking_id: Option<Uuid>,
}

/// Ledger row for a consumed payment event. Append-only.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProcessedEvent {
    pub id: Uuid,
    pub provider_name: String,
    pub event_key: String,
    pub event_type: String,
    pub booking_id: Uuid,
    pub outcome: String,
    pub received_at: DateTime<Utc>,
}

/// Provider-independent shape both webhook parsers normalize into.
#[derive(Debug, Clone)]
struct NormalizedEvent {
    provider_name: &'static str,
    event_key: String,
    event_type: String,
    booking_id: Option<Uuid>,
    completes_payment: bool,
}

pub async fn stripe_webhook(
    Extension(pool): Extension<PgPool>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookResponse>> {
    let Some(secret) = config::STRIPE_WEBHOOK_SECRET.as_ref() else {
        return Err(AppError::WebhookNotConfigured);
    };
    let header = headers
        .get("Stripe-Signature")
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::InvalidSignature)?;
    signature::verify_timestamped(secret, header, &body, Utc::now().timestamp())?;

    let event = parse_stripe_event(&body)?;
    apply_event(&pool, event).await
}

pub async fn copecart_webhook(
    Extension(pool): Extension<PgPool>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookResponse>> {
    let Some(secret) = config::COPECART_WEBHOOK_SECRET.as_ref() else {
        return Err(AppError::WebhookNotConfigured);
    };
    let header = headers
        .get("X-Copecart-Signature")
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::InvalidSignature)?;
    signature::verify_base64(secret, header, &body)?;

    let event = parse_copecart_event(&body)?;
    apply_event(&pool, event).await
}

fn parse_stripe_event(payload: &[u8]) -> AppResult<NormalizedEvent> {
    let event: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|_| AppError::BadRequest("invalid webhook payload".into()))?;
    let event_type = event["type"].as_str().unwrap_or_default().to_string();
    let object = &event["data"]["object"];

    // Checkout sessions and payment intents for the same payment must
    // collapse onto one key, so the payment intent id wins when present.
    let event_key = object["payment_intent"]
        .as_str()
        .or_else(|| object["id"].as_str())
        .unwrap_or_default()
        .to_string();
    if event_key.is_empty() {
        return Err(AppError::BadRequest("missing event identifier".into()));
    }

    let booking_id = object["metadata"]["booking_id"]
        .as_str()
        .and_then(|raw| Uuid::parse_str(raw).ok());
    let completes_payment = matches!(
        event_type.as_str(),
        "checkout.session.completed" | "payment_intent.succeeded"
    );

    Ok(NormalizedEvent {
        provider_name: "stripe",
        event_key,
        event_type,
        booking_id,
        completes_payment,
    })
}

fn parse_copecart_event(payload: &[u8]) -> AppResult<NormalizedEvent> {
    let event: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|_| AppError::BadRequest("invalid webhook payload".into()))?;
    let event_type = event["event"].as_str().unwrap_or_default().to_string();

    let event_key = event["transaction_id"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    if event_key.is_empty() {
        return Err(AppError::BadRequest("missing event identifier".into()));
    }

    let booking_id = event["metadata"]["booking_id"]
        .as_str()
        .or_else(|| event["subid"].as_str())
        .and_then(|raw| Uuid::parse_str(raw).ok());
    let completes_payment = matches!(event_type.as_str(), "sale" | "payment.completed");

    Ok(NormalizedEvent {
        provider_name: "copecart",
        event_key,
        event_type,
        booking_id,
        completes_payment,
    })
}

/// Confirms the referenced booking and records the event in one transaction.
/// An unknown booking is NOT ledgered, so the sender's retry can succeed once
/// the booking exists.
async fn apply_event(pool: &PgPool, event: NormalizedEvent) -> AppResult<Json<WebhookResponse>> {
    if !event.completes_payment {
        tracing::debug!(
            provider = event.provider_name,
            event_type = %event.event_type,
            "ignoring non-completion event"
        );
        return Ok(Json(WebhookResponse {
            disposition: EventDisposition::Ignored,
            event_key: event.event_key,
            booking_id: None,
        }));
    }
    let Some(booking_id) = event.booking_id else {
        return Err(AppError::BadRequest("missing booking reference".into()));
    };

    let mut tx = pool.begin().await?;

    let prior = sqlx::query_as::<_, ProcessedEvent>(
        "SELECT * FROM payment_events WHERE provider_name = $1 AND event_key = $2",
    )
    .bind(event.provider_name)
    .bind(&event.event_key)
    .fetch_optional(&mut *tx)
    .await?;
    if let Some(prior) = prior {
        tracing::info!(
            provider = event.provider_name,
            event_key = %event.event_key,
            "replayed payment event"
        );
        return Ok(Json(WebhookResponse {
            disposition: EventDisposition::AlreadyProcessed,
            event_key: event.event_key,
            booking_id: Some(prior.booking_id),
        }));
    }

    let outcome = bookings::confirm_in_tx(&mut *tx, booking_id)
        .await
        .map_err(|error| {
            if matches!(error, AppError::BookingNotFound) {
                tracing::warn!(
                    provider = event.provider_name,
                    event_key = %event.event_key,
                    %booking_id,
                    "payment event references an unknown booking"
                );
            }
            error
        })?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO payment_events (id, provider_name, event_key, event_type, booking_id, outcome)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (provider_name, event_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(event.provider_name)
    .bind(&event.event_key)
    .bind(&event.event_type)
    .bind(booking_id)
    .bind(outcome.as_str())
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() == 0 {
        // Concurrent delivery of the same event won the insert.
        tx.rollback().await?;
        return Ok(Json(WebhookResponse {
            disposition: EventDisposition::AlreadyProcessed,
            event_key: event.event_key,
            booking_id: Some(booking_id),
        }));
    }

    tx.commit().await?;
    tracing::info!(
        provider = event.provider_name,
        event_key = %event.event_key,
        %booking_id,
        outcome = outcome.as_str(),
        "payment event consumed"
    );
    Ok(Json(WebhookResponse {
        disposition: EventDisposition::Accepted,
        event_key: event.event_key,
        booking_id: Some(booking_id),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripe_checkout_session_normalizes_on_payment_intent() {
        let booking_id = Uuid::new_v4();
        let payload = serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_123",
                "payment_intent": "pi_test_456",
                "metadata": { "booking_id": booking_id.to_string() }
            }}
        });
        let event = parse_stripe_event(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.provider_name, "stripe");
        assert_eq!(event.event_key, "pi_test_456");
        assert_eq!(event.booking_id, Some(booking_id));
        assert!(event.completes_payment);
    }

    #[test]
    fn stripe_object_id_is_the_fallback_key() {
        let payload = serde_json::json!({
            "type": "payment_intent.created",
            "data": { "object": { "id": "pi_test_789", "metadata": {} } }
        });
        let event = parse_stripe_event(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.event_key, "pi_test_789");
        assert!(!event.completes_payment);
        assert_eq!(event.booking_id, None);
    }

    #[test]
    fn stripe_event_without_identifier_rejected() {
        let payload = serde_json::json!({
            "type": "payment_intent.succeeded",
            "data": { "object": { "metadata": {} } }
        });
        assert!(parse_stripe_event(payload.to_string().as_bytes()).is_err());
    }

    #[test]
    fn copecart_subid_is_the_booking_fallback() {
        let booking_id = Uuid::new_v4();
        let payload = serde_json::json!({
            "event": "sale",
            "transaction_id": "tx_100",
            "subid": booking_id.to_string()
        });
        let event = parse_copecart_event(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.provider_name, "copecart");
        assert_eq!(event.event_key, "tx_100");
        assert_eq!(event.booking_id, Some(booking_id));
        assert!(event.completes_payment);
    }

    #[test]
    fn copecart_metadata_booking_id_wins_over_subid() {
        let in_metadata = Uuid::new_v4();
        let in_subid = Uuid::new_v4();
        let payload = serde_json::json!({
            "event": "payment.completed",
            "transaction_id": "tx_101",
            "subid": in_subid.to_string(),
            "metadata": { "booking_id": in_metadata.to_string() }
        });
        let event = parse_copecart_event(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.booking_id, Some(in_metadata));
    }

    #[test]
    fn copecart_refund_does_not_complete_payment() {
        let payload = serde_json::json!({
            "event": "refund",
            "transaction_id": "tx_102"
        });
        let event = parse_copecart_event(payload.to_string().as_bytes()).unwrap();
        assert!(!event.completes_payment);
    }
}
