// key: billing-tests -> monthly runs,invoices,idempotence
use axum::extract::{Path, Query};
use axum::{Extension, Json};
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use terminmarkt::billing::api::{
    admin_archive_invoice, admin_billing_overview, admin_get_invoice, admin_mark_invoice_exported,
    admin_run_billing, BillingPeriodParams,
};
use terminmarkt::billing::{month_bounds, previous_month, BillingService};
use terminmarkt::error::AppError;
use terminmarkt::extractor::AuthProvider;

async fn seed_provider(pool: &PgPool, email: &str, is_admin: bool) -> Uuid {
    sqlx::query_scalar(
        "INSERT INTO providers (id, email, name, status, is_admin, booking_fee_cents) VALUES ($1, $2, 'Studio', 'approved', $3, 100) RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(is_admin)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn seed_slot(pool: &PgPool, provider_id: Uuid) -> Uuid {
    let start = Utc::now() + Duration::days(30);
    sqlx::query_scalar(
        r#"
        INSERT INTO slots (id, provider_id, title, category, start_at, end_at, capacity, status)
        VALUES ($1, $2, 'Massage', 'Massage', $3, $4, 10, 'published')
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(provider_id)
    .bind(start)
    .bind(start + Duration::minutes(60))
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn seed_booking(
    pool: &PgPool,
    slot_id: Uuid,
    provider_id: Uuid,
    email: &str,
    status: &str,
    fee_status: &str,
    fee_cents: i32,
    created_at: DateTime<Utc>,
) -> Uuid {
    sqlx::query_scalar(
        r#"
        INSERT INTO bookings (id, slot_id, provider_id, customer_name, customer_email, status, fee_status, fee_cents, created_at, confirmed_at)
        VALUES ($1, $2, $3, 'Kunde', $4, $5, $6, $7, $8, CASE WHEN $5 = 'confirmed' THEN $8 ELSE NULL END)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(slot_id)
    .bind(provider_id)
    .bind(email)
    .bind(status)
    .bind(fee_status)
    .bind(fee_cents)
    .bind(created_at)
    .fetch_one(pool)
    .await
    .unwrap()
}

fn admin(provider_id: Uuid) -> AuthProvider {
    AuthProvider {
        provider_id,
        admin: true,
    }
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn run_invoices_each_provider_in_its_own_group(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let provider_a = seed_provider(&pool, "a@example.com", false).await;
    let provider_b = seed_provider(&pool, "b@example.com", false).await;
    let slot_a = seed_slot(&pool, provider_a).await;
    let slot_b = seed_slot(&pool, provider_b).await;

    let (start, _) = month_bounds(2026, 7).unwrap();
    let inside = start + Duration::days(10);
    seed_booking(&pool, slot_a, provider_a, "k1@example.com", "confirmed", "open", 100, inside).await;
    seed_booking(&pool, slot_a, provider_a, "k2@example.com", "confirmed", "open", 100, inside).await;
    seed_booking(&pool, slot_b, provider_b, "k3@example.com", "confirmed", "open", 250, inside).await;

    let (period_start, period_end) = month_bounds(2026, 7).unwrap();
    let summary = BillingService::new(pool.clone())
        .run_billing(period_start, period_end)
        .await
        .unwrap();

    assert_eq!(summary.invoices_created, 2);
    assert!(summary.failed_providers.is_empty());

    let for_a = summary
        .items
        .iter()
        .find(|item| item.provider_id == provider_a)
        .expect("provider a invoiced");
    assert_eq!(for_a.booking_count, 2);
    assert_eq!(for_a.total_fee_cents, 200);

    let for_b = summary
        .items
        .iter()
        .find(|item| item.provider_id == provider_b)
        .expect("provider b invoiced");
    assert_eq!(for_b.booking_count, 1);
    assert_eq!(for_b.total_fee_cents, 250);

    let open_left: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM bookings WHERE fee_status = 'open' AND status = 'confirmed'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(open_left, 0, "billed bookings flip to invoiced");

    let linked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM bookings WHERE invoice_id = $1",
    )
    .bind(for_a.invoice_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(linked, 2);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn rerun_creates_nothing_and_reports_zero_entries(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let provider_id = seed_provider(&pool, "rerun@example.com", false).await;
    let slot_id = seed_slot(&pool, provider_id).await;

    let (period_start, period_end) = month_bounds(2026, 7).unwrap();
    seed_booking(
        &pool,
        slot_id,
        provider_id,
        "k@example.com",
        "confirmed",
        "open",
        100,
        period_start + Duration::days(3),
    )
    .await;

    let service = BillingService::new(pool.clone());
    let first = service.run_billing(period_start, period_end).await.unwrap();
    assert_eq!(first.invoices_created, 1);
    let invoice_id = first.items[0].invoice_id;

    let second = service.run_billing(period_start, period_end).await.unwrap();
    assert_eq!(second.invoices_created, 0);
    assert_eq!(second.items.len(), 1, "the existing invoice still shows up");
    assert_eq!(second.items[0].invoice_id, invoice_id);
    assert_eq!(second.items[0].booking_count, 0);
    assert_eq!(second.items[0].total_fee_cents, 0);

    let invoice_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoices")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(invoice_count, 1, "reruns must not duplicate invoices");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn period_boundaries_are_half_open(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let provider_id = seed_provider(&pool, "bounds@example.com", false).await;
    let slot_id = seed_slot(&pool, provider_id).await;

    let first_instant = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
    let last_instant = Utc.with_ymd_and_hms(2026, 7, 31, 23, 59, 59).unwrap();
    let next_month = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
    let month_before = Utc.with_ymd_and_hms(2026, 6, 30, 23, 59, 59).unwrap();

    seed_booking(&pool, slot_id, provider_id, "k1@e.de", "confirmed", "open", 100, first_instant).await;
    seed_booking(&pool, slot_id, provider_id, "k2@e.de", "confirmed", "open", 100, last_instant).await;
    seed_booking(&pool, slot_id, provider_id, "k3@e.de", "confirmed", "open", 100, next_month).await;
    seed_booking(&pool, slot_id, provider_id, "k4@e.de", "confirmed", "open", 100, month_before).await;

    let (period_start, period_end) = month_bounds(2026, 7).unwrap();
    let summary = BillingService::new(pool.clone())
        .run_billing(period_start, period_end)
        .await
        .unwrap();

    assert_eq!(summary.invoices_created, 1);
    assert_eq!(summary.items[0].booking_count, 2);
    assert_eq!(summary.items[0].total_fee_cents, 200);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn only_open_confirmed_fees_are_picked_up(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let provider_id = seed_provider(&pool, "filter@example.com", false).await;
    let slot_id = seed_slot(&pool, provider_id).await;

    let (period_start, period_end) = month_bounds(2026, 7).unwrap();
    let inside = period_start + Duration::days(5);
    seed_booking(&pool, slot_id, provider_id, "billable@e.de", "confirmed", "open", 100, inside).await;
    seed_booking(&pool, slot_id, provider_id, "hold@e.de", "hold", "open", 100, inside).await;
    seed_booking(&pool, slot_id, provider_id, "gone@e.de", "canceled", "open", 100, inside).await;
    seed_booking(&pool, slot_id, provider_id, "old@e.de", "confirmed", "invoiced", 100, inside).await;

    let summary = BillingService::new(pool.clone())
        .run_billing(period_start, period_end)
        .await
        .unwrap();

    assert_eq!(summary.invoices_created, 1);
    assert_eq!(summary.items[0].booking_count, 1);
    assert_eq!(summary.items[0].total_fee_cents, 100);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn overview_projects_exactly_what_the_run_invoices(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let provider_a = seed_provider(&pool, "ova@example.com", false).await;
    let provider_b = seed_provider(&pool, "ovb@example.com", false).await;
    let slot_a = seed_slot(&pool, provider_a).await;
    let slot_b = seed_slot(&pool, provider_b).await;

    let (period_start, period_end) = month_bounds(2026, 7).unwrap();
    let inside = period_start + Duration::days(12);
    seed_booking(&pool, slot_a, provider_a, "k1@e.de", "confirmed", "open", 100, inside).await;
    seed_booking(&pool, slot_a, provider_a, "k2@e.de", "confirmed", "open", 100, inside).await;
    seed_booking(&pool, slot_b, provider_b, "k3@e.de", "confirmed", "open", 300, inside).await;
    seed_booking(&pool, slot_b, provider_b, "k4@e.de", "hold", "open", 300, inside).await;

    let service = BillingService::new(pool.clone());
    let overview = service
        .billing_overview(period_start, period_end)
        .await
        .unwrap();
    assert_eq!(overview.entries.len(), 2);
    assert_eq!(overview.grand_total_cents, 500);

    let summary = service.run_billing(period_start, period_end).await.unwrap();
    for entry in &overview.entries {
        let item = summary
            .items
            .iter()
            .find(|item| item.provider_id == entry.provider_id)
            .expect("every projected provider is invoiced");
        assert_eq!(item.booking_count, entry.booking_count);
        assert_eq!(item.total_fee_cents, entry.total_fee_cents);
    }

    let after = service
        .billing_overview(period_start, period_end)
        .await
        .unwrap();
    assert!(after.entries.is_empty(), "nothing left to project after the run");
    assert_eq!(after.grand_total_cents, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn run_defaults_to_the_previous_calendar_month(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let admin_id = seed_provider(&pool, "admin@example.com", true).await;
    let provider_id = seed_provider(&pool, "default@example.com", false).await;
    let slot_id = seed_slot(&pool, provider_id).await;

    let (year, month) = previous_month(Utc::now());
    let (period_start, period_end) = month_bounds(year, month).unwrap();
    seed_booking(
        &pool,
        slot_id,
        provider_id,
        "k@e.de",
        "confirmed",
        "open",
        100,
        period_start + Duration::days(1),
    )
    .await;

    let Json(summary) = admin_run_billing(Extension(pool.clone()), admin(admin_id), None)
        .await
        .expect("admin runs billing without a body");
    assert_eq!(summary.period_start, period_start);
    assert_eq!(summary.period_end, period_end);
    assert_eq!(summary.invoices_created, 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn billing_endpoints_require_admin(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let provider_id = seed_provider(&pool, "plain@example.com", false).await;
    let caller = AuthProvider {
        provider_id,
        admin: false,
    };

    let run = admin_run_billing(Extension(pool.clone()), caller, None).await;
    assert!(matches!(run, Err(AppError::Forbidden)));

    let overview = admin_billing_overview(
        Extension(pool.clone()),
        AuthProvider {
            provider_id,
            admin: false,
        },
        Query(BillingPeriodParams {
            year: Some(2026),
            month: Some(7),
        }),
    )
    .await;
    assert!(matches!(overview, Err(AppError::Forbidden)));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn invoice_export_and_archive_transitions(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let admin_id = seed_provider(&pool, "admin@example.com", true).await;
    let provider_id = seed_provider(&pool, "tx@example.com", false).await;
    let slot_id = seed_slot(&pool, provider_id).await;

    let (period_start, period_end) = month_bounds(2026, 7).unwrap();
    let booking_id = seed_booking(
        &pool,
        slot_id,
        provider_id,
        "k@e.de",
        "confirmed",
        "open",
        100,
        period_start + Duration::days(2),
    )
    .await;

    let summary = BillingService::new(pool.clone())
        .run_billing(period_start, period_end)
        .await
        .unwrap();
    let invoice_id = summary.items[0].invoice_id;

    let Json(detail) = admin_get_invoice(
        Extension(pool.clone()),
        admin(admin_id),
        Path(invoice_id),
    )
    .await
    .expect("invoice detail");
    assert_eq!(detail.invoice.status, "open");
    assert_eq!(detail.bookings.len(), 1);
    assert_eq!(detail.bookings[0].id, booking_id);

    let Json(exported) = admin_mark_invoice_exported(
        Extension(pool.clone()),
        admin(admin_id),
        Path(invoice_id),
    )
    .await
    .expect("open invoice exports");
    assert_eq!(exported.status, "exported");
    let exported_at = exported.exported_at.expect("export timestamp set");

    let Json(again) = admin_mark_invoice_exported(
        Extension(pool.clone()),
        admin(admin_id),
        Path(invoice_id),
    )
    .await
    .expect("re-marking is a no-op");
    assert_eq!(again.exported_at, Some(exported_at));

    let Json(archived) = admin_archive_invoice(
        Extension(pool.clone()),
        admin(admin_id),
        Path(invoice_id),
    )
    .await
    .expect("archive");
    assert_eq!(archived.status, "archived");

    let blocked = admin_mark_invoice_exported(
        Extension(pool.clone()),
        admin(admin_id),
        Path(invoice_id),
    )
    .await;
    assert!(matches!(blocked, Err(AppError::InvalidStateTransition)));
}
