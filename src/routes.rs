use axum::Router;

use crate::{billing, bookings, payments, providers, slots};

pub fn api_routes() -> Router {
    Router::new()
        .merge(slots::routes())
        .merge(bookings::routes())
        .merge(providers::routes())
        .merge(billing::routes())
        .merge(payments::routes())
}
