pub mod api;
pub mod models;
pub mod service;

pub use api::routes;
pub use models::{BillingOverview, BillingOverviewEntry, BillingRunItem, BillingRunSummary, Invoice};
pub use service::{month_bounds, previous_month, BillingService};
