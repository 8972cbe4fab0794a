pub mod billing;
pub mod bookings;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod extractor;
pub mod mailer;
pub mod models;
pub mod payments;
pub mod providers;
pub mod routes;
pub mod slots;
