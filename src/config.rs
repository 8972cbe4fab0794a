use once_cell::sync::Lazy;

/// Secret used for JWT signing. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// Issuer expected in auth and booking-link tokens. Defaults to `terminmarkt`.
pub static JWT_ISSUER: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_ISSUER").unwrap_or_else(|_| "terminmarkt".to_string()));

/// Audience expected in auth tokens. Defaults to `terminmarkt-web`.
pub static JWT_AUDIENCE: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "terminmarkt-web".to_string()));

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// Base URL used when rendering confirm/cancel links in customer mail.
pub static BASE_URL: Lazy<String> = Lazy::new(|| {
    std::env::var("BASE_URL")
        .ok()
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "http://localhost:3000".to_string())
});

/// key: booking-config -> minutes a hold stays claimable before it expires
pub static BOOKING_HOLD_TTL_MIN: Lazy<i64> = Lazy::new(|| {
    std::env::var("BOOKING_HOLD_TTL_MIN")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(15)
});

/// key: booking-config -> lifetime of signed confirm/cancel link tokens
pub static BOOKING_TOKEN_TTL_HOURS: Lazy<i64> = Lazy::new(|| {
    std::env::var("BOOKING_TOKEN_TTL_HOURS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(6)
});

/// key: booking-config -> non-archived slots a provider may keep at once
pub static MAX_OPEN_SLOTS_PER_PROVIDER: Lazy<i64> = Lazy::new(|| {
    std::env::var("MAX_OPEN_SLOTS_PER_PROVIDER")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(200)
});

/// Shared secret for verifying card-processor webhook signatures. The endpoint
/// answers 501 while this is unset.
pub static STRIPE_WEBHOOK_SECRET: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("STRIPE_WEBHOOK_SECRET"));

/// Shared secret for verifying marketplace-processor webhook signatures. The
/// endpoint answers 501 while this is unset.
pub static COPECART_WEBHOOK_SECRET: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("COPECART_WEBHOOK_SECRET"));

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
