use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// Clock skew allowed on timestamped signatures.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

fn mac_for(secret: &str) -> AppResult<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AppError::InvalidSignature)
}

/// Parses a `t=<unix>,v1=<hex>` signature header. Extra pairs are ignored;
/// only the first `v1` counts.
pub fn parse_timestamped_header(header: &str) -> AppResult<(i64, Vec<u8>)> {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" if signature.is_none() => signature = hex::decode(value).ok(),
            _ => {}
        }
    }
    match (timestamp, signature) {
        (Some(timestamp), Some(signature)) => Ok((timestamp, signature)),
        _ => Err(AppError::InvalidSignature),
    }
}

/// Verifies an HMAC-SHA256 over `"{t}.{payload}"` and rejects timestamps
/// outside the tolerance window in either direction.
pub fn verify_timestamped(secret: &str, header: &str, payload: &[u8], now: i64) -> AppResult<()> {
    let (timestamp, signature) = parse_timestamped_header(header)?;
    if (now - timestamp).abs() > TIMESTAMP_TOLERANCE_SECS {
        return Err(AppError::InvalidSignature);
    }
    let mut mac = mac_for(secret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.verify_slice(&signature)
        .map_err(|_| AppError::InvalidSignature)
}

/// Verifies a base64 HMAC-SHA256 over the raw request body.
pub fn verify_base64(secret: &str, signature: &str, payload: &[u8]) -> AppResult<()> {
    let decoded = BASE64
        .decode(signature.trim())
        .map_err(|_| AppError::InvalidSignature)?;
    let mut mac = mac_for(secret)?;
    mac.update(payload);
    mac.verify_slice(&decoded)
        .map_err(|_| AppError::InvalidSignature)
}

pub fn sign_timestamped(secret: &str, timestamp: i64, payload: &[u8]) -> AppResult<String> {
    let mut mac = mac_for(secret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let digest = hex::encode(mac.finalize().into_bytes());
    Ok(format!("t={timestamp},v1={digest}"))
}

pub fn sign_base64(secret: &str, payload: &[u8]) -> AppResult<String> {
    let mut mac = mac_for(secret)?;
    mac.update(payload);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}
