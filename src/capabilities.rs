use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthProvider;

/// Capability set resolved for one caller against the provider store. Billing
/// and admin operations take this value as an argument; nothing in the
/// service consults an ambient admin flag.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub provider_id: Uuid,
    pub admin: bool,
    pub approved: bool,
}

#[derive(sqlx::FromRow)]
struct CapabilityRow {
    status: String,
    is_admin: bool,
}

impl Capabilities {
    /// Looks up the caller's provider row. The admin flag in the token is
    /// ignored; the store is authoritative.
    pub async fn resolve(pool: &PgPool, caller: &AuthProvider) -> AppResult<Capabilities> {
        let row = sqlx::query_as::<_, CapabilityRow>(
            "SELECT status, is_admin FROM providers WHERE id = $1",
        )
        .bind(caller.provider_id)
        .fetch_optional(pool)
        .await?;
        let Some(row) = row else {
            return Err(AppError::Unauthorized);
        };
        Ok(Capabilities {
            provider_id: caller.provider_id,
            admin: row.is_admin,
            approved: row.status == "approved",
        })
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.admin {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    pub fn require_approved(&self) -> AppResult<()> {
        if self.approved {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }
}
