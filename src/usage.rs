//! Daily free-tier quotas and premium bypass.

use anyhow::Result;
use chrono::NaiveDateTime;
use sqlx::sqlite::SqlitePool;
use tracing::debug;

use crate::config::FreeLimits;
use crate::db::{self, RequestKind};

/// Outcome of charging one request against a user's quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    /// Admin or premium user, nothing was counted
    Unlimited,
    /// Within the free quota, the request has been counted
    Allowed { used: u32, limit: u32 },
    /// Quota exhausted for today, nothing was counted
    Exceeded { limit: u32 },
}

impl LimitDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, LimitDecision::Exceeded { .. })
    }
}

/// Check the user's quota for `kind` and, when the request may proceed,
/// count it.
///
/// Counters belong to a single calendar day: the first request on a new day
/// resets both of them before the check.
pub async fn check_user_limits(
    pool: &SqlitePool,
    user_id: i64,
    kind: RequestKind,
    is_admin: bool,
    limits: FreeLimits,
    now: NaiveDateTime,
) -> Result<LimitDecision> {
    if is_admin || db::is_user_premium(pool, user_id, now).await? {
        return Ok(LimitDecision::Unlimited);
    }

    let today = now.date();
    let mut usage = db::get_user_usage(pool, user_id).await?;
    if usage.last_request_date != Some(today) {
        debug!(user_id, "New day, resetting request counters");
        db::reset_user_limits(pool, user_id, today).await?;
        usage.text_requests = 0;
        usage.photo_requests = 0;
    }

    let (used, limit) = match kind {
        RequestKind::Text => (usage.text_requests, limits.text),
        RequestKind::Photo => (usage.photo_requests, limits.photo),
    };

    if used >= limit {
        debug!(user_id, kind = kind.as_str(), used, limit, "Free limit reached");
        return Ok(LimitDecision::Exceeded { limit });
    }

    db::increment_request_count(pool, user_id, kind).await?;
    Ok(LimitDecision::Allowed { used: used + 1, limit })
}
