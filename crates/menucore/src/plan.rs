//! Subscription plans and effective tier resolution.
//!
//! A user's stored [`Plan`] is a sticky label written by the last
//! plan-changing action (trial activation, payment). It only grants access
//! while the matching expiry timestamp is still in the future, so an expired
//! label degrades to [`Tier::Free`] at read time without any downgrade write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::core::config::LimitsConfig;
use crate::core::error::AppResult;
use crate::storage::Storage;

/// Persisted plan label (`users.plan`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Trial,
    Paid,
}

impl Plan {
    /// Parses a stored label. Unknown labels never grant access.
    pub fn from_stored(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|_| {
            log::warn!("Unknown plan label {:?} in storage, treating as free", raw);
            Plan::Free
        })
    }
}

/// Effective access level at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Trial,
    Paid,
}

/// The subset of an account the resolver looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlanState {
    pub plan: Plan,
    pub trial_end: Option<DateTime<Utc>>,
    pub paid_until: Option<DateTime<Utc>>,
}

/// Computes the effective tier of an account at `now`.
///
/// Expiry bounds are exclusive: at `now == paid_until` paid access is already
/// over. The trial window is only consulted for a `trial` label, so a lapsed
/// `paid` label never falls back to a still-running trial.
pub fn resolve_effective_plan(account: Option<&PlanState>, now: DateTime<Utc>) -> Tier {
    let Some(account) = account else {
        return Tier::Free;
    };

    match account.plan {
        Plan::Paid if account.paid_until.is_some_and(|until| now < until) => Tier::Paid,
        Plan::Trial if account.trial_end.is_some_and(|end| now < end) => Tier::Trial,
        _ => Tier::Free,
    }
}

/// Looks the user up by Telegram ID and resolves their tier.
///
/// A user that was never stored is `free`. Storage failures are returned,
/// not mapped to a tier.
pub async fn get_user_plan(storage: &dyn Storage, telegram_id: i64, now: DateTime<Utc>) -> AppResult<Tier> {
    let user = storage.get_user(telegram_id).await?;
    let state = user.as_ref().map(|u| u.plan_state());
    Ok(resolve_effective_plan(state.as_ref(), now))
}

/// Expiry after paying for one more period.
///
/// A running paid period is extended from its current end. A lapsed period,
/// a trial or no subscription at all restarts from `now`.
pub fn extended_paid_until(account: &PlanState, now: DateTime<Utc>, period_days: i64) -> DateTime<Utc> {
    let base = match (account.plan, account.paid_until) {
        (Plan::Paid, Some(until)) if until > now => until,
        _ => now,
    };
    base + chrono::Duration::days(period_days)
}

/// Feature limits for an effective tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    /// Longest menu (in days) the user may request
    pub max_days: u32,
}

impl PlanLimits {
    pub fn for_tier(tier: Tier, limits: &LimitsConfig) -> Self {
        let max_days = match tier {
            Tier::Free => limits.free_max_days,
            Tier::Trial => limits.trial_max_days,
            Tier::Paid => limits.paid_max_days,
        };
        Self { max_days }
    }

    /// Clamps a requested menu length into `1..=max_days`.
    pub fn clamp_days(&self, requested: u32) -> u32 {
        requested.clamp(1, self.max_days.max(1))
    }
}
