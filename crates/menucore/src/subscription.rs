//! Plan-changing actions: trial activation and payment outcomes.
//!
//! These are the only writers of `plan`, `trial_*` and `paid_until`. Expiry is
//! never written back; [`crate::plan::resolve_effective_plan`] observes it at
//! read time.

use chrono::{DateTime, Duration, Utc};

use crate::core::error::{AppError, AppResult};
use crate::plan::{resolve_effective_plan, Tier};
use crate::storage::{PaymentCompletion, PaymentStatus, Storage};

/// Outcome of a trial request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialActivation {
    Activated { ends_at: DateTime<Utc> },
    /// A trial was started before; each user gets one
    AlreadyUsed,
    /// The user currently has paid access
    AlreadyPaid,
}

/// Starts the one-time trial for a user.
///
/// # Errors
///
/// `NotFound` if no user has this Telegram ID, or any storage failure.
pub async fn activate_trial(
    storage: &dyn Storage,
    telegram_id: i64,
    now: DateTime<Utc>,
    trial_days: i64,
) -> AppResult<TrialActivation> {
    if trial_days < 1 {
        return Err(AppError::Validation(format!("trial_days must be at least 1, got {trial_days}")));
    }

    let user = storage
        .get_user(telegram_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user telegram_id={telegram_id}")))?;

    if resolve_effective_plan(Some(&user.plan_state()), now) == Tier::Paid {
        return Ok(TrialActivation::AlreadyPaid);
    }
    if user.has_used_trial() {
        return Ok(TrialActivation::AlreadyUsed);
    }

    let ends_at = now + Duration::days(trial_days);
    storage.start_trial(user.id, now, ends_at).await?;
    log::info!("Trial activated for telegram_id={} until {}", telegram_id, ends_at);

    Ok(TrialActivation::Activated { ends_at })
}

/// Applies a successful payment and returns the user's resulting `paid_until`.
///
/// The extension is computed by the storage backend inside the transaction
/// that marks the payment, so concurrent payments for one user each add a
/// full period. Replayed notifications for an already successful payment
/// change nothing.
pub async fn record_successful_payment(
    storage: &dyn Storage,
    payment_id: i64,
    provider_payment_id: Option<&str>,
    now: DateTime<Utc>,
    period_days: i64,
) -> AppResult<DateTime<Utc>> {
    if period_days < 1 {
        return Err(AppError::Validation(format!("period_days must be at least 1, got {period_days}")));
    }

    match storage
        .complete_payment(payment_id, provider_payment_id, now, period_days)
        .await?
    {
        PaymentCompletion::Applied { paid_until } => {
            log::info!("Payment {} succeeded: paid until {}", payment_id, paid_until);
            Ok(paid_until)
        }
        PaymentCompletion::AlreadyApplied { paid_until } => {
            log::info!("Payment {} already applied, skipping", payment_id);
            paid_until.ok_or_else(|| AppError::NotFound(format!("paid_until for payment id={payment_id}")))
        }
    }
}

/// Marks a payment as failed. Plan state is untouched.
///
/// A payment that already succeeded stays successful and yields a
/// validation error, even when the success lands concurrently.
pub async fn record_failed_payment(
    storage: &dyn Storage,
    payment_id: i64,
    provider_payment_id: Option<&str>,
) -> AppResult<()> {
    storage
        .set_payment_status(payment_id, PaymentStatus::Failed, provider_payment_id)
        .await?;
    log::warn!("Payment {} failed", payment_id);
    Ok(())
}
