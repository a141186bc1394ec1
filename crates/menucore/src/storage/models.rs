//! Plain data records stored by every backend.
//!
//! Relationships are explicit `user_id` foreign keys; use the
//! `list_*(user_id)` lookups on [`Storage`](super::Storage) to follow them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use strum::{AsRefStr, Display, EnumString};

use crate::core::error::{AppError, AppResult};
use crate::plan::{Plan, PlanState};

/// A bot user, created on first interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub full_name: Option<String>,
    /// Sticky plan label, see [`crate::plan`]
    pub plan: Plan,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    /// Paid access holds for every instant strictly before this
    pub paid_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn plan_state(&self) -> PlanState {
        PlanState {
            plan: self.plan,
            trial_end: self.trial_end,
            paid_until: self.paid_until,
        }
    }

    /// True once a trial was ever started, even if it already ended.
    pub fn has_used_trial(&self) -> bool {
        self.trial_start.is_some()
    }
}

/// Someone the user plans meals for (family member, guest...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EaterProfile {
    pub id: i64,
    pub user_id: i64,
    pub name: Option<String>,
    pub age: Option<i32>,
    pub preferences: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewEaterProfile {
    pub user_id: i64,
    pub name: Option<String>,
    pub age: Option<i32>,
    pub preferences: Option<String>,
}

impl NewEaterProfile {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(age) = self.age {
            if !(0..=150).contains(&age) {
                return Err(AppError::Validation(format!("age {age} is out of range")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MenuStatus {
    #[default]
    Draft,
    Confirmed,
}

/// A generated meal plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Menu {
    pub id: i64,
    pub user_id: i64,
    pub diet_type: String,
    pub num_people: i32,
    pub num_days: i32,
    pub meals_per_day: JsonValue,
    pub content: JsonValue,
    pub shopping_list: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub status: MenuStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMenu {
    pub user_id: i64,
    pub diet_type: String,
    pub num_people: i32,
    pub num_days: i32,
    pub meals_per_day: JsonValue,
    pub content: JsonValue,
    pub shopping_list: Option<JsonValue>,
}

impl NewMenu {
    /// Menu with one person, one day and empty JSON bodies.
    pub fn new(user_id: i64, diet_type: impl Into<String>) -> Self {
        Self {
            user_id,
            diet_type: diet_type.into(),
            num_people: 1,
            num_days: 1,
            meals_per_day: JsonValue::Array(Vec::new()),
            content: JsonValue::Object(Default::default()),
            shopping_list: None,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.diet_type.trim().is_empty() {
            return Err(AppError::Validation("diet_type must not be empty".to_string()));
        }
        if self.num_people < 1 {
            return Err(AppError::Validation("num_people must be at least 1".to_string()));
        }
        if self.num_days < 1 {
            return Err(AppError::Validation("num_days must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    pub amount: f64,
    pub currency: String,
    pub status: PaymentStatus,
    /// Identifier assigned by the payment provider
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayment {
    pub user_id: i64,
    pub amount: f64,
    pub currency: String,
    pub payment_id: Option<String>,
}

impl NewPayment {
    pub fn validate(&self) -> AppResult<()> {
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(AppError::Validation(format!("invalid payment amount {}", self.amount)));
        }
        if self.currency.trim().is_empty() {
            return Err(AppError::Validation("currency must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Result of [`Storage::complete_payment`](super::Storage::complete_payment).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentCompletion {
    /// The payment moved to `success` and the user is paid until `paid_until`
    Applied { paid_until: DateTime<Utc> },
    /// The payment had already succeeded; nothing was written
    AlreadyApplied { paid_until: Option<DateTime<Utc>> },
}

/// Rejects a trial window that ends before it starts.
pub fn validate_trial_window(start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<()> {
    if end < start {
        return Err(AppError::Validation(format!("trial_end {end} is before trial_start {start}")));
    }
    Ok(())
}
