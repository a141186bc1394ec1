//! menucore - core library of the menu-planning Telegram bot
//!
//! Everything the bot needs below the Telegram layer: configuration,
//! storage of users, eater profiles, menus and payments, and the
//! subscription rules that decide what a user may access.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging
//! - `plan`: plan labels, effective tier resolution, per-tier limits
//! - `subscription`: trial activation and payment outcomes
//! - `storage`: the `Storage` trait with SQLite and PostgreSQL backends

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod core;
pub mod plan;
pub mod storage;
pub mod subscription;

// Re-export commonly used types for convenience
pub use crate::core::{config, AppError, AppResult, Config};
pub use plan::{get_user_plan, resolve_effective_plan, Plan, PlanLimits, PlanState, Tier};
pub use storage::{open_storage, Storage};
