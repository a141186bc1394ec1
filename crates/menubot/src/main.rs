use anyhow::{Context, Result};
use chrono::Utc;
use dotenvy::dotenv;
use std::sync::Arc;

use menucore::core::{init_logger, log_startup_configuration};
use menucore::storage::NewPayment;
use menucore::subscription::{self, TrialActivation};
use menucore::{get_user_plan, open_storage, Config, PlanLimits, Storage};

mod cli;

use cli::{Cli, Commands};

/// Main entry point
///
/// Loads configuration, opens storage and dispatches the subcommand.
///
/// # Errors
/// Returns an error if configuration, logging or storage initialization fails,
/// or if the command itself fails.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    // .env is optional
    let _ = dotenv();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_logger(&config.log_file_path)?;
    log_startup_configuration(&config);

    let storage = open_storage(&config.database)
        .await
        .context("Failed to open storage")?;

    let result = run_command(cli.command, &config, &storage).await;
    storage.close().await;
    result
}

async fn run_command(command: Option<Commands>, config: &Config, storage: &Arc<dyn Storage>) -> Result<()> {
    match command {
        Some(Commands::InitDb) | None => {
            log::info!("Database is ready ({})", storage.backend_name());
            println!("Database ready: {}", config.database.describe());
            Ok(())
        }
        Some(Commands::User {
            telegram_id,
            username,
            full_name,
        }) => {
            let user = storage
                .get_or_create_user(telegram_id, username.as_deref(), full_name.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
            Ok(())
        }
        Some(Commands::Plan { telegram_id }) => show_plan(config, storage.as_ref(), telegram_id).await,
        Some(Commands::Trial { telegram_id }) => start_trial(config, storage.as_ref(), telegram_id).await,
        Some(Commands::Pay { telegram_id, amount }) => pay(config, storage.as_ref(), telegram_id, amount).await,
        Some(Commands::Menus { telegram_id, json }) => list_menus(storage.as_ref(), telegram_id, json).await,
    }
}

async fn show_plan(config: &Config, storage: &dyn Storage, telegram_id: i64) -> Result<()> {
    let now = Utc::now();
    let tier = get_user_plan(storage, telegram_id, now).await?;
    let limits = PlanLimits::for_tier(tier, &config.limits);

    println!("telegram_id: {}", telegram_id);
    println!("tier:        {}", tier);
    println!("max days:    {}", limits.max_days);

    if let Some(user) = storage.get_user(telegram_id).await? {
        println!("stored plan: {}", user.plan);
        if let Some(end) = user.trial_end {
            println!("trial end:   {}", end.to_rfc3339());
        }
        if let Some(until) = user.paid_until {
            println!("paid until:  {}", until.to_rfc3339());
        }
    }
    Ok(())
}

async fn start_trial(config: &Config, storage: &dyn Storage, telegram_id: i64) -> Result<()> {
    let outcome = subscription::activate_trial(storage, telegram_id, Utc::now(), config.subscription.trial_days)
        .await
        .with_context(|| format!("Failed to start trial for telegram_id={}", telegram_id))?;

    match outcome {
        TrialActivation::Activated { ends_at } => println!("Trial active until {}", ends_at.to_rfc3339()),
        TrialActivation::AlreadyUsed => println!("Trial was already used"),
        TrialActivation::AlreadyPaid => println!("User already has a paid subscription"),
    }
    Ok(())
}

async fn pay(config: &Config, storage: &dyn Storage, telegram_id: i64, amount: Option<f64>) -> Result<()> {
    let user = storage.get_or_create_user(telegram_id, None, None).await?;
    let payment = storage
        .create_payment(NewPayment {
            user_id: user.id,
            amount: amount.unwrap_or_else(|| f64::from(config.subscription.price_rub)),
            currency: config.subscription.currency.clone(),
            payment_id: None,
        })
        .await?;
    log::info!("Created payment {} for telegram_id={}", payment.id, telegram_id);

    let paid_until =
        subscription::record_successful_payment(storage, payment.id, None, Utc::now(), config.subscription.period_days)
            .await
            .with_context(|| format!("Failed to apply payment {}", payment.id))?;

    println!(
        "Payment {} recorded: {} {}, paid until {}",
        payment.id,
        payment.amount,
        payment.currency,
        paid_until.to_rfc3339()
    );
    Ok(())
}

async fn list_menus(storage: &dyn Storage, telegram_id: i64, json: bool) -> Result<()> {
    let Some(user) = storage.get_user(telegram_id).await? else {
        println!("No user with telegram_id={}", telegram_id);
        return Ok(());
    };

    let menus = storage.list_menus(user.id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&menus)?);
        return Ok(());
    }

    if menus.is_empty() {
        println!("No menus yet");
    }
    for menu in &menus {
        println!(
            "#{} [{}] {} - {} people, {} days, created {}",
            menu.id,
            menu.status,
            menu.diet_type,
            menu.num_people,
            menu.num_days,
            menu.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}
