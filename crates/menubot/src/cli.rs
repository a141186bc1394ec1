use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "menubot")]
#[command(author, version, about = "Backend of the menu-planning Telegram bot", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Connect to the configured database and apply the schema
    InitDb,

    /// Register a user (or show the existing one)
    User {
        /// Telegram user ID
        #[arg(long)]
        telegram_id: i64,

        /// Telegram username without @
        #[arg(long)]
        username: Option<String>,

        /// Display name
        #[arg(long)]
        full_name: Option<String>,
    },

    /// Show the effective plan and its limits
    Plan {
        #[arg(long)]
        telegram_id: i64,
    },

    /// Start the one-time trial
    Trial {
        #[arg(long)]
        telegram_id: i64,
    },

    /// Record a successful subscription payment
    Pay {
        #[arg(long)]
        telegram_id: i64,

        /// Amount charged; defaults to SUBSCRIPTION_PRICE_RUB
        #[arg(long)]
        amount: Option<f64>,
    },

    /// List a user's menus, newest first
    Menus {
        #[arg(long)]
        telegram_id: i64,

        /// Print full records as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
