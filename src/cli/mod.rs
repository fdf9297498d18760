// src/cli/mod.rs - CLI definition (clap derive)

pub mod play;
pub mod scenarios;

use clap::{Parser, Subcommand};

use crate::session::types::Difficulty;

#[derive(Parser)]
#[command(
    name = "simcoach",
    about = "Practice business conversations against a simulated counterpart",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Simulation API base URL (overrides config and SIMCOACH_BASE_URL)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List available scenarios
    Scenarios {
        /// Only scenarios in this category
        #[arg(long)]
        category: Option<String>,
        /// Only scenarios of this difficulty (beginner, intermediate, advanced, expert)
        #[arg(long)]
        difficulty: Option<Difficulty>,
        /// Free-text search over title and description
        #[arg(long)]
        search: Option<String>,
    },
    /// Open a scenario and start (or resume) a conversation (default)
    Play {
        /// Scenario id - interactive picker if omitted
        scenario: Option<String>,
        /// Fixed seed for tone drift, for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Forget saved session pointers so the next play starts fresh
    Reset {
        /// Scenario id - all scenarios if omitted
        scenario: Option<String>,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
}
