//! timetrack: command-line front end for the shared time tracker.
//!
//! Every invocation is an independent process against the same data folder as any
//! other running front end. One-shot commands write to the store and exit; `watch`
//! keeps a synchronizer, chime scheduler and periodic export running.
//!
//! ## Subcommands
//!
//! - `start` / `stop` / `switch`: open and seal sessions
//! - `activity` / `project`: edit the open session in place
//! - `status`, `projects`, `activities`: read-only views
//! - `export`, `report`: CSV projection and per-project totals
//! - `watch`: the long-running tick loop

mod commands;
mod logging;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "timetrack")]
#[command(about = "Track time against projects from any terminal")]
#[command(version)]
struct Cli {
    /// Data folder (defaults to $TIMETRACK_DATA_DIR, then the configured folder)
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Settings file (defaults to ~/.config/timetracker/settings.toml)
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking a project
    Start {
        project: String,

        #[arg(long, short)]
        activity: Option<String>,

        /// Ring the start chime
        #[arg(long)]
        chime: bool,
    },

    /// Stop the running session
    Stop {
        /// Ring the stop chime
        #[arg(long)]
        chime: bool,
    },

    /// Close the running session and start a new one for another project
    Switch {
        project: String,

        #[arg(long, short)]
        activity: Option<String>,
    },

    /// Change the running session's activity
    Activity { activity: String },

    /// Move the running session to another project, keeping its start time
    Project {
        project: String,

        #[arg(long, short)]
        activity: Option<String>,
    },

    /// Show the running session
    Status {
        #[arg(long)]
        json: bool,

        /// Read the cache snapshot instead of the database
        #[arg(long)]
        cached: bool,
    },

    /// List projects, most recently used first
    Projects {
        /// Include hidden projects
        #[arg(long)]
        all: bool,
    },

    /// List activities, or add a custom one
    Activities {
        #[arg(long, value_name = "NAME")]
        add: Option<String>,
    },

    /// Rewrite time_entries.csv in the data folder
    Export,

    /// Hours per project, rounded up to the tenth
    Report,

    /// Keep state in sync, ring chimes and export periodically
    Watch {
        /// Stop after this many seconds
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let context = match commands::Context::load(cli.data_dir, cli.settings) {
        Ok(context) => context,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            eprintln!("timetrack: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Start {
            project,
            activity,
            chime,
        } => commands::start(&context, &project, activity.as_deref(), chime),
        Commands::Stop { chime } => commands::stop(&context, chime),
        Commands::Switch { project, activity } => {
            commands::switch(&context, &project, activity.as_deref())
        }
        Commands::Activity { activity } => commands::change_activity(&context, &activity),
        Commands::Project { project, activity } => {
            commands::change_project(&context, &project, activity.as_deref())
        }
        Commands::Status { json, cached } => commands::status(&context, json, cached),
        Commands::Projects { all } => commands::projects(&context, all),
        Commands::Activities { add } => commands::activities(add.as_deref()),
        Commands::Export => commands::export(&context),
        Commands::Report => commands::report(&context),
        Commands::Watch { duration } => commands::watch(&context, duration),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Command failed");
        eprintln!("timetrack: {e}");
        std::process::exit(1);
    }
}
