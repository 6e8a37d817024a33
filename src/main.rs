mod config;
mod csv;
mod error;
mod gateway;
mod identity;
mod logging;
mod models;
mod remote;
mod saver;
mod storage;
mod tracker;
mod tui;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use config::Config;
use gateway::{PersistenceGateway, StorageTarget};
use identity::{IdentityProvider, SessionProvider};
use models::{Agent, Draft, Location, Record, RecordId, Status};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use storage::{LocalStore, SqliteStore};
use tracker::Tracker;
use tui::truncate;

#[derive(Parser)]
#[command(name = "jobtrack")]
#[command(about = "Track job applications locally or against a remote store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add an application
    Add {
        /// Company name
        company: String,

        /// Position title
        position: String,

        #[command(flatten)]
        fields: FieldArgs,
    },

    /// Edit an application
    Edit {
        /// Application ID
        id: RecordId,

        #[arg(long)]
        company: Option<String>,

        #[arg(long)]
        position: Option<String>,

        #[command(flatten)]
        fields: FieldArgs,
    },

    /// List applications
    List {
        /// Filter by status (applied, interviewing, offer, rejected)
        #[arg(short, long)]
        status: Option<Status>,
    },

    /// Show application details
    Show {
        /// Application ID
        id: RecordId,
    },

    /// Delete an application
    Delete {
        /// Application ID
        id: RecordId,
    },

    /// Delete every application in the active store
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Export applications as CSV
    Export {
        /// Output file path
        #[arg(short, long, default_value = "applications.csv")]
        output: PathBuf,

        /// Write to stdout instead of a file
        #[arg(long)]
        stdout: bool,
    },

    /// Import applications from a CSV file
    Import {
        /// Path to CSV file
        file: PathBuf,
    },

    /// Sign in; applications then live in the remote store
    Login {
        /// User ID
        uid: String,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Sign out; applications go back to local storage
    Logout,

    /// Show the signed-in user and active store
    Whoami,

    /// Browse applications in the terminal
    Browse,

    /// Show resolved configuration
    Config,
}

#[derive(Args, Default)]
struct FieldArgs {
    /// Application date (YYYY-MM-DD)
    #[arg(short, long)]
    date: Option<NaiveDate>,

    /// remote, hybrid or office
    #[arg(short, long)]
    location: Option<Location>,

    /// direct or agent
    #[arg(short, long)]
    agent: Option<Agent>,

    /// applied, interviewing, offer or rejected
    #[arg(short, long)]
    status: Option<Status>,

    #[arg(long)]
    requirements: Option<String>,

    #[arg(long)]
    optional_requirements: Option<String>,

    #[arg(long)]
    benefits: Option<String>,

    /// Full job description
    #[arg(long)]
    description: Option<String>,

    #[arg(short, long)]
    notes: Option<String>,
}

impl FieldArgs {
    /// Overwrites only the fields given on the command line.
    fn apply(self, draft: &mut Draft) {
        if let Some(date) = self.date {
            draft.date = Some(date);
        }
        if let Some(location) = self.location {
            draft.location = Some(location);
        }
        if let Some(agent) = self.agent {
            draft.agent = Some(agent);
        }
        if let Some(status) = self.status {
            draft.status = status;
        }
        if let Some(text) = self.requirements {
            draft.requirements = text;
        }
        if let Some(text) = self.optional_requirements {
            draft.optional_requirements = text;
        }
        if let Some(text) = self.benefits {
            draft.benefits = text;
        }
        if let Some(text) = self.description {
            draft.full_description = text;
        }
        if let Some(text) = self.notes {
            draft.notes = text;
        }
    }
}

fn confirm(prompt: &str) -> bool {
    print!("{} [y/N] ", prompt);
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match std::io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

/// Commands that read or change the collection and so need it loaded.
fn needs_collection(command: &Commands) -> bool {
    !matches!(
        command,
        Commands::Login { .. } | Commands::Logout | Commands::Whoami | Commands::Config
    )
}

fn print_record(record: &Record) {
    println!("Application #{}", record.id);
    println!("Company: {}", record.company);
    println!("Position: {}", record.position);
    println!("Status: {}", record.status);
    if let Some(date) = record.date {
        println!("Date: {}", date);
    }
    if let Some(location) = record.location {
        println!("Location: {}", location);
    }
    if let Some(agent) = record.agent {
        println!("Via: {}", agent);
    }
    let sections = [
        ("Requirements", &record.requirements),
        ("Optional Requirements", &record.optional_requirements),
        ("Benefits", &record.benefits),
        ("Description", &record.full_description),
        ("Notes", &record.notes),
    ];
    for (label, text) in sections {
        if !text.is_empty() {
            println!("\n--- {} ---\n{}", label, text);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    // The browser owns the terminal, so warnings stay in the log file
    let echo_warnings = !matches!(cli.command, Commands::Browse);
    let _logger = match logging::init_logging(&config.log_level, &config.log_dir(), echo_warnings) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("Warning: logging disabled: {:#}", e);
            None
        }
    };

    let sqlite = Arc::new(SqliteStore::open(&config.database_path())?);
    let database_path = sqlite.path().to_path_buf();
    let local: Arc<dyn LocalStore> = sqlite;
    let remote = config.build_remote()?;
    let gateway = Arc::new(PersistenceGateway::new(local.clone(), remote));

    let mut provider = SessionProvider::restore(local)?;
    let events = provider.subscribe();
    let mut tracker = Tracker::new(gateway.clone());

    // A failed load only blocks commands that work on the collection, so a
    // stuck session can still be inspected and signed out
    let mut load_error = match tracker.sync_identity(&events) {
        Ok(_) => None,
        Err(e) => {
            log::warn!("event=startup_load status=error error={}", e);
            Some(e)
        }
    };
    if needs_collection(&cli.command) {
        if let Some(e) = load_error.take() {
            return Err(anyhow!(e).context(
                "Failed to load applications (run `jobtrack logout` to use local storage)",
            ));
        }
    }

    match cli.command {
        Commands::Add {
            company,
            position,
            fields,
        } => {
            let draft = tracker.draft_mut();
            draft.company = company;
            draft.position = position;
            draft.date = Some(chrono::Local::now().date_naive());
            fields.apply(draft);
            let id = tracker.submit_form()?;
            println!("Added application #{}", id);
        }

        Commands::Edit {
            id,
            company,
            position,
            fields,
        } => {
            tracker.start_edit(id)?;
            let draft = tracker.draft_mut();
            if let Some(company) = company {
                draft.company = company;
            }
            if let Some(position) = position {
                draft.position = position;
            }
            fields.apply(draft);
            tracker.submit_form()?;
            println!("Updated application #{}", id);
        }

        Commands::List { status } => {
            let records: Vec<&Record> = tracker
                .records()
                .iter()
                .filter(|r| status.is_none_or(|s| r.status == s))
                .collect();
            if records.is_empty() {
                println!("No applications found.");
            } else {
                println!(
                    "{:<6} {:<13} {:<24} {:<28} {:<10} {:>10}",
                    "ID", "STATUS", "COMPANY", "POSITION", "LOCATION", "DATE"
                );
                println!("{}", "-".repeat(96));
                for record in records {
                    let date = record
                        .date
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    let location = record.location.map(|l| l.as_str()).unwrap_or("-");
                    println!(
                        "{:<6} {:<13} {:<24} {:<28} {:<10} {:>10}",
                        record.id,
                        record.status,
                        truncate(&record.company, 22),
                        truncate(&record.position, 26),
                        location,
                        date
                    );
                }
            }
        }

        Commands::Show { id } => match tracker.record(id) {
            Some(record) => print_record(record),
            None => println!("Application #{} not found.", id),
        },

        Commands::Delete { id } => {
            if tracker.delete(id) {
                println!("Deleted application #{}", id);
            } else {
                println!("Application #{} not found.", id);
            }
        }

        Commands::Clear { yes } => {
            let target = tracker.target();
            let cleared = tracker.clear_all(|count| {
                count > 0
                    && (yes
                        || confirm(&format!(
                            "Delete all {} applications from {}? This cannot be undone.",
                            count, target
                        )))
            })?;
            if cleared {
                println!("Cleared all applications from {}.", target);
            } else {
                println!("Nothing cleared.");
            }
        }

        Commands::Export { output, stdout } => {
            let csv = tracker.export_csv();
            if stdout {
                print!("{}", csv);
            } else {
                std::fs::write(&output, csv)
                    .with_context(|| format!("Failed to write {}", output.display()))?;
                println!(
                    "Exported {} applications to {}",
                    tracker.records().len(),
                    output.display()
                );
            }
        }

        Commands::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let count = tracker
                .import_csv(&text)
                .with_context(|| format!("Failed to import {}", file.display()))?;
            println!("Imported {} applications", count);
        }

        Commands::Login { uid, name } => {
            let identity = provider.sign_in(&uid, name.as_deref())?;
            let mut result = tracker.sync_identity(&events).map(|_| ());
            if result.is_ok() && tracker.identity() != Some(&identity) {
                // Signing in to the session whose startup load failed is not a
                // change, so load it again here
                result = tracker.apply_identity(Some(identity.clone())).map(|_| ());
            }
            if let Err(e) = result {
                // Keep the session consistent with what could actually be loaded
                provider.sign_out()?;
                return Err(anyhow!(e).context(format!("Failed to sign in as '{}'", identity.uid)));
            }
            println!(
                "Signed in as {} ({} applications)",
                identity.display_name.as_deref().unwrap_or(&identity.uid),
                tracker.records().len()
            );
        }

        Commands::Logout => {
            if provider.current().is_none() {
                println!("Not signed in.");
            } else {
                provider.sign_out()?;
                tracker.sync_identity(&events)?;
                println!(
                    "Signed out ({} local applications)",
                    tracker.records().len()
                );
            }
        }

        Commands::Whoami => {
            match provider.current() {
                Some(identity) => {
                    println!("Signed in as {}", identity.uid);
                    if let Some(name) = &identity.display_name {
                        println!("Name: {}", name);
                    }
                }
                None => println!("Not signed in."),
            }
            println!("Active store: {}", StorageTarget::for_identity(provider.current().as_ref()));
            if let Some(remote) = gateway.remote_description() {
                println!("Remote: {}", remote);
            }
            match &load_error {
                Some(e) => println!("Applications: unavailable ({})", e),
                None => println!("Applications: {}", tracker.records().len()),
            }
        }

        Commands::Browse => {
            tui::run_browse(&mut tracker)?;
        }

        Commands::Config => {
            println!("Config file: {}", Config::config_path().display());
            println!("Database: {}", database_path.display());
            println!("Logs: {}", config.log_dir().display());
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        }
    }

    tracker.flush().context("Failed to save applications")?;
    Ok(())
}
