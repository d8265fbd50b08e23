//! Command-line front end for the reconciliation core.
//!
//! # Responsibility
//! - Resolve one identify request against a SQLite file and print the JSON
//!   response.
//! - Expose read-only cluster lookup and the integrity scan.
//!
//! # Exit codes
//! - `0` success, `1` internal failure, `2` bad request.

use clap::{Parser, Subcommand};
use reconcile_core::db::open_db_with_timeout;
use reconcile_core::{
    init_from_config, ErrorKind, IdentifyRequest, IdentifyService, ReconcileConfig, ResolveError,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQLite database file (overrides RECONCILE_DB_PATH)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Absolute log directory (overrides RECONCILE_LOG_DIR)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log level (overrides RECONCILE_LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve an email and/or phone number to its consolidated identity
    Identify {
        #[arg(short, long)]
        email: Option<String>,

        #[arg(short, long)]
        phone: Option<String>,

        /// Raw JSON request body instead of --email/--phone
        #[arg(long, conflicts_with_all = ["email", "phone"])]
        json: Option<String>,
    },

    /// Show the consolidated identity containing one contact id
    Show { contact_id: i64 },

    /// Scan storage for broken cluster links
    Check,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::BadRequest(message)) => {
            eprintln!("bad request: {message}");
            ExitCode::from(2)
        }
        Err(CliError::Internal(message)) => {
            eprintln!("error: {message}");
            ExitCode::from(1)
        }
    }
}

enum CliError {
    BadRequest(String),
    Internal(String),
}

impl From<ResolveError> for CliError {
    fn from(err: ResolveError) -> Self {
        match err.error_kind() {
            ErrorKind::BadRequest => Self::BadRequest(err.to_string()),
            ErrorKind::Internal => Self::Internal(err.to_string()),
        }
    }
}

fn internal(err: impl std::fmt::Display) -> CliError {
    CliError::Internal(err.to_string())
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = ReconcileConfig::from_env().map_err(internal)?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(log_dir) = cli.log_dir {
        config.log_dir = Some(log_dir);
    }
    if let Some(log_level) = cli.log_level {
        config.log_level = log_level;
    }
    init_from_config(&config).map_err(internal)?;

    let mut conn = open_db_with_timeout(&config.db_path, config.busy_timeout).map_err(internal)?;
    let mut service = IdentifyService::with_retry_policy(&mut conn, config.retry);

    match cli.command {
        Command::Identify { email, phone, json } => {
            let request = match json {
                Some(body) => IdentifyRequest::from_json(&body)
                    .map_err(|err| CliError::BadRequest(err.to_string()))?,
                None => IdentifyRequest::new(email.as_deref(), phone.as_deref()),
            };
            let response = service.identify(&request)?;
            print_json(&response)
        }
        Command::Show { contact_id } => match service.lookup(contact_id)? {
            Some(identity) => print_json(&identity),
            None => Err(CliError::BadRequest(format!(
                "contact {contact_id} not found"
            ))),
        },
        Command::Check => {
            let report = service.verify_integrity().map_err(internal)?;
            println!("active_contacts={}", report.active_contacts);
            for violation in &report.violations {
                println!("violation: {violation}");
            }
            if report.is_clean() {
                Ok(())
            } else {
                Err(CliError::Internal(format!(
                    "{} integrity violations",
                    report.violations.len()
                )))
            }
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(internal)?;
    println!("{text}");
    Ok(())
}
