//! hcc-miner - launcher for the Hashcash Credits proof-of-work miner
//!
//! Provides:
//! - Auto-update of the miner binary from GitHub releases
//! - Supervised miner process with live output (`hcc-miner mine`)
//! - Named connection profiles stored per user

mod cli;
mod host;
mod logging;
mod session;
mod settings;
mod updater;

use clap::Parser;
use cli::{exit_codes, Cli, Commands};
use session::SessionError;
use settings::SettingsError;

fn main() {
    let exit_code = run();
    std::process::exit(exit_code);
}

fn run() -> i32 {
    let cli = Cli::parse();

    // Initialize logging
    if let Err(e) = logging::init(cli.verbose, cli.json_output) {
        eprintln!("Failed to initialize logging: {}", e);
        return exit_codes::UNEXPECTED_FAILURE;
    }

    let args: Vec<String> = std::env::args().collect();
    tracing::debug!("Args: {:?}", logging::redact_sensitive_args(&args));

    // Create tokio runtime for async commands
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            return exit_codes::UNEXPECTED_FAILURE;
        }
    };

    let config = cli.config;
    let result = match cli.command {
        Some(Commands::Mine(args)) => rt.block_on(cli::mine::run(args, config)),
        Some(Commands::Update(args)) => rt.block_on(cli::update::run(args)),
        Some(Commands::Platform) => cli::update::platform(),
        Some(Commands::Profiles(args)) => rt.block_on(cli::profiles::run(args, config)),
        // Default: mine with the default profile
        None => rt.block_on(cli::mine::run(cli::mine::MineArgs::default(), config)),
    };

    match result {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            // Session errors were already shown as status lines
            if e.downcast_ref::<SessionError>().is_none() {
                eprintln!("Error: {:#}", e);
            }
            categorize_error(&e)
        }
    }
}

/// Categorize an error into the appropriate exit code
fn categorize_error(e: &anyhow::Error) -> i32 {
    if let Some(session) = e.downcast_ref::<SessionError>() {
        return match session {
            SessionError::ExecutableNotFound(_) => exit_codes::MINER_MISSING,
            SessionError::MissingCredential | SessionError::InvalidEndpoint(_) => {
                exit_codes::CONFIG_ERROR
            }
            _ => exit_codes::UNEXPECTED_FAILURE,
        };
    }
    if e.downcast_ref::<SettingsError>().is_some() {
        return exit_codes::CONFIG_ERROR;
    }

    let msg = e.to_string().to_lowercase();
    if msg.contains("not found") || msg.contains("no matching asset") {
        exit_codes::MINER_MISSING
    } else {
        exit_codes::UNEXPECTED_FAILURE
    }
}
