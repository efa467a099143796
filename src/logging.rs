//! Logging configuration using tracing

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Flags whose value must never reach a log
const SENSITIVE_FLAGS: [&str; 5] = ["--token", "--api-key", "--key", "-key", "--password"];

/// Initialize the logging system.
///
/// Logs go to stderr so stdout stays reserved for miner output.
pub fn init(verbose: bool, json: bool) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("hcc_miner=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hcc_miner=info,warn"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}

/// Redact credential values from an argument list before logging it
pub fn redact_sensitive_args(args: &[String]) -> Vec<String> {
    let mut result = Vec::with_capacity(args.len());
    let mut redact_next = false;
    for arg in args {
        if redact_next {
            result.push("[REDACTED]".to_string());
            redact_next = false;
            continue;
        }

        let flag = arg.split('=').next().unwrap_or(arg);
        if SENSITIVE_FLAGS.contains(&flag) {
            if arg.contains('=') {
                result.push(format!("{}=[REDACTED]", flag));
            } else {
                result.push(arg.clone());
                redact_next = true;
            }
        } else {
            result.push(arg.clone());
        }
    }
    result
}
