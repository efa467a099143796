//! `profiles` command: list and save stored profiles

use std::path::PathBuf;

use clap::{Args, Subcommand};

use super::{load_settings, ProfileOverrides};

#[derive(Debug, Args)]
pub struct ProfilesArgs {
    #[command(subcommand)]
    pub command: ProfilesCommand,
}

#[derive(Debug, Subcommand)]
pub enum ProfilesCommand {
    /// List profile names
    List,
    /// Create or update a profile from the given options
    Save(SaveArgs),
}

#[derive(Debug, Args)]
pub struct SaveArgs {
    /// Profile name
    pub name: String,

    #[command(flatten)]
    pub overrides: ProfileOverrides,
}

pub async fn run(args: ProfilesArgs, config: Option<PathBuf>) -> anyhow::Result<()> {
    let mut settings = load_settings(config.as_ref())?;

    match args.command {
        ProfilesCommand::List => {
            for name in settings.profile_names() {
                println!("{}", name);
            }
        }
        ProfilesCommand::Save(save) => {
            // Unknown names start from the defaults
            let mut profile = settings.profile(&save.name);
            save.overrides.apply(&mut profile);
            settings.save_profile(&save.name, profile)?;
            println!(
                "Saved profile '{}' to {}",
                save.name.trim(),
                settings.path().display()
            );
        }
    }
    Ok(())
}
