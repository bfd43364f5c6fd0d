//! CLI for droidup.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use droidup_core::apps::App;
use droidup_core::config;
use std::path::PathBuf;

use commands::{run_apps, run_check, run_fingerprint, run_status, run_update, UpdateArgs};

/// Top-level CLI for droidup.
#[derive(Debug, Parser)]
#[command(name = "droidup")]
#[command(about = "droidup: signature-checked updates for sideloaded Android browsers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// List tracked apps and the signing fingerprints they must carry.
    Apps,

    /// Look up the latest release of one app (or all of them) and compare with what is installed.
    Check {
        /// App to check; all apps if omitted.
        app: Option<App>,
        /// Ignore cached release metadata.
        #[arg(long)]
        refresh: bool,
    },

    /// Download, verify and install the latest release of an app.
    Update {
        /// App to update (brave, bromite, mull).
        app: App,
        /// Download from this URL instead of looking up the latest release.
        #[arg(long, value_name = "URL")]
        url: Option<String>,
        /// Release id of the file at --url, recorded after a successful install.
        #[arg(long, value_name = "ID", requires = "url")]
        release: Option<String>,
        /// Install without asking once the download's signature checks out.
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Print the signing certificate fingerprint of an APK file.
    Fingerprint {
        /// Path to the APK.
        path: PathBuf,
    },

    /// Show recorded installed releases and cached metadata.
    Status,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Apps => run_apps(),
            CliCommand::Check { app, refresh } => run_check(&cfg, app, refresh).await?,
            CliCommand::Update {
                app,
                url,
                release,
                yes,
            } => {
                run_update(
                    &cfg,
                    UpdateArgs {
                        app,
                        url,
                        release,
                        yes,
                    },
                )
                .await?
            }
            CliCommand::Fingerprint { path } => run_fingerprint(&path).await?,
            CliCommand::Status => run_status(&cfg).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
