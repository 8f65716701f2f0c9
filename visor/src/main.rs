//! Visor remote-build client.
//!
//! Resolves a Visorfile's build context, uploads only the content the server
//! is missing, and streams build output back. Container and image management
//! verbs are thin wrappers over the same server API.

#![forbid(unsafe_code)]

mod api;
mod commands;
mod stream;
mod upload;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use visor_core::{ClientConfig, LogConfig, init_logging};

#[derive(Parser)]
#[command(name = "visor")]
#[command(author, version, about = "Visor remote-build client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log into a visor server
    Login {
        url: String,
        username: String,
        password: String,
    },

    /// Build a Visorfile
    Build {
        /// Keep the container running after the build finishes
        #[arg(long)]
        keep_running: bool,

        /// Snapshot the machine when a failing command matches FAILURE_STRING,
        /// at most once per MAX_RATE_MINUTES (0 = always), tagged with NOTE
        #[arg(
            long,
            num_args = 3,
            value_names = ["FAILURE_STRING", "MAX_RATE_MINUTES", "NOTE"],
            action = ArgAction::Append
        )]
        snapshot_on_failure: Vec<String>,

        /// Build environment entries, repeatable
        #[arg(long = "build-env", value_name = "KEY=VALUE", action = ArgAction::Append)]
        buildenvs: Vec<String>,

        /// The Visorfile to build (a directory is resolved to its Visorfile)
        visorfile: PathBuf,
    },

    /// Build a Visorfile multiple times and classify each run's output
    Multirun {
        /// Build environment entries, repeatable
        #[arg(long = "build-env", value_name = "KEY=VALUE", action = ArgAction::Append)]
        buildenvs: Vec<String>,

        /// The Visorfile to build
        visorfile: PathBuf,

        /// Number of runs
        num: u32,

        /// String marking a run as passed
        #[arg(long, default_value = "")]
        pass_string: String,

        /// String marking a run as failed
        #[arg(long, default_value = "")]
        fail_string: String,
    },

    /// Download a log from a multirun
    Log {
        multirun_id: String,
        #[arg(default_value = "")]
        run_num: String,
    },

    /// Run an instance of an image
    Run { image_id: String },

    /// SSH to a running container
    Ssh {
        container_id: String,
        cmd: Option<String>,
    },

    /// Throttle the disk of a running container
    Throttle {
        container_id: String,
        #[arg(long)]
        disk_bps: Option<u64>,
        #[arg(long)]
        disk_iops: Option<u64>,
    },

    /// List running containers
    Ps {
        #[arg(short, long)]
        quiet: bool,
    },

    /// Pause a running container
    Pause { container_id: String },

    /// Resume a paused container
    Unpause { container_id: String },

    /// Kill a container
    Rm { container_id: String },

    /// List all images
    Images,

    /// Delete an image
    Rmi { image_id: String },

    /// Wipe all images and vms
    Wipe {
        #[arg(long)]
        include_bases: bool,
    },
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = ClientConfig::load()?;

    match cli.command {
        Commands::Login {
            url,
            username,
            password,
        } => {
            commands::login::login(&mut config, &url, &username, &password).await?;
            Ok(0)
        }
        Commands::Build {
            keep_running,
            snapshot_on_failure,
            buildenvs,
            visorfile,
        } => {
            let outcome = commands::build::build(
                &config,
                &visorfile,
                keep_running,
                &snapshot_on_failure,
                &buildenvs,
            )
            .await?;
            Ok(outcome.exit_code())
        }
        Commands::Multirun {
            buildenvs,
            visorfile,
            num,
            pass_string,
            fail_string,
        } => {
            let outcome = commands::build::multirun(
                &config,
                &visorfile,
                num,
                &pass_string,
                &fail_string,
                &buildenvs,
            )
            .await?;
            Ok(outcome.exit_code())
        }
        Commands::Log {
            multirun_id,
            run_num,
        } => {
            commands::build::log(&config, &multirun_id, &run_num).await?;
            Ok(0)
        }
        Commands::Run { image_id } => {
            commands::containers::run(&config, &image_id).await?;
            Ok(0)
        }
        Commands::Ssh { container_id, cmd } => {
            commands::containers::ssh(&config, &container_id, cmd.as_deref()).await?;
            Ok(0)
        }
        Commands::Throttle {
            container_id,
            disk_bps,
            disk_iops,
        } => {
            commands::containers::throttle(&config, &container_id, disk_bps, disk_iops).await?;
            Ok(0)
        }
        Commands::Ps { quiet } => {
            commands::containers::ps(&config, quiet).await?;
            Ok(0)
        }
        Commands::Pause { container_id } => {
            commands::containers::pause(&config, &container_id).await?;
            Ok(0)
        }
        Commands::Unpause { container_id } => {
            commands::containers::unpause(&config, &container_id).await?;
            Ok(0)
        }
        Commands::Rm { container_id } => {
            commands::containers::rm(&config, &container_id).await?;
            Ok(0)
        }
        Commands::Images => {
            commands::containers::images(&config).await?;
            Ok(0)
        }
        Commands::Rmi { image_id } => {
            commands::containers::rmi(&config, &image_id).await?;
            Ok(0)
        }
        Commands::Wipe { include_bases } => {
            let outcome = commands::containers::wipe(&config, include_bases).await?;
            Ok(outcome.exit_code())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _ = init_logging(&log_config);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}
