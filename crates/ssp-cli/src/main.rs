//! # ssp CLI
//!
//! Runs file operations through the capability shim, confined to the
//! directories preopened from configuration and `--dir`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ssp_config::{
    log_cli_debug, log_sandbox_debug, log_sandbox_info, log_sandbox_warn, Config, PreopenConfig,
};
use ssp_core::Sandbox;

mod ops;

/// Capability-secured syscall shim
#[derive(Parser)]
#[command(name = "ssp")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Load configuration from FILE instead of the standard locations
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Preopen a host directory, optionally under another guest name
    #[arg(long = "dir", value_name = "HOST[::GUEST]")]
    dirs: Vec<PreopenConfig>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory
    Ls {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Copy a file to standard output
    Cat {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Show file metadata, following symlinks
    Stat {
        #[arg(value_name = "PATH")]
        path: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a symlink's target
    Readlink {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Create a directory
    Mkdir {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Remove a file, or an empty directory with --dir
    Rm {
        #[arg(value_name = "PATH")]
        path: String,

        #[arg(long)]
        dir: bool,
    },

    /// Block on a relative monotonic clock
    Sleep {
        #[arg(value_name = "MILLIS")]
        millis: u64,
    },

    /// List preopened directories
    Preopens,

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file locations
    Path,
}

fn main() -> Result<()> {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            config
        }
        None => Config::load().context("Failed to load config")?,
    };
    config.sandbox.preopens.extend(cli.dirs);

    ssp_config::logging::init_logging(config.logging.log_level()?);
    log_cli_debug!("Config loaded", preopens = config.sandbox.preopens.len());

    let command = match cli.command {
        Commands::Config { command } => return config_command(&config, command),
        command => command,
    };

    let sandbox = build_sandbox(&config)?;
    match command {
        Commands::Ls { path } => ops::ls(&sandbox, &path),
        Commands::Cat { path } => ops::cat(&sandbox, &path),
        Commands::Stat { path, json } => ops::stat(&sandbox, &path, json),
        Commands::Readlink { path } => ops::readlink(&sandbox, &path),
        Commands::Mkdir { path } => ops::mkdir(&sandbox, &path),
        Commands::Rm { path, dir } => ops::rm(&sandbox, &path, dir),
        Commands::Sleep { millis } => ops::sleep(&sandbox, millis),
        Commands::Preopens => ops::preopens(&sandbox),
        Commands::Config { command } => config_command(&config, command),
    }
}

fn config_command(config: &Config, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => print!("{}", config.to_toml()?),
        ConfigCommands::Path => {
            match Config::global_config_path() {
                Some(path) => println!("Global:  {}", path.display()),
                None => println!("Global:  (no home directory)"),
            }
            println!("Project: {}", Config::project_config_path().display());
        }
    }
    Ok(())
}

fn build_sandbox(config: &Config) -> Result<Sandbox> {
    let mut builder = Sandbox::builder()
        .args(config.sandbox.args.iter().cloned())
        .envs(config.sandbox.env.iter().cloned());
    if config.sandbox.inherit_stdio {
        builder = builder.inherit_stdio();
    }
    for (i, preopen) in config.sandbox.preopens.iter().enumerate() {
        if config.sandbox.preopens[..i]
            .iter()
            .any(|earlier| earlier.guest == preopen.guest)
        {
            log_sandbox_warn!("Guest name preopened twice", guest = preopen.guest.as_str());
        }
        log_sandbox_info!(
            "Preopen",
            host = &*preopen.host.to_string_lossy(),
            guest = preopen.guest.as_str()
        );
        builder = builder.preopen(&preopen.host, preopen.guest.clone());
    }
    let sandbox = builder.build()?;
    log_sandbox_debug!("Sandbox ready", handles = sandbox.curfds.used());
    Ok(sandbox)
}
