//! # adbstatusd
//!
//! Watches Android devices through `adb`, runs configured scripts when they
//! connect or disconnect and when the host sleeps or wakes, and serves the
//! current device list over HTTPS.
//!
//! ## Running
//!
//! ```bash
//! # Background (daemonized)
//! adbstatusd start
//!
//! # Foreground with pretty logs
//! adbstatusd start -f
//!
//! # Stop / check the running daemon
//! adbstatusd stop
//! adbstatusd status
//!
//! # Print the effective configuration
//! adbstatusd -c ./adbstatus.toml config
//!
//! # List devices once, as JSON or text
//! adbstatusd devices
//! adbstatusd devices -t -s R58M123ABC
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::fs::{self, File};
use std::path::PathBuf;
use std::process::ExitCode;

use adbstatus_core::Config;
use adbstatus_server::daemon::{self, StopOutcome};
use adbstatus_server::{logging, report};
use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};

/// adbstatus daemon - Android device monitor
#[derive(Parser, Debug)]
#[command(name = "adbstatusd", version, about, disable_version_flag = true)]
struct Cli {
    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,

    /// Configuration file (default: platform config directory)
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Stay in the foreground and log to stdout
        #[arg(short = 'f', long)]
        foreground: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show whether the daemon is running
    Status,
    /// Print the effective configuration as TOML
    Config,
    /// List the devices visible right now and exit
    Devices {
        /// Output in JSON format (default)
        #[arg(short = 'j', long, conflicts_with = "text")]
        json: bool,
        /// Output in text format
        #[arg(short = 't', long)]
        text: bool,
        /// Only this device serial
        #[arg(short = 's', long)]
        serial: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::load(cli.config.as_deref()).context("cannot load configuration")?;
    let cwd = std::env::current_dir().context("cannot read the working directory")?;
    config.resolve_paths(&cwd);

    match cli.command {
        Command::Start { foreground } => start(config, foreground),
        Command::Stop => stop(&config),
        Command::Status => {
            if let Some(pid) = daemon::status(&config.daemon.pid_file) {
                println!("adbstatusd is running (PID {pid})");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("adbstatusd is not running.");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Devices { json, text, serial } => {
            devices(&config, text && !json, serial.as_deref())
        }
    }
}

fn stop(config: &Config) -> Result<ExitCode> {
    let wait = daemon::stop_timeout(config);
    match daemon::stop(&config.daemon.pid_file, wait)? {
        StopOutcome::NotRunning => {
            println!("adbstatusd is not running.");
            Ok(ExitCode::FAILURE)
        }
        StopOutcome::Stopped(pid) => {
            println!("adbstatusd (PID {pid}) stopped.");
            Ok(ExitCode::SUCCESS)
        }
        StopOutcome::StillRunning(pid) => {
            eprintln!(
                "adbstatusd (PID {pid}) did not stop within {} seconds.",
                wait.as_secs()
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn devices(config: &Config, text: bool, serial: Option<&str>) -> Result<ExitCode> {
    let devices = report::capture(config, serial).await?;
    if text {
        print!("{}", report::render_text(&devices));
    } else {
        println!("{}", report::render_json(&devices)?);
    }
    Ok(ExitCode::SUCCESS)
}

fn start(config: Config, foreground: bool) -> Result<ExitCode> {
    if let Some(pid) = daemon::status(&config.daemon.pid_file) {
        eprintln!("adbstatusd is already running (PID {pid})");
        eprintln!("Use 'adbstatusd stop' to stop it first.");
        return Ok(ExitCode::FAILURE);
    }

    // Anything fatal must surface here, while stderr is still the terminal.
    daemon::preflight(&config)?;

    if !foreground {
        daemonize(&config)?;
    }

    logging::init(!foreground, &config.logging)?;
    run_daemon(config)?;
    Ok(ExitCode::SUCCESS)
}

/// Forks into the background. Must happen before the tokio runtime exists.
fn daemonize(config: &Config) -> Result<()> {
    use daemonize::Daemonize;

    let log_dir = &config.logging.directory;
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let out_path = log_dir.join("adbstatusd.out");
    let stdout = File::create(&out_path).context("failed to create stdout log")?;
    let stderr = stdout.try_clone().context("failed to create stderr log")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: Config) -> Result<()> {
    daemon::run(config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_start_foreground_with_config() {
        let cli = Cli::try_parse_from(["adbstatusd", "-c", "/tmp/a.toml", "start", "-f"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/a.toml")));
        assert!(matches!(cli.command, Command::Start { foreground: true }));
    }

    #[test]
    fn test_parse_devices_options() {
        let cli = Cli::try_parse_from(["adbstatusd", "devices", "-t", "-s", "R58M123ABC"]).unwrap();
        match cli.command {
            Command::Devices { json, text, serial } => {
                assert!(!json);
                assert!(text);
                assert_eq!(serial.as_deref(), Some("R58M123ABC"));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["adbstatusd", "devices"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Devices { json: false, text: false, serial: None }
        ));
    }

    #[test]
    fn test_devices_json_and_text_conflict() {
        assert!(Cli::try_parse_from(["adbstatusd", "devices", "-j", "-t"]).is_err());
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["adbstatusd"]).is_err());
    }
}
