//! muffler - run shell commands as test phases under output capture
//!
//! Subcommands:
//! - `muffler run <CMD>...` - Run each command as a test's call phase
//! - `muffler config` - Print the effective configuration
//!
//! `--capture <fd|sys|no|tee-sys>` picks the method; `-s` is `--capture=no`.

use std::fs::File;
use std::io::IsTerminal;
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use muffle::{CaptureManager, CaptureMethod};
use muffleconf::{ConfigSources, MuffleConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod engine;

use engine::TestCase;

#[derive(Parser)]
#[command(name = "muffler")]
#[command(about = "Run shell commands as test phases with captured output")]
#[command(version)]
struct Cli {
    /// Capture method: fd, sys, no or tee-sys
    #[arg(long, global = true, value_name = "METHOD")]
    capture: Option<CaptureMethod>,

    /// Shortcut for --capture=no
    #[arg(short = 's', global = true, conflicts_with = "capture")]
    no_capture: bool,

    /// Config file (instead of ./muffle.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run commands as tests, reporting captured output of failures
    Run {
        /// Commands to run as call phases, one test each
        #[arg(required = true)]
        tests: Vec<String>,

        /// Command run as every test's setup phase
        #[arg(long)]
        setup: Option<String>,

        /// Command run as every test's teardown phase
        #[arg(long)]
        teardown: Option<String>,

        /// Command run once under capture before any test
        #[arg(long)]
        init: Option<String>,

        /// Print captured sections of passing tests too
        #[arg(long)]
        show_output: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

impl Cli {
    /// Command line beats environment and config files.
    fn apply_overrides(&self, config: &mut MuffleConfig) {
        if self.no_capture {
            config.capture.method = CaptureMethod::No;
        } else if let Some(method) = self.capture {
            config.capture.method = method;
        }
    }
}

/// Log to a duplicate of the original stderr so descriptor capture never
/// swallows log lines.
fn init_tracing(level: &str) -> Result<()> {
    let stderr = std::io::stderr();
    let real_stderr = stderr
        .as_fd()
        .try_clone_to_owned()
        .context("duplicating stderr for logging")?;
    let filter = EnvFilter::try_new(level)
        .with_context(|| format!("invalid log level {level:?}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(stderr.is_terminal())
        .with_writer(Arc::new(File::from(real_stderr)))
        .init();
    Ok(())
}

fn print_config(config: &MuffleConfig, sources: &ConfigSources) {
    for path in &sources.files {
        println!("# loaded {}", path.display());
    }
    for var in &sources.env_overrides {
        println!("# overridden by {var}");
    }
    print!("{}", config.to_toml());
}

fn run(
    config: &MuffleConfig,
    tests: Vec<String>,
    setup: Option<String>,
    teardown: Option<String>,
    init: Option<&str>,
    show_output: bool,
) -> Result<ExitCode> {
    let mut manager = CaptureManager::from_config(config);
    info!(method = %manager.method(), tests = tests.len(), "starting run");
    engine::initialize(&mut manager, init)?;

    let mut failed = 0;
    for call in tests {
        let test = TestCase {
            setup: setup.clone(),
            call,
            teardown: teardown.clone(),
        };
        let outcome = engine::run_test(&mut manager, &test)?;
        engine::print_outcome(&outcome, show_output);
        if !outcome.passed() {
            failed += 1;
        }
    }
    manager.stop_global_capturing()?;

    if failed > 0 {
        println!("{failed} failed");
        return Ok(ExitCode::FAILURE);
    }
    println!("all passed");
    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let (mut config, sources) = MuffleConfig::load_with_sources_from(cli.config.as_deref())
        .context("loading configuration")?;
    cli.apply_overrides(&mut config);
    init_tracing(&config.logging.level)?;

    match cli.command {
        Commands::Run {
            tests,
            setup,
            teardown,
            init,
            show_output,
        } => run(&config, tests, setup, teardown, init.as_deref(), show_output),
        Commands::Config => {
            print_config(&config, &sources);
            Ok(ExitCode::SUCCESS)
        }
    }
}
