//! Script Supervisor - run package-manager scripts with live, structured output.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use script_supervisor::config::{ConfigError, ConfigLoader};
use script_supervisor::display;
use script_supervisor::process::{ProcessState, ProcessSupervisor, SupervisorError, TerminationMode};

/// Exit code used when the run is interrupted.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(
    name = "script-supervisor",
    about = "Run package-manager scripts with live, structured output",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a config file (defaults to .script-supervisor.toml, then the user config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script defined in package.json.
    Run {
        /// Name of the script to run.
        script: String,
        /// Directory containing package.json.
        #[arg(short = 'C', long)]
        dir: Option<PathBuf>,
        /// Package manager command (npm, yarn, pnpm).
        #[arg(short, long)]
        manager: Option<String>,
        /// Environment override, may be repeated (KEY=VALUE).
        #[arg(short = 'e', long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
        /// Send SIGTERM first and wait this many milliseconds before killing.
        #[arg(long)]
        graceful_ms: Option<u64>,
        /// Log script output through tracing instead of the colored display.
        #[arg(long)]
        plain: bool,
        /// Extra arguments passed to the script after `--`.
        #[arg(last = true)]
        args: Vec<String>,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("Cannot determine working directory: {0}")]
    WorkingDir(#[from] std::io::Error),
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn exit_code(state: ProcessState) -> ExitCode {
    match state {
        ProcessState::Exited { code: Some(code) } => {
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
        ProcessState::Killed => ExitCode::from(EXIT_INTERRUPTED),
        _ => ExitCode::FAILURE,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_script(
    config_path: Option<PathBuf>,
    script: &str,
    dir: Option<PathBuf>,
    manager: Option<String>,
    env: Vec<(String, String)>,
    graceful_ms: Option<u64>,
    plain: bool,
    args: &[String],
) -> Result<ExitCode, CliError> {
    let loader = config_path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let loaded = loader.load_with_source()?;
    match &loaded.source {
        Some(path) => tracing::info!(path = %path.display(), "Using config file"),
        None => tracing::info!("No config file found, using defaults"),
    }
    let mut config = loaded.config;

    if let Some(manager) = manager {
        config.manager = manager;
    }
    config.env.extend(env);

    let working_dir = match dir.or_else(|| config.working_dir.clone()) {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    let mut invocation = config.invocation(working_dir, script);
    if !args.is_empty() {
        invocation = invocation.arguments(shell_words::join(args));
    }

    let termination = graceful_ms.map_or_else(
        || config.termination_mode(),
        |ms| TerminationMode::Graceful(Duration::from_millis(ms)),
    );

    let mut supervisor = ProcessSupervisor::new(invocation)?
        .with_termination(termination)
        .with_drain_timeout(config.drain_timeout());

    if plain {
        supervisor.attach_tracing();
    } else {
        supervisor.attach_logger(
            display::print_line,
            display::print_error_line,
            display::print_progress,
        );
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, stopping script");
                cancel.cancel();
            }
        });
    }

    supervisor.launch(cancel.clone())?;
    if !plain {
        display::print_run_start(
            &supervisor.invocation().command_line(),
            &supervisor.invocation().get_working_dir().display().to_string(),
            supervisor.pid(),
        );
    }

    supervisor.wait().await;
    let state = supervisor.shutdown().await;
    tracing::info!(state = %state, "Script run finished");

    if !plain {
        display::print_run_end(state);
    }

    Ok(exit_code(state))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            script,
            dir,
            manager,
            env,
            graceful_ms,
            plain,
            args,
        } => {
            match run_script(cli.config, &script, dir, manager, env, graceful_ms, plain, &args)
                .await
            {
                Ok(code) => code,
                Err(e) => {
                    display::print_error(&e.to_string());
                    ExitCode::FAILURE
                }
            }
        }
    }
}
