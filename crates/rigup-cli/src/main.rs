mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::teardown::TeardownArgs;
use commands::{expand_tilde, EXIT_FAILURE, EXIT_MANIFEST_ERROR, EXIT_STATE_ERROR};
use config::Config;
use rigup_engine::install_signal_handler;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "rigup",
    version,
    about = "Resumable workstation provisioning and teardown engine"
)]
struct Cli {
    /// Directory holding checkpoint state, backups, and the destroy summary.
    #[arg(long, global = true)]
    state_dir: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the provisioning pipeline, resuming from the last checkpoint.
    Provision {
        /// Path to manifest TOML file.
        #[arg(long, default_value = "rigup.toml")]
        manifest: PathBuf,
        /// Clear all checkpoints first, forcing every step to re-run.
        #[arg(long, default_value_t = false)]
        reset: bool,
    },
    /// Tear down: bookkeeping steps, terraform destroy, destructive cleanup.
    Teardown {
        /// Path to manifest TOML file.
        #[arg(long, default_value = "rigup.toml")]
        manifest: PathBuf,
        /// Report what would happen without mutating anything.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Concurrent deletions within a cleanup category.
        #[arg(long)]
        parallel: Option<usize>,
        /// Skip the terraform destroy phase.
        #[arg(long, default_value_t = false)]
        skip_destroy: bool,
        /// Where pre-deletion archives go (default: <state-dir>/backups).
        #[arg(long)]
        backup_dir: Option<PathBuf>,
    },
    /// Show checkpoint state for both pipelines.
    Status {
        /// Path to manifest TOML file.
        #[arg(long, default_value = "rigup.toml")]
        manifest: PathBuf,
    },
    /// Clear all checkpoint state.
    Reset,
    /// Run diagnostic checks on tools and state.
    Doctor {
        /// Path to manifest TOML file.
        #[arg(long, default_value = "rigup.toml")]
        manifest: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RIGUP_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let json_output = cli.json;
    let result = match cli.command {
        Commands::Provision { manifest, reset } => Config::load(&manifest).and_then(|config| {
            let state_dir = resolve_state_dir(cli.state_dir.as_deref(), &config);
            commands::provision::run(&config, &state_dir, reset, json_output)
        }),
        Commands::Teardown {
            manifest,
            dry_run,
            parallel,
            skip_destroy,
            backup_dir,
        } => Config::load(&manifest).and_then(|config| {
            let state_dir = resolve_state_dir(cli.state_dir.as_deref(), &config);
            commands::teardown::run(
                &config,
                &state_dir,
                &TeardownArgs {
                    dry_run,
                    parallel,
                    skip_destroy,
                    backup_dir,
                },
                json_output,
            )
        }),
        Commands::Status { manifest } => Config::load(&manifest).and_then(|config| {
            let state_dir = resolve_state_dir(cli.state_dir.as_deref(), &config);
            commands::status::run(&config, &state_dir, json_output)
        }),
        Commands::Reset => {
            let state_dir = resolve_state_dir(cli.state_dir.as_deref(), &Config::default());
            commands::reset::run(&state_dir, json_output)
        }
        Commands::Doctor { manifest } => Config::load(&manifest).and_then(|config| {
            let state_dir = resolve_state_dir(cli.state_dir.as_deref(), &config);
            commands::doctor::run(&config, &state_dir, json_output)
        }),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("manifest error:")
                || msg.starts_with("failed to parse manifest")
                || msg.starts_with("failed to read manifest")
            {
                EXIT_MANIFEST_ERROR
            } else if msg.starts_with("state error:") || msg.starts_with("state lock:") {
                EXIT_STATE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

/// `--state-dir` wins, then the manifest, then the XDG-ish default.
fn resolve_state_dir(flag: Option<&str>, config: &Config) -> PathBuf {
    if let Some(dir) = flag {
        return expand_tilde(dir);
    }
    if let Some(dir) = &config.state_dir {
        return expand_tilde(dir);
    }
    expand_tilde("~/.local/state/rigup")
}
