mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{Context, EXIT_DESCRIPTOR_ERROR, EXIT_FAILURE, EXIT_LOCK_ERROR};
use provenv_core::install_signal_handler;
use provenv_schema::{DescriptorOverrides, DEFAULT_DESCRIPTOR_FILE};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "provenv",
    version,
    about = "Idempotent conda environment provisioner"
)]
struct Cli {
    /// Path to the environment descriptor. Defaults apply when it is missing.
    #[arg(long, default_value = DEFAULT_DESCRIPTOR_FILE, global = true)]
    descriptor: PathBuf,

    /// Directory for provenv's own state (locks).
    #[arg(long, default_value = "~/.local/state/provenv", global = true)]
    state_dir: String,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    /// Environment name.
    #[arg(long, global = true)]
    name: Option<String>,

    /// Interpreter version for a newly created environment (e.g. 3.10).
    #[arg(long, global = true)]
    python: Option<String>,

    /// Package manager backend: conda, mamba, micromamba or mock.
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Explicit path to the package manager executable.
    #[arg(long, global = true)]
    executable: Option<String>,

    /// Requirements manifest path.
    #[arg(long, global = true)]
    manifest: Option<String>,

    /// Attempts per install step.
    #[arg(long, global = true)]
    retries: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ensure the environment, install all dependencies, then clean up.
    Provision,
    /// Create the environment unless it already exists.
    Ensure,
    /// Install system packages into the environment.
    InstallSystem,
    /// Install language packages from the manifest or the fallback list.
    InstallDeps,
    /// Prune the package manager cache.
    Cleanup,
    /// Show the resolved descriptor and the commands a provision would run.
    Plan,
    /// List environments known to the package manager.
    List,
    /// Run diagnostic checks on the descriptor, manifest and package manager.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
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
            tracing_subscriber::EnvFilter::try_from_env("PROVENV_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let base_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("error: cannot determine working directory: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    let ctx = Context {
        descriptor_path: cli.descriptor,
        state_dir: expand_tilde(&cli.state_dir),
        base_dir,
        overrides: DescriptorOverrides {
            name: cli.name,
            runtime_version: cli.python,
            backend: cli.backend,
            executable: cli.executable,
            manifest: cli.manifest,
            retry_attempts: cli.retries,
        },
        json: cli.json,
    };
    tracing::debug!(
        "descriptor {}, state dir {}",
        ctx.descriptor_path.display(),
        ctx.state_dir.display()
    );

    let result = match cli.command {
        Commands::Provision => commands::provision::run(&ctx),
        Commands::Ensure => commands::ensure::run(&ctx),
        Commands::InstallSystem => commands::install_system::run(&ctx),
        Commands::InstallDeps => commands::install_deps::run(&ctx),
        Commands::Cleanup => commands::cleanup::run(&ctx),
        Commands::Plan => commands::plan::run(&ctx),
        Commands::List => commands::list::run(&ctx),
        Commands::Doctor => commands::doctor::run(&ctx),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("descriptor error:") {
                EXIT_DESCRIPTOR_ERROR
            } else if msg.starts_with("cannot lock") {
                EXIT_LOCK_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
