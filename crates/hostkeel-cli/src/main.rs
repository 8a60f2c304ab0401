mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_POLICY_REJECTED, EXIT_STAGING_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "hostkeel",
    version,
    about = "Policy-checked command execution with transactional rollback"
)]
struct Cli {
    /// Configuration file (default: $HOSTKEEL_CONFIG, then /etc/hostkeel/hostkeel.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

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
    /// Run one whitelisted command.
    Exec {
        /// Run as this account (wraps with the escalation program's -u).
        #[arg(long)]
        run_as: Option<String>,
        /// Timeout in seconds (capped by the configured maximum).
        #[arg(long)]
        timeout: Option<u64>,
        /// Working directory for the command.
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Attempts before giving up, with linear backoff between them.
        #[arg(long)]
        retry: Option<u32>,
        /// Program name, as listed by `hostkeel policy list`.
        program: String,
        /// Arguments passed to the program.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Inspect the command whitelist.
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },
    /// Undo work journaled by a process that died mid-transaction.
    Recover,
    /// Run diagnostic checks on programs, configuration and staging area.
    Doctor,
    /// Print the effective configuration.
    Config,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum PolicyCommands {
    /// List whitelisted programs.
    List,
    /// Validate a command line without running it.
    Check {
        program: String,
        #[arg(long)]
        run_as: Option<String>,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
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
            tracing_subscriber::EnvFilter::try_from_env("HOSTKEEL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let json_output = cli.json;
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Exec {
            run_as,
            timeout,
            cwd,
            retry,
            program,
            args,
        } => commands::exec::run(
            config_path,
            commands::exec::ExecArgs {
                program,
                args,
                run_as,
                timeout,
                cwd,
                retry,
            },
            json_output,
        ),
        Commands::Policy {
            command: PolicyCommands::List,
        } => commands::policy::list(json_output),
        Commands::Policy {
            command:
                PolicyCommands::Check {
                    program,
                    run_as,
                    args,
                },
        } => commands::policy::check(config_path, &program, args, run_as, json_output),
        Commands::Recover => commands::recover::run(config_path, json_output),
        Commands::Doctor => commands::doctor::run(config_path, json_output),
        Commands::Config => commands::config::run(config_path, json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("staging error:") || msg.starts_with("transaction error:")
            {
                EXIT_STAGING_ERROR
            } else if msg.starts_with("policy:") {
                EXIT_POLICY_REJECTED
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
