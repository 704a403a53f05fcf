//! ithena-cli entry point.
//!
//! Dispatches to `auth` and `logs` subcommands or to the wrap modes (profile
//! or direct command). Wrap modes start the audit sink, run the proxy, and
//! flush the sink before exiting with the child's status.

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;

use ithena_cli::cli::{AuthAction, Cli, Commands, LogsAction};
use ithena_cli::{auth_cmd, logs_cmd, wrap, BUILD_COMMIT, BUILD_DATE, VERSION};
use ithena_core::auth::KeyringTokenProvider;
use ithena_core::placeholder::resolve_placeholders;
use ithena_core::sink::{AuditSink, SinkConfig};
use ithena_core::{config, telemetry};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.version {
        print_version();
        return;
    }

    init_tracing(cli.verbose);
    let code = run(cli).await;
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    match cli.command {
        Some(Commands::Auth { action }) => {
            let provider = KeyringTokenProvider::new();
            match action.unwrap_or(AuthAction::Login) {
                AuthAction::Login => auth_cmd::login(&provider).await,
                AuthAction::Status => auth_cmd::status(&provider),
                AuthAction::Deauth => auth_cmd::deauth(&provider),
            }
        }
        Some(Commands::Logs { action }) => match action {
            LogsAction::Show { port } => logs_cmd::show(port, VERSION).await,
            LogsAction::Clear => logs_cmd::clear().await,
        },
        None => run_wrap_mode(cli).await,
    }
}

/// Resolve the wrap options (profile or direct command) and run the proxy.
async fn run_wrap_mode(cli: Cli) -> i32 {
    let opts = match build_wrap_options(&cli) {
        Ok(opts) => opts,
        Err(code) => return code,
    };

    telemetry::track_event("wrap_started", serde_json::Map::new());

    let sink = AuditSink::start(
        Arc::new(KeyringTokenProvider::new()),
        SinkConfig::default(),
    );

    let result = wrap::run_wrap(&sink, opts).await;
    // Flush buffered records before the process exits, whatever happened.
    sink.shutdown().await;

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ithena-cli: {e}");
            1
        }
    }
}

/// Turn CLI flags into [`wrap::WrapOptions`], or an exit code on user error.
fn build_wrap_options(cli: &Cli) -> Result<wrap::WrapOptions, i32> {
    match (&cli.wrapper_profile, cli.wrapped.is_empty()) {
        // Profile mode and a direct command are mutually exclusive.
        (Some(profile), false) => {
            eprintln!(
                "Error: cannot wrap a direct command when --wrapper-profile ('{profile}') is \
                 also provided.\nUse one or the other."
            );
            Err(1)
        }
        (Some(profile_name), true) => {
            let path = match config::find_config_file(cli.wrapper_config_file.as_deref()) {
                Ok(path) => path,
                Err(e) => {
                    eprintln!("Error loading wrapper config: {e}");
                    return Err(1);
                }
            };
            let wrapper_config = match config::load_wrapper_config(&path) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Error loading wrapper config: {e}");
                    return Err(1);
                }
            };
            let Some(profile) = wrapper_config.profile(profile_name) else {
                eprintln!(
                    "Error: wrapper profile '{profile_name}' not found in config file '{}'",
                    path.display()
                );
                return Err(1);
            };

            // Placeholder failures abort before any child is started.
            let resolved = resolve_placeholders(&profile.env);
            if let Some(e) = resolved.first_error {
                eprintln!(
                    "Error resolving environment placeholders for profile '{profile_name}': {e}"
                );
                return Err(1);
            }

            Ok(wrap::WrapOptions {
                command: profile.command.clone(),
                args: profile.args.clone(),
                env: resolved.env,
                alias: profile.alias.clone(),
                observe_url: cli.observe_url.clone(),
            })
        }
        (None, false) => {
            let command = cli.wrapped[0].clone();
            let args = cli.wrapped[1..].to_vec();
            // Direct mode: no env overrides; default the alias to the command.
            let alias = cli.alias.clone().or_else(|| Some(command.clone()));
            Ok(wrap::WrapOptions {
                command,
                args,
                env: HashMap::new(),
                alias,
                observe_url: cli.observe_url.clone(),
            })
        }
        (None, true) => {
            eprintln!(
                "Error: no command or --wrapper-profile specified. \
                 Run 'ithena-cli --help' for usage."
            );
            Err(1)
        }
    }
}

fn print_version() {
    println!("Ithena CLI version: {VERSION}");
    if let Some(commit) = BUILD_COMMIT {
        println!("Commit: {commit}");
    }
    if let Some(date) = BUILD_DATE {
        println!("Build Date: {date}");
    }
}

/// Tracing goes to stderr only; stdout belongs to the proxied protocol.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
