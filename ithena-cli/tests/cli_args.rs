//! CLI argument parsing tests.

use clap::Parser;

use ithena_cli::cli::{AuthAction, Cli, Commands, LogsAction};

#[test]
fn direct_wrap_takes_everything_after_double_dash() {
    let cli = Cli::parse_from([
        "ithena-cli",
        "--alias",
        "demo",
        "--verbose",
        "--",
        "npx",
        "-y",
        "some-server",
    ]);
    assert!(cli.command.is_none());
    assert_eq!(cli.alias.as_deref(), Some("demo"));
    assert!(cli.verbose);
    assert_eq!(cli.wrapped, vec!["npx", "-y", "some-server"]);
}

#[test]
fn flags_after_double_dash_belong_to_the_wrapped_command() {
    let cli = Cli::parse_from(["ithena-cli", "--", "server", "--verbose", "--port", "1"]);
    assert!(!cli.verbose, "--verbose after -- is the child's flag");
    assert_eq!(cli.wrapped, vec!["server", "--verbose", "--port", "1"]);
}

#[test]
fn profile_mode_flags() {
    let cli = Cli::parse_from([
        "ithena-cli",
        "--wrapper-profile",
        "github",
        "--wrapper-config-file",
        "custom.yaml",
        "--observe-url",
        "https://example.test/observe",
    ]);
    assert_eq!(cli.wrapper_profile.as_deref(), Some("github"));
    assert_eq!(
        cli.wrapper_config_file.as_deref(),
        Some(std::path::Path::new("custom.yaml"))
    );
    assert_eq!(cli.observe_url, "https://example.test/observe");
    assert!(cli.wrapped.is_empty());
}

#[test]
fn observe_url_has_a_default() {
    let cli = Cli::parse_from(["ithena-cli", "--", "cat"]);
    assert_eq!(cli.observe_url, ithena_core::sink::DEFAULT_OBSERVE_URL);
}

#[test]
fn auth_subcommands_parse() {
    let cli = Cli::parse_from(["ithena-cli", "auth"]);
    assert!(matches!(
        cli.command,
        Some(Commands::Auth { action: None })
    ));

    let cli = Cli::parse_from(["ithena-cli", "auth", "status"]);
    assert!(matches!(
        cli.command,
        Some(Commands::Auth {
            action: Some(AuthAction::Status)
        })
    ));

    // `logout` is an alias for `deauth`.
    let cli = Cli::parse_from(["ithena-cli", "auth", "logout"]);
    assert!(matches!(
        cli.command,
        Some(Commands::Auth {
            action: Some(AuthAction::Deauth)
        })
    ));
}

#[test]
fn logs_subcommands_parse() {
    let cli = Cli::parse_from(["ithena-cli", "logs", "show", "--port", "9000"]);
    match cli.command {
        Some(Commands::Logs {
            action: LogsAction::Show { port },
        }) => assert_eq!(port, 9000),
        other => panic!("unexpected parse: {other:?}"),
    }

    let cli = Cli::parse_from(["ithena-cli", "logs", "show"]);
    match cli.command {
        Some(Commands::Logs {
            action: LogsAction::Show { port },
        }) => assert_eq!(port, ithena_cli::webui::DEFAULT_PORT),
        other => panic!("unexpected parse: {other:?}"),
    }

    let cli = Cli::parse_from(["ithena-cli", "logs", "clear"]);
    assert!(matches!(
        cli.command,
        Some(Commands::Logs {
            action: LogsAction::Clear
        })
    ));
}

#[test]
fn version_flag_parses_without_a_command() {
    let cli = Cli::parse_from(["ithena-cli", "--version"]);
    assert!(cli.version);
    assert!(cli.command.is_none());
    assert!(cli.wrapped.is_empty());
}
