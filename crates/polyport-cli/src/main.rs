//! `polyport` binary

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use polyport_cli::commands::{self, MigrateOptions};
use polyport_cli::{render_json, render_text, LogOptions, TerminalSupervisor, EXIT_FATAL};
use polyport_core::Supervisor;
use polyport_oracle::HttpBackend;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

fn cli() -> Command {
    Command::new("polyport")
        .version(polyport_core::VERSION)
        .about("Dependency-ordered source migration with an LLM translation oracle")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("info")
                .help("Log filter when RUST_LOG is unset (e.g. debug, polyport_core=trace)"),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Also append logs to this file"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("migrate")
                .about("Translate every file of a project")
                .arg(
                    Arg::new("manifest")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Project manifest (YAML or JSON)"),
                )
                .arg(
                    Arg::new("output")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Output directory"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .short('c')
                        .value_parser(value_parser!(PathBuf))
                        .help("Configuration file (YAML, or TOML by extension)"),
                )
                .arg(
                    Arg::new("prompts")
                        .long("prompts")
                        .value_parser(value_parser!(PathBuf))
                        .help("Prompt templates file (JSON)"),
                )
                .arg(
                    Arg::new("rules")
                        .long("rules")
                        .value_parser(value_parser!(PathBuf))
                        .help("Additional translation rules file (JSON)"),
                )
                .arg(
                    Arg::new("interactive")
                        .long("interactive")
                        .short('i')
                        .action(ArgAction::SetTrue)
                        .help("Confirm each unit and each accepted translation"),
                )
                .arg(
                    Arg::new("verbose")
                        .long("verbose")
                        .short('v')
                        .action(ArgAction::SetTrue)
                        .help("List every attempt in the report"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the report as JSON"),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .short('j')
                        .value_parser(value_parser!(usize))
                        .help("Units translated at once"),
                )
                .arg(
                    Arg::new("max-iterations")
                        .long("max-iterations")
                        .value_parser(value_parser!(u32))
                        .help("Translate/verify cycles per unit"),
                ),
        )
        .subcommand(
            Command::new("plan")
                .about("Show the processing order without translating")
                .arg(
                    Arg::new("manifest")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Project manifest (YAML or JSON)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Load and validate a configuration file")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Configuration file"),
                ),
        )
}

fn log_options(matches: &ArgMatches) -> LogOptions {
    LogOptions {
        level: matches
            .get_one::<String>("log-level")
            .cloned()
            .unwrap_or_else(|| "info".into()),
        file: matches.get_one::<PathBuf>("log-file").cloned(),
        json: matches.get_flag("log-json"),
    }
}

fn path_arg(args: &ArgMatches, name: &str) -> PathBuf {
    args.get_one::<PathBuf>(name).cloned().unwrap_or_default()
}

async fn migrate(args: &ArgMatches) -> Result<i32> {
    let options = MigrateOptions {
        manifest: path_arg(args, "manifest"),
        output: path_arg(args, "output"),
        prompts: args.get_one::<PathBuf>("prompts").cloned(),
        rules: args.get_one::<PathBuf>("rules").cloned(),
        interactive: args.get_flag("interactive"),
        concurrency: args.get_one::<usize>("concurrency").copied(),
        max_iterations: args.get_one::<u32>("max-iterations").copied(),
    };
    let config = commands::load_config(args.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    let backend = HttpBackend::from_config(&config.oracle).context("cannot create oracle backend")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight units");
            on_signal.cancel();
        }
    });

    let supervisor: Option<Arc<dyn Supervisor>> = options
        .interactive
        .then(|| Arc::new(TerminalSupervisor::stdio(cancel.clone())) as Arc<dyn Supervisor>);

    let result = commands::run_migrate(&options, config, Arc::new(backend), supervisor, cancel).await?;
    if args.get_flag("json") {
        println!("{}", render_json(&result)?);
    } else {
        print!("{}", render_text(&result, args.get_flag("verbose")));
    }
    Ok(commands::exit_code(&result))
}

async fn run(matches: ArgMatches) -> Result<i32> {
    log_options(&matches).init()?;

    match matches.subcommand() {
        Some(("migrate", args)) => migrate(args).await,
        Some(("plan", args)) => {
            let plan = commands::run_plan(&path_arg(args, "manifest")).await?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print!("{}", plan.render_text());
            }
            Ok(0)
        }
        Some(("check-config", args)) => {
            let path = path_arg(args, "file");
            let config = commands::run_check_config(&path)?;
            println!("{}: ok", path.display());
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(0)
        }
        _ => Ok(0),
    }
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    let code = match run(matches).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_definition_is_valid() {
        cli().debug_assert();
    }

    #[test]
    fn parses_migrate_flags() {
        let matches = cli()
            .try_get_matches_from([
                "polyport", "--log-level", "debug", "migrate", "m.yaml", "out", "-j", "2",
                "--max-iterations", "4", "--json",
            ])
            .unwrap();
        assert_eq!(log_options(&matches).level, "debug");
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "migrate");
        assert_eq!(args.get_one::<usize>("concurrency"), Some(&2));
        assert_eq!(args.get_one::<u32>("max-iterations"), Some(&4));
        assert!(args.get_flag("json"));
        assert!(!args.get_flag("interactive"));
    }
}
