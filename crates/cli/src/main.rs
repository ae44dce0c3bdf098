use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use serde_json::Value;
use sfn_tester_harness::environment::DockerComposeEnvironment;
use sfn_tester_harness::{CallStubs, HarnessConfig, RetryTimeout, SetUpOptions, TestRunner, load_config, parse_definition};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("rewrite", sub)) => run_rewrite(sub),
        Some(("compose", sub)) => run_compose(sub),
        Some(("run", sub)) => run_workflow(sub).await,
        _ => {
            build_cli().print_help()?;
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    let definition = Arg::new("definition")
        .long("definition")
        .short('d')
        .required(true)
        .action(ArgAction::Set)
        .help("Path to the state machine definition (JSON)");
    let subnet = Arg::new("subnet")
        .long("subnet")
        .action(ArgAction::Set)
        .help("Address base of the docker network, for example 240.10.2.0");

    Command::new("sfn-tester")
        .about("Run Step Functions workflows locally against stubbed tasks")
        .subcommand(
            Command::new("rewrite")
                .about("Print the definition as the harness deploys it")
                .arg(definition.clone()),
        )
        .subcommand(
            Command::new("compose")
                .about("Print the docker compose file used to provision the environment")
                .arg(subnet.clone()),
        )
        .subcommand(
            Command::new("run")
                .about("Provision the environment, run the definition once and print the outcome")
                .arg(definition)
                .arg(
                    Arg::new("stubs")
                        .long("stubs")
                        .short('s')
                        .required(true)
                        .action(ArgAction::Set)
                        .help("Path to the stubs file (JSON or YAML), keyed by function name"),
                )
                .arg(Arg::new("input").long("input").short('i').action(ArgAction::Set).help("Path to the execution input (JSON)"))
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .action(ArgAction::Set)
                        .value_parser(value_parser!(u64))
                        .help("Execution timeout in milliseconds"),
                )
                .arg(
                    Arg::new("poll-interval")
                        .long("poll-interval")
                        .action(ArgAction::Set)
                        .value_parser(value_parser!(u64))
                        .help("Status poll interval in milliseconds"),
                )
                .arg(
                    Arg::new("retry-timeout")
                        .long("retry-timeout")
                        .action(ArgAction::Set)
                        .value_parser(["fresh", "remaining"])
                        .help("Budget of a cold-start retry: the full timeout again, or what is left of it"),
                )
                .arg(subnet),
        )
}

fn read_text(path: &str) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))
}

fn load_definition(path: &str) -> Result<Value> {
    parse_definition(&read_text(path)?).with_context(|| format!("invalid definition in {path}"))
}

fn load_stubs(path: &str) -> Result<CallStubs> {
    let text = read_text(path)?;
    let is_yaml = Path::new(path)
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| matches!(extension, "yaml" | "yml"));
    if is_yaml {
        serde_yaml::from_str(&text).with_context(|| format!("invalid stubs in {path}"))
    } else {
        serde_json::from_str(&text).with_context(|| format!("invalid stubs in {path}"))
    }
}

fn run_rewrite(matches: &ArgMatches) -> Result<()> {
    let config = load_config()?;
    let path = matches.get_one::<String>("definition").context("--definition is required")?;
    let routed = config.rewriter().rewrite(&load_definition(path)?);
    println!("{}", serde_json::to_string_pretty(&routed)?);
    Ok(())
}

fn run_compose(matches: &ArgMatches) -> Result<()> {
    let config = load_config()?;
    let subnet = matches.get_one::<String>("subnet").map(String::as_str);
    let environment = DockerComposeEnvironment::new(config, subnet)?;
    print!("{}", environment.compose_yaml()?);
    Ok(())
}

async fn run_workflow(matches: &ArgMatches) -> Result<()> {
    let mut config: HarnessConfig = load_config()?;
    if let Some(timeout) = matches.get_one::<u64>("timeout") {
        config.execution_timeout_ms = *timeout;
    }
    if let Some(poll_interval) = matches.get_one::<u64>("poll-interval") {
        config.poll_interval_ms = *poll_interval;
    }
    if config.poll_interval_ms == 0 {
        bail!("--poll-interval must be greater than zero");
    }

    let definition_path = matches.get_one::<String>("definition").context("--definition is required")?;
    let stubs_path = matches.get_one::<String>("stubs").context("--stubs is required")?;
    let definition = load_definition(definition_path)?;
    let stubs = load_stubs(stubs_path)?;
    let input = match matches.get_one::<String>("input") {
        Some(path) => serde_json::from_str(&read_text(path)?).with_context(|| format!("invalid input in {path}"))?,
        None => Value::Object(Default::default()),
    };

    let set_up_options = SetUpOptions {
        environment_address_base: matches.get_one::<String>("subnet").cloned(),
    };
    let mut runner = TestRunner::set_up(config, set_up_options).await.context("failed to set up the environment")?;

    let mut options = runner.run_options();
    if matches.get_one::<String>("retry-timeout").map(String::as_str) == Some("remaining") {
        options = options.with_retry_timeout(RetryTimeout::Remaining);
    }
    info!(timeout_ms = options.timeout.as_millis(), "running definition");
    let result = runner.run(&stubs, &definition, &input, options).await;

    let report = runner.clean_up().await;
    if !report.is_clean() {
        warn!(failures = ?report.failures, "cleanup was incomplete");
    }
    runner.tear_down().await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(error) => {
            if let Some(first) = error.failed_outcome() {
                println!("{}", serde_json::to_string_pretty(first)?);
            }
            return Err(error).context("run failed");
        }
    };
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
