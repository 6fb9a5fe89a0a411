use std::{fs, path::Path, process::ExitCode, sync::Arc};

use adapter_engine::{EngineOptions, ExecutionResult, ExecutionScope, Executor, MemoryBundleTransport, MemoryTransport, StaticValueStore};
use adapter_types::{load_adapter_config, parse_duration};
use adapter_util::ReqwestHttpClient;
use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let matches = build_cli().get_matches();
    init_tracing(matches.get_one::<String>("log-format").map(String::as_str) == Some("json"));

    match matches.subcommand() {
        Some(("run", sub)) => run_event(sub).await,
        Some(("validate", sub)) => validate_config(sub),
        _ => bail!("expected a subcommand: run or validate"),
    }
}

fn init_tracing(json: bool) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let _ = if json { builder.json().try_init() } else { builder.try_init() };
}

fn build_cli() -> Command {
    Command::new("adapter")
        .about("Process adapter events against a declarative adapter config")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .value_parser(["text", "json"])
                .default_value("text")
                .help("Log output format (logs go to stderr)"),
        )
        .subcommand(
            Command::new("run")
                .about("Execute one event and print the execution result")
                .arg(Arg::new("config").long("config").short('c').required(true).help("Path to the adapter config YAML"))
                .arg(Arg::new("event").long("event").short('e').required(true).help("Path to the event JSON, or - for stdin"))
                .arg(Arg::new("state").long("state").help("JSON file seeding the in-memory resource and bundle stores"))
                .arg(Arg::new("secrets").long("secrets").help("JSON file with secret and config map values"))
                .arg(Arg::new("options").long("options").help("JSON file with engine options"))
                .arg(Arg::new("timeout").long("timeout").help("Overall deadline for the execution, e.g. 30s"))
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .value_parser(["json", "pretty"])
                        .default_value("pretty"),
                )
                .arg(
                    Arg::new("print-state")
                        .long("print-state")
                        .action(ArgAction::SetTrue)
                        .help("Also print the in-memory stores after execution"),
                ),
        )
        .subcommand(
            Command::new("validate")
                .about("Validate an adapter config")
                .arg(Arg::new("config").long("config").short('c').required(true).help("Path to the adapter config YAML")),
        )
}

fn validate_config(matches: &ArgMatches) -> Result<ExitCode> {
    let path = required(matches, "config")?;
    let config = load_adapter_config(path).with_context(|| format!("invalid adapter config {path}"))?;
    println!(
        "{path}: adapter '{}' is valid ({} params, {} preconditions, {} resources)",
        config.metadata.name,
        config.spec.params.len(),
        config.spec.preconditions.len(),
        config.spec.resources.len()
    );
    Ok(ExitCode::SUCCESS)
}

async fn run_event(matches: &ArgMatches) -> Result<ExitCode> {
    let config_path = required(matches, "config")?;
    let config = load_adapter_config(config_path).with_context(|| format!("failed to load adapter config {config_path}"))?;
    let event = read_input(required(matches, "event")?)?;

    let state = match matches.get_one::<String>("state") {
        Some(path) => parse_state(&read_json(path)?).with_context(|| format!("invalid state file {path}"))?,
        None => SeedState::default(),
    };
    let value_store: StaticValueStore = match matches.get_one::<String>("secrets") {
        Some(path) => serde_json::from_value(read_json(path)?).with_context(|| format!("invalid secrets file {path}"))?,
        None => StaticValueStore::new(),
    };
    let options: EngineOptions = match matches.get_one::<String>("options") {
        Some(path) => serde_json::from_value(read_json(path)?).with_context(|| format!("invalid options file {path}"))?,
        None => EngineOptions::default(),
    };

    let transport = Arc::new(MemoryTransport::with_objects(state.resources));
    let bundles = Arc::new(MemoryBundleTransport::with_bundles(state.bundles));
    let http = ReqwestHttpClient::with_default_timeout(options.default_http_timeout).context("failed to build HTTP client")?;
    let executor = Executor::builder()
        .config(config)
        .http_client(Arc::new(http))
        .transport(transport.clone())
        .bundle_transport(bundles.clone())
        .value_store(Arc::new(value_store))
        .options(options)
        .build()
        .context("failed to build executor")?;

    let cancel = CancellationToken::new();
    let mut scope = ExecutionScope::new().with_cancellation(cancel.clone());
    if let Some(timeout) = matches.get_one::<String>("timeout") {
        let Some(timeout) = parse_duration(timeout) else {
            bail!("invalid --timeout '{timeout}'");
        };
        scope = scope.with_timeout(timeout);
    }
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling execution");
            cancel.cancel();
        }
    });

    let result = executor.execute(&scope, &event).await;
    let pretty = matches.get_one::<String>("output").map(String::as_str) != Some("json");
    print_json(&serde_json::to_value(&result)?, pretty)?;
    if matches.get_flag("print-state") {
        let state = serde_json::json!({
            "resources": transport.objects().await,
            "bundles": bundles.bundles().await,
        });
        print_json(&state, pretty)?;
    }
    Ok(exit_code(&result))
}

fn exit_code(result: &ExecutionResult) -> ExitCode {
    if result.is_success() {
        info!(resources_skipped = result.resources_skipped, "execution succeeded");
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Resources and bundles the in-memory stores start with.
#[derive(Debug, Default, PartialEq)]
struct SeedState {
    resources: Vec<Value>,
    bundles: Vec<Value>,
}

/// Accepts either a bare array of resources or `{ "resources": [...], "bundles": [...] }`.
fn parse_state(value: &Value) -> Result<SeedState> {
    let documents = |field: &str, value: Option<&Value>| -> Result<Vec<Value>> {
        match value {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(_) => bail!("'{field}' must be an array of documents"),
        }
    };
    match value {
        Value::Array(items) => Ok(SeedState {
            resources: items.clone(),
            bundles: Vec::new(),
        }),
        Value::Object(map) => Ok(SeedState {
            resources: documents("resources", map.get("resources"))?,
            bundles: documents("bundles", map.get("bundles"))?,
        }),
        _ => bail!("state must be an array or an object with 'resources' and 'bundles'"),
    }
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("--{name} is required"))
}

fn read_input(path: &str) -> Result<Vec<u8>> {
    if path == "-" {
        let mut buffer = Vec::new();
        std::io::Read::read_to_end(&mut std::io::stdin(), &mut buffer).context("failed to read event from stdin")?;
        return Ok(buffer);
    }
    fs::read(Path::new(path)).with_context(|| format!("failed to read {path}"))
}

fn read_json(path: &str) -> Result<Value> {
    let bytes = read_input(path)?;
    serde_json::from_slice(&bytes).with_context(|| format!("{path} is not valid JSON"))
}

fn print_json(value: &Value, pretty: bool) -> Result<()> {
    let text = if pretty { serde_json::to_string_pretty(value)? } else { serde_json::to_string(value)? };
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn run_requires_config_and_event() {
        let result = build_cli().try_get_matches_from(["adapter", "run", "--config", "adapter.yaml"]);
        assert!(result.is_err());

        let matches = build_cli()
            .try_get_matches_from(["adapter", "run", "-c", "adapter.yaml", "-e", "event.json", "-o", "json"])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        assert_eq!(sub.get_one::<String>("output").map(String::as_str), Some("json"));
    }

    #[test]
    fn state_accepts_arrays_and_objects() {
        let namespace = json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "ns-c1"}});
        assert_eq!(parse_state(&json!([namespace.clone()])).unwrap().resources, vec![namespace.clone()]);

        let state = parse_state(&json!({"bundles": [namespace.clone()]})).unwrap();
        assert!(state.resources.is_empty());
        assert_eq!(state.bundles.len(), 1);

        assert!(parse_state(&json!({"resources": "nope"})).is_err());
        assert!(parse_state(&json!("nope")).is_err());
    }
}
