/// esxi-native
///
/// Command-line front end over the dispatcher. Inputs are read as JSON from stdin,
/// outputs are written as JSON to stdout and logs go to stderr.
///
/// ```text
/// esxi-native [-c name=value]... validate <token>
/// esxi-native [-c name=value]... name <token> <base>
/// esxi-native [-c name=value]... create <token>
/// esxi-native [-c name=value]... read|update|delete <token> <id>
/// esxi-native [-c name=value]... invoke <token>
/// ```

use anyhow::{bail, Context};
use esxi_native::{naming, validation};
use esxi_native::{Dispatcher, Host, Inputs, Operation, ProviderConfig, ResourceKind};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Read;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const USAGE: &str = "usage: esxi-native [-c name=value]... <validate|name|create|read|update|delete|invoke> <token> [id|base]";

struct Args {
    vars: HashMap<String, String>,
    verb: String,
    token: String,
    extra: Option<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut vars = HashMap::new();
    let mut positional = Vec::new();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        if arg == "-c" || arg == "--config" {
            let pair = args.next().context(USAGE)?;
            let (name, value) = pair
                .split_once('=')
                .with_context(|| format!("expected name=value, got '{}'", pair))?;
            vars.insert(format!("esxi-native:config:{}", name), value.to_string());
        } else {
            positional.push(arg);
        }
    }

    let mut positional = positional.into_iter();
    let (Some(verb), Some(token)) = (positional.next(), positional.next()) else {
        bail!(USAGE);
    };
    Ok(Args {
        vars,
        verb,
        token,
        extra: positional.next(),
    })
}

fn read_stdin() -> anyhow::Result<Value> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read inputs from stdin")?;
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(&raw).context("inputs must be a JSON object")
}

fn object(value: &Value, key: Option<&str>) -> Inputs {
    let value = match key {
        Some(key) => value.get(key).unwrap_or(&Value::Null),
        None => value,
    };
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the level, e.g. RUST_LOG=esxi_native=debug
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let input = read_stdin()?;

    // Validation and naming never touch the host.
    match args.verb.as_str() {
        "validate" | "check" => {
            let kind: ResourceKind = args.token.parse()?;
            let failures = validation::check(kind, &object(&input, None));
            println!("{}", serde_json::to_string_pretty(&failures)?);
            if !failures.is_empty() {
                std::process::exit(1);
            }
            return Ok(());
        }
        "name" => {
            let kind: ResourceKind = args.token.parse()?;
            let base = args.extra.as_deref().context(USAGE)?;
            let name = naming::resolve_name(
                kind,
                &object(&input, Some("news")),
                &object(&input, Some("olds")),
                base,
            )?;
            println!("{}", json!({ "name": name }));
            return Ok(());
        }
        _ => {}
    }

    info!("🚀 starting esxi-native {}", env!("CARGO_PKG_VERSION"));
    let connection = ProviderConfig::load(&args.vars)?;
    info!("✅ configuration loaded for {}", connection.ssh_address());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let host = Host::connect(connection).with_cancellation(cancel);
    host.validate_creds().await?;
    let dispatcher = Dispatcher::new(host);
    let inputs = object(&input, None);

    let output = if args.verb == "invoke" {
        Value::Object(dispatcher.invoke(&args.token, &inputs).await?)
    } else {
        let operation: Operation = args.verb.parse()?;
        let id = match operation {
            Operation::Create => String::new(),
            _ => args.extra.clone().context(USAGE)?,
        };
        let result = dispatcher.call(&args.token, operation, &id, &inputs).await?;
        serde_json::to_value(result)?
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
