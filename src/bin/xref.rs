use anyhow::{anyhow, bail, Context};
use entity_xref::config::{
    ConfigOverrides, IndexOverrides, ResolverOverrides, RunOverrides, StatementsOverrides,
    XrefConfig,
};
use entity_xref::{Judgement, MemoryStatementStore, Resolver, SchemaModel};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Flags followed by a value, skipped when collecting positional arguments.
const VALUE_FLAGS: &[&str] = &[
    "-c",
    "--config",
    "-d",
    "--dataset",
    "--limit",
    "--statements",
    "--schema",
    "--resolver",
    "--backend",
    "--score",
];

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn positional_args() -> Vec<String> {
    let mut positional = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if VALUE_FLAGS.contains(&arg.as_str()) {
            args.next();
        } else if !arg.starts_with('-') {
            positional.push(arg);
        }
    }
    positional
}

fn print_help() {
    eprintln!(
        r#"xref - cross-reference entities and manage merge decisions

USAGE:
    xref run --dataset <NAME> [OPTIONS]
    xref decide <ID> <ID> confirm|reject [--score <S>]
    xref canonical <ID>
    xref prune

OPTIONS:
    -c, --config <FILE>      Path to config file (TOML)
    -d, --dataset <NAME>     Dataset to cross-reference
        --limit <N>          Suggestion budget [default: 5000]
        --fuzzy              Index trigrams and phonetic keys
        --statements <FILE>  Statements file (JSON lines)
        --schema <FILE>      Schema model (JSON) [default: built-in]
        --resolver <PATH>    Resolver snapshot file or database directory
        --backend <KIND>     Resolver backend: file, rocksdb, memory
        --repair             Repair the resolver database before opening
    -h, --help               Print help

ENVIRONMENT:
    XREF_CONFIG              Path to config file
    XREF_XREF__LIMIT         Suggestion budget
    XREF_RESOLVER__PATH      Resolver path
    RUST_LOG                 Log filter [default: info]

CONFIG FILE (xref.toml):
    [resolver]
    backend = "file"
    path = "data/resolver.json"

    [index]
    fuzzy = true
"#
    );
}

fn build_overrides() -> anyhow::Result<ConfigOverrides> {
    let mut overrides = ConfigOverrides::default();

    let mut resolver = ResolverOverrides::default();
    if let Some(path) = parse_arg("--resolver") {
        resolver.path = Some(path.into());
    }
    if let Some(backend) = parse_arg("--backend") {
        resolver.backend = Some(
            serde_json::from_value(serde_json::Value::String(backend.clone()))
                .map_err(|_| anyhow!("unknown resolver backend: {}", backend))?,
        );
    }
    if has_flag("--repair") {
        resolver.repair = Some(true);
    }
    if resolver.path.is_some() || resolver.backend.is_some() || resolver.repair.is_some() {
        overrides.resolver = Some(resolver);
    }

    if has_flag("--fuzzy") {
        overrides.index = Some(IndexOverrides { fuzzy: Some(true) });
    }
    if let Some(limit) = parse_arg("--limit") {
        overrides.xref = Some(RunOverrides {
            limit: Some(limit.parse().context("--limit must be a number")?),
        });
    }
    if let Some(path) = parse_arg("--statements") {
        overrides.statements = Some(StatementsOverrides {
            path: Some(path.into()),
        });
    }
    Ok(overrides)
}

fn open_resolver(config: &XrefConfig) -> anyhow::Result<Resolver> {
    let store = config.resolver.open_store()?;
    Ok(Resolver::load(store)?.with_policy(config.prune_policy()))
}

async fn cmd_run(config: &XrefConfig) -> anyhow::Result<()> {
    let dataset_name = parse_arg("--dataset")
        .or_else(|| parse_arg("-d"))
        .ok_or_else(|| anyhow!("run requires --dataset"))?;
    let dataset = config.dataset(&dataset_name);
    let model = match parse_arg("--schema") {
        Some(path) => SchemaModel::from_json_file(path)?,
        None => SchemaModel::default(),
    };
    let source = MemoryStatementStore::open_jsonl(&config.statements.path)?;
    info!(statements = source.len(), path = %config.statements.path.display(), "Loaded statements");

    let mut resolver = open_resolver(config)?;
    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current pair");
            let _ = cancel_tx.send(true);
        }
    });

    let summary = entity_xref::xref::run_dataset(
        &source,
        &dataset,
        &mut resolver,
        &model,
        &config.xref_options(),
        Some(cancel_rx),
    )
    .await?;
    println!(
        "{}: {} suggested from {} candidates ({} evaluated, {} missing, {} timed out, {} schema, {} judged){}",
        dataset.name,
        summary.suggested,
        summary.candidates,
        summary.evaluated,
        summary.skipped_missing,
        summary.skipped_timeout,
        summary.skipped_schema,
        summary.skipped_judged,
        if summary.cancelled { " [cancelled]" } else { "" }
    );
    Ok(())
}

fn cmd_decide(config: &XrefConfig, args: &[String]) -> anyhow::Result<()> {
    let [left, right, verdict] = args else {
        bail!("usage: xref decide <ID> <ID> confirm|reject");
    };
    let judgement = match verdict.as_str() {
        "confirm" | "confirmed" => Judgement::Confirmed,
        "reject" | "rejected" => Judgement::Rejected,
        other => bail!("unknown decision: {}", other),
    };
    let score = parse_arg("--score")
        .map(|score| score.parse::<f64>())
        .transpose()
        .context("--score must be a number")?;

    let mut resolver = open_resolver(config)?;
    resolver.decide(left, right, judgement, score)?;
    resolver.save()?;
    println!(
        "{} / {}: {} (canonical {})",
        left,
        right,
        judgement,
        resolver.canonicalize(left)
    );
    Ok(())
}

fn cmd_canonical(config: &XrefConfig, args: &[String]) -> anyhow::Result<()> {
    let [id] = args else {
        bail!("usage: xref canonical <ID>");
    };
    let mut resolver = open_resolver(config)?;
    println!("{}", resolver.canonicalize(id));
    for member in resolver.connected(id) {
        if &member != id {
            println!("  {}", member);
        }
    }
    Ok(())
}

fn cmd_prune(config: &XrefConfig) -> anyhow::Result<()> {
    let mut resolver = open_resolver(config)?;
    let removed = resolver.prune();
    resolver.save()?;
    println!("pruned {} pending edges, {} edges remain", removed, resolver.len());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let positional = positional_args();
    if has_flag("-h") || has_flag("--help") || positional.is_empty() {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load config: CLI > Env > File > Defaults
    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("XREF_CONFIG").ok());
    let config = XrefConfig::load(config_path.as_deref(), build_overrides()?)?;

    let (command, args) = positional.split_at(1);
    match command[0].as_str() {
        "run" => cmd_run(&config).await,
        "decide" => cmd_decide(&config, args),
        "canonical" => cmd_canonical(&config, args),
        "prune" => cmd_prune(&config),
        other => {
            print_help();
            bail!("unknown command: {}", other)
        }
    }
}
