use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::mpsc;

use rootrace_store::{
    ensure_gitignore_entry, export_logs, save_export, store_path_for, ExportOptions, LockManager,
    LogEntry, LogStore, LogStoreEvent, ReadMode, StoreConfig,
};

use crate::cli_args::{AddArgs, Cli, CliCommand, QueryArgs, WatchArgs};

/// Environment defaults first, then explicit flags.
pub(crate) fn resolve_store_config(cli: &Cli) -> StoreConfig {
    let mut config = StoreConfig::from_env();
    if let Some(workspace) = &cli.workspace {
        config.store_path = store_path_for(workspace);
        config.workspace_root = workspace.clone();
    }
    if let Some(max_logs) = cli.max_logs {
        config.max_logs = max_logs;
    }
    if let Some(format) = cli.store_format {
        config.format = format.into();
    }
    config
}

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let config = resolve_store_config(&cli);
    let store = LogStore::open(&config, Arc::new(LockManager::new()))
        .await
        .with_context(|| format!("failed to open log store {}", config.store_path.display()))?;

    match cli.command {
        CliCommand::Add(args) => execute_add(&store, &config, args).await,
        CliCommand::Query(args) => execute_query(&store, &config, args).await,
        CliCommand::Count => {
            println!("{}", store.count());
            Ok(())
        }
        CliCommand::Clear => {
            store.clear().await.context("failed to clear log store")?;
            println!("cleared: path={}", store.path().display());
            Ok(())
        }
        CliCommand::Hypotheses => {
            for hypothesis in store.hypotheses() {
                println!(
                    "{}\t{}\t{}",
                    hypothesis.id,
                    hypothesis.status.as_str(),
                    hypothesis.description
                );
            }
            Ok(())
        }
        CliCommand::Watch(args) => execute_watch(store, &config, args).await,
    }
}

async fn execute_add(store: &LogStore, config: &StoreConfig, args: AddArgs) -> Result<()> {
    if !store.path().exists() {
        ensure_gitignore_entry(&config.workspace_root);
    }
    let data = args.data.as_deref().map(parse_data).unwrap_or(Value::Null);
    let entry = match args.timestamp {
        Some(timestamp) => LogEntry::with_timestamp(
            timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            args.source,
            args.context,
            data,
        ),
        None => LogEntry::new(args.source, args.context, data),
    };
    let source = entry.source_id.clone();
    store.add(entry).await.context("failed to append log entry")?;
    println!("added: source={source} entries={}", store.count());
    Ok(())
}

fn parse_data(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn execute_query(store: &LogStore, config: &StoreConfig, args: QueryArgs) -> Result<()> {
    let mode = if args.local {
        ReadMode::Local
    } else {
        ReadMode::Authoritative
    };
    let entries = match (args.sources.as_slice(), args.since, args.until) {
        ([source], None, None) => store.query_by_source(source, mode).await,
        ([], Some(start), Some(end)) => store.query_by_date_range(start, end, mode).await,
        _ => store.query(mode).await,
    };
    let options = ExportOptions {
        format: args.format.into(),
        source_ids: args.sources,
        start: args.since,
        end: args.until,
        include_metadata: args.metadata,
    };
    let rendered = export_logs(&entries, &options).context("failed to render logs")?;
    match args.output {
        Some(filename) => {
            let path = save_export(
                &config.workspace_root,
                &rendered,
                options.format,
                filename.as_deref(),
            )
            .context("failed to save log export")?;
            println!("exported: path={} format={}", path.display(), options.format);
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

async fn execute_watch(store: LogStore, config: &StoreConfig, args: WatchArgs) -> Result<()> {
    let mut watch = config.watch;
    if let Some(interval_ms) = args.interval_ms {
        watch.poll_interval = Duration::from_millis(interval_ms);
    }
    if let Some(debounce_ms) = args.debounce_ms {
        watch.debounce = Duration::from_millis(debounce_ms);
    }

    let store = Arc::new(store);
    let (update_tx, mut update_rx) = mpsc::unbounded_channel::<usize>();
    let subscription = store.subscribe(move |event| {
        if let LogStoreEvent::LogsUpdated(entries) = event {
            let _ = update_tx.send(entries.len());
        }
    });
    let mut watcher = store
        .start_watcher(watch)
        .context("failed to start store watcher")?;

    print_flushed(&format!(
        "watching: path={} entries={}",
        store.path().display(),
        store.count()
    ))?;

    let mut updates = 0_usize;
    loop {
        tokio::select! {
            received = update_rx.recv() => {
                let Some(entries) = received else {
                    break;
                };
                updates = updates.saturating_add(1);
                print_flushed(&format!("logs_updated: entries={entries}"))?;
                if args.max_updates.is_some_and(|limit| updates >= limit) {
                    break;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                break;
            }
        }
    }

    watcher.stop().await;
    store.unsubscribe(subscription);
    Ok(())
}

fn print_flushed(line: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}").context("failed to write to stdout")?;
    stdout.flush().context("failed to flush stdout")
}
