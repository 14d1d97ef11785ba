mod output;
mod telemetry;

use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use otelly_core::config::Config;
use otelly_core::layout::{flamegraph, waterfall};
use otelly_core::model::{Log, SpanWithResource};
use otelly_core::trace::build_tree;
use otelly_ingest::server::run_ingest_servers;
use otelly_ingest::{Bus, Pipeline, PipelineConfig, Subscriber};
use otelly_store::Store;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::output::{Printer, severity_colored, ts};
use crate::telemetry::{init_cli_tracing, init_run_tracing, shutdown_tracing};

#[derive(Parser, Debug)]
#[command(name = "otelly")]
#[command(about = "Local OpenTelemetry trace and log viewer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, help = "Print JSON instead of text")]
    json: bool,

    #[arg(long, global = true, help = "DuckDB file to read or write")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Receive OTLP traces and logs and store them")]
    Run(RunArgs),
    #[command(about = "List root spans, newest first")]
    Traces {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    #[command(about = "Show one trace as a tree with a waterfall or a flamegraph")]
    Trace {
        trace_id: String,
        #[arg(long, help = "Columns used for bars (defaults to render_width)")]
        width: Option<usize>,
        #[arg(long)]
        flamegraph: bool,
    },
    #[command(about = "Show one span with its resource and attributes")]
    Span { span_id: String },
    #[command(about = "Spans per minute for a resource, or the resource list")]
    History { resource_id: Option<String> },
    #[command(about = "Show stored logs, newest first")]
    Logs {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    #[command(about = "Show store size and row counts")]
    Status,
    #[command(about = "Delete stored data")]
    Clear {
        #[arg(long, help = "Only delete logs")]
        logs: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long)]
    otlp_grpc_addr: Option<String>,
    #[arg(long)]
    otlp_http_addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = Config::load().context("load config")?;
    if let Some(path) = cli.db_path {
        cfg.db_path = path;
    }

    match cli.command {
        Commands::Run(args) => run_server(cfg, args).await,
        command => {
            init_cli_tracing();
            let store = open_store(&cfg)?;
            let color = !cli.json
                && std::io::stdout().is_terminal()
                && std::env::var_os("NO_COLOR").is_none();
            let mut printer = Printer::new(std::io::stdout().lock(), color, cfg.render_width);
            run_query(&store, command, cli.json, &cfg, &mut printer)
        }
    }
}

fn open_store(cfg: &Config) -> anyhow::Result<Store> {
    Store::open(&cfg.db_path).with_context(|| {
        format!(
            "open store at {} (a running `otelly run` holds the file lock)",
            cfg.db_path.display()
        )
    })
}

fn run_query<W: std::io::Write>(
    store: &Store,
    command: Commands,
    json: bool,
    cfg: &Config,
    printer: &mut Printer<W>,
) -> anyhow::Result<()> {
    match command {
        Commands::Run(_) => anyhow::bail!("`run` does not read the store"),
        Commands::Traces { limit } => {
            let mut roots = store.get_root_spans()?;
            roots.truncate(limit);
            if json {
                return print_json(&roots);
            }
            printer.traces(&roots)?;
        }
        Commands::Trace {
            trace_id,
            width,
            flamegraph,
        } => {
            let spans = store.get_spans_for_trace(&trace_id)?;
            if spans.is_empty() {
                anyhow::bail!("trace {trace_id} not found");
            }
            let tree = build_tree(&spans).with_context(|| format!("rebuild trace {trace_id}"))?;
            let flame = flamegraph::from_tree(&tree)?;
            if json {
                let columns = width.unwrap_or(cfg.render_width);
                return print_json(&TraceView {
                    trace_id: &trace_id,
                    spans: &spans,
                    waterfall: waterfall::layout_spans(&spans, columns),
                    flamegraph: flame,
                });
            }
            if let Some(columns) = width {
                printer.set_width(columns);
            }
            if flamegraph {
                printer.flamegraph(&flame)?;
            } else {
                printer.trace(&tree)?;
            }
        }
        Commands::Span { span_id } => {
            let span = store.get_span_with_resource(&span_id)?;
            if json {
                return print_json(&span);
            }
            printer.span(&span)?;
        }
        Commands::History { resource_id: None } => {
            let resources = store.list_resources()?;
            if json {
                return print_json(&resources);
            }
            printer.resources(&resources)?;
        }
        Commands::History {
            resource_id: Some(resource_id),
        } => {
            let resource = store.get_resource(&resource_id)?;
            let buckets = store.spans_per_minute_for_resource(&resource_id)?;
            if json {
                return print_json(&buckets);
            }
            printer.history(&resource, &buckets)?;
        }
        Commands::Logs { limit } => {
            let logs = store.get_logs(limit)?;
            if json {
                return print_json(&logs);
            }
            printer.logs(&logs)?;
        }
        Commands::Status => {
            let status = store.status()?;
            if json {
                return print_json(&status);
            }
            printer.status_report(&status)?;
        }
        Commands::Clear { logs } => {
            if logs {
                store.clear_logs().context("clear logs")?;
            } else {
                store.clear().context("clear store")?;
            }
            if !json {
                println!("cleared {}", if logs { "logs" } else { "all data" });
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct TraceView<'a> {
    trace_id: &'a str,
    spans: &'a [SpanWithResource],
    waterfall: Vec<waterfall::WaterfallBar>,
    flamegraph: flamegraph::FlamegraphNode,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_server(mut cfg: Config, args: RunArgs) -> anyhow::Result<()> {
    if let Some(v) = args.otlp_grpc_addr {
        cfg.otlp_grpc_addr = v;
    }
    if let Some(v) = args.otlp_http_addr {
        cfg.otlp_http_addr = v;
    }

    let grpc_addr: SocketAddr = cfg
        .otlp_grpc_addr
        .parse()
        .with_context(|| format!("invalid OTLP gRPC address {}", cfg.otlp_grpc_addr))?;
    let http_addr: SocketAddr = cfg
        .otlp_http_addr
        .parse()
        .with_context(|| format!("invalid OTLP HTTP address {}", cfg.otlp_http_addr))?;

    let store = open_store(&cfg)?;
    init_run_tracing();

    eprintln!("otelly run");
    eprintln!("  db: {}", cfg.db_path.display());
    eprintln!("  ingest grpc: {grpc_addr}");
    eprintln!("  ingest http: {http_addr}");

    let cancel = CancellationToken::new();
    let bus = Bus::new();
    let color = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    let consumer = tokio::spawn(live_updates(
        store.clone(),
        bus.spans.subscribe(),
        bus.logs.subscribe(),
        cancel.clone(),
        color,
    ));

    let pipeline = Pipeline::new(
        store,
        bus,
        PipelineConfig::from(&cfg),
        cancel.clone(),
    );
    let mut servers = tokio::spawn(run_ingest_servers(
        pipeline.clone(),
        grpc_addr,
        http_addr,
        cancel.clone(),
    ));

    let served = tokio::select! {
        res = &mut servers => Some(res),
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            None
        }
    };

    cancel.cancel();
    pipeline.shutdown().await;
    let served = match served {
        Some(res) => res,
        None => servers.await,
    };
    if let Err(e) = consumer.await {
        warn!(error = %e, "live update consumer failed");
    }
    shutdown_tracing();

    served
        .context("ingest server task failed")?
        .context("ingest servers stopped")?;
    Ok(())
}

/// Announces each bus delivery. A span update that starts a trace triggers a
/// fresh root span query.
async fn live_updates(
    store: Store,
    mut spans: Subscriber<Vec<SpanWithResource>>,
    mut logs: Subscriber<Vec<Log>>,
    cancel: CancellationToken,
    color: bool,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            update = spans.recv() => {
                let Some(update) = update else { break };
                info!(spans = update.len(), "spans stored");
                if update.iter().any(|span| span.is_root()) {
                    refresh_traces(&store).await;
                }
            }
            update = logs.recv() => {
                let Some(update) = update else { break };
                for log in &update {
                    println!(
                        "{} {} {} | {}",
                        ts(log.timestamp),
                        log.resource_id,
                        severity_colored(log.severity_number, &log.severity_text, color),
                        log.body
                    );
                }
            }
        }
    }
    debug!("live update consumer stopped");
}

async fn refresh_traces(store: &Store) {
    let store = store.clone();
    match tokio::task::spawn_blocking(move || store.get_root_spans()).await {
        Ok(Ok(roots)) => {
            let newest = roots.first().map(|root| root.trace_id.clone());
            info!(traces = roots.len(), newest = ?newest, "trace list refreshed");
        }
        Ok(Err(e)) => warn!(error = %e, "failed to refresh trace list"),
        Err(e) => warn!(error = %e, "trace list refresh panicked"),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use testkit::checkout_spans;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_trace_flags() {
        let cli = Cli::parse_from(["otelly", "trace", "abc", "--width", "40", "--flamegraph"]);
        match cli.command {
            Commands::Trace {
                trace_id,
                width,
                flamegraph,
            } => {
                assert_eq!(trace_id, "abc");
                assert_eq!(width, Some(40));
                assert!(flamegraph);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn trace_command_renders_stored_trace() {
        let store = Store::open_in_memory().unwrap();
        store.insert_spans(&checkout_spans("t1")).unwrap();
        let cfg = Config::default();
        let mut printer = Printer::new(Vec::new(), false, 40);

        run_query(
            &store,
            Commands::Trace {
                trace_id: "t1".into(),
                width: None,
                flamegraph: false,
            },
            false,
            &cfg,
            &mut printer,
        )
        .unwrap();

        let text = String::from_utf8(printer.into_inner()).unwrap();
        assert!(text.starts_with("TRACE t1 duration=1000ms spans=3 errors=0\n"));
        assert!(text.contains("    charge "));
    }

    #[test]
    fn missing_trace_is_an_error() {
        let store = Store::open_in_memory().unwrap();
        let mut printer = Printer::new(Vec::new(), false, 40);

        let err = run_query(
            &store,
            Commands::Trace {
                trace_id: "nope".into(),
                width: None,
                flamegraph: true,
            },
            false,
            &Config::default(),
            &mut printer,
        )
        .unwrap_err();
        assert!(err.to_string().contains("trace nope not found"));
    }

    #[tokio::test]
    async fn live_consumer_stops_on_cancel() {
        let store = Store::open_in_memory().unwrap();
        let bus = Bus::new();
        let cancel = CancellationToken::new();
        let consumer = tokio::spawn(live_updates(
            store,
            bus.spans.subscribe(),
            bus.logs.subscribe(),
            cancel.clone(),
            false,
        ));

        cancel.cancel();
        consumer.await.unwrap();
        assert_eq!(bus.spans.subscriber_count(), 0);
    }
}
