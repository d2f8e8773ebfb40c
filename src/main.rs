//! fleetctl - operate a model fleet from the terminal

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use model_fleet::{
    ClientConfig, Engine, ExpandedResults, FleetController, FleetFilter, HttpGateway, ModelStatus,
    Page, SortDirection, SortKey, SortState, StartConfig, StartParameters, UsageType, logs, metrics,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "fleetctl")]
#[command(about = "Manage inference model containers through the model gateway", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override gateway URL
    #[arg(long, global = true)]
    gateway: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty", global = true)]
    log_format: String,

    /// Serve Prometheus metrics on this port while the command runs
    #[arg(long, global = true)]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List models
    List(ListArgs),
    /// Start a new model instance
    Start(StartArgs),
    /// Stop a running model
    Stop { id: String },
    /// Restart a stopped or failed model
    Restart { id: String },
    /// Remove one or more models
    Remove {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Show container logs
    Logs {
        id: String,
        /// Only the last N lines
        #[arg(long, conflicts_with_all = ["start", "end"])]
        tail: Option<usize>,
        /// First line (negative counts from the end)
        #[arg(long, allow_hyphen_values = true)]
        start: Option<i64>,
        /// End line, exclusive (negative counts from the end)
        #[arg(long, allow_hyphen_values = true)]
        end: Option<i64>,
    },
    /// Send a test prompt to several models at once
    Test {
        #[arg(short, long)]
        prompt: String,
        /// Models to test; defaults to every running model of --usage
        ids: Vec<String>,
        #[arg(long, default_value = "generation")]
        usage: UsageType,
        /// Print full embeddings instead of a preview
        #[arg(long)]
        full: bool,
    },
    /// Follow container info for models until interrupted
    Watch {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Substring of the model name
    #[arg(long, default_value = "")]
    search: String,
    #[arg(long)]
    status: Option<ModelStatus>,
    #[arg(long)]
    engine: Option<Engine>,
    #[arg(long)]
    usage: Option<UsageType>,
    /// name, status, engine or createdAt
    #[arg(long)]
    sort: Option<SortKey>,
    /// Sort descending
    #[arg(long)]
    desc: bool,
    #[arg(long, default_value_t = 1)]
    page: usize,
}

#[derive(Args, Debug)]
struct StartArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    engine: Engine,
    #[arg(long)]
    usage: UsageType,
    /// Comma-separated GPU devices, e.g. "0,1"
    #[arg(long)]
    gpu: Option<String>,
    #[arg(long, env = "HUGGINGFACE_TOKEN", hide_env_values = true)]
    hf_token: Option<String>,
    #[arg(long)]
    max_tokens: Option<u32>,
    #[arg(long)]
    temperature: Option<f32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; stdout is reserved for command output
    match cli.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    let mut config = ClientConfig::load(cli.config)?;

    // CLI overrides
    if let Some(gateway) = cli.gateway {
        config.gateway_url = gateway;
    }

    config.validate()?;

    tracing::info!(
        gateway_url = %config.gateway_url,
        timeout_secs = config.request_timeout_secs,
        "Configuration loaded"
    );

    if let Some(port) = cli.metrics_port {
        metrics::setup_metrics(SocketAddr::from(([0, 0, 0, 0], port)))?;
    }

    let gateway = HttpGateway::from_config(&config).context("Failed to create gateway client")?;
    let controller = Arc::new(FleetController::new(gateway, config));

    match cli.command {
        Command::List(args) => list(&controller, args).await,
        Command::Start(args) => start(&controller, args).await,
        Command::Stop { id } => {
            controller.refresh().await?;
            controller.stop(&id).await?;
            println!("Stop requested for {}", id);
            Ok(())
        }
        Command::Restart { id } => {
            controller.refresh().await?;
            controller.restart(&id).await?;
            println!("Restart requested for {}", id);
            Ok(())
        }
        Command::Remove { ids, yes } => remove(&controller, ids, yes).await,
        Command::Logs {
            id,
            tail,
            start,
            end,
        } => {
            let slice = match tail {
                Some(n) => logs::tail(controller.logs(&id, None, None).await?.lines, n),
                None => controller.logs(&id, start, end).await?,
            };
            for line in &slice.lines {
                println!("{}", line);
            }
            Ok(())
        }
        Command::Test {
            prompt,
            ids,
            usage,
            full,
        } => test(&controller, prompt, ids, usage, full).await,
        Command::Watch { ids } => watch(controller, ids).await,
    }
}

type Controller = FleetController<HttpGateway>;

async fn list(controller: &Controller, args: ListArgs) -> Result<()> {
    controller.refresh().await?;

    let filter = FleetFilter {
        search: args.search,
        status: args.status,
        engine: args.engine,
        usage: args.usage,
    };
    let sort = match args.sort {
        Some(key) => SortState::new(
            key,
            if args.desc {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            },
        ),
        None => SortState::default(),
    };
    let page = Page::new(args.page, controller.config().page_size);

    let view = controller.view(&filter, sort, page).await;

    println!(
        "{:<38} {:<28} {:<7} {:<11} {:<9} {:<20} ACTIONS",
        "ID", "NAME", "ENGINE", "USAGE", "STATUS", "CREATED"
    );
    for row in &view.rows {
        let status = if row.stalled {
            format!("{}*", row.display_status)
        } else {
            row.display_status.to_string()
        };
        let actions: Vec<&str> = row.enabled_actions().iter().map(|a| a.as_str()).collect();
        println!(
            "{:<38} {:<28} {:<7} {:<11} {:<9} {:<20} {}",
            row.model.id,
            row.model.name,
            row.model.engine,
            row.model.usage_type,
            status,
            row.model.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            actions.join(",")
        );
    }
    println!(
        "page {}/{} ({} models)",
        view.page.number,
        view.total_pages.max(1),
        view.total
    );

    for pending in controller.pending_starts().await {
        println!("starting: {} ({})", pending.name, pending.engine);
    }

    Ok(())
}

async fn start(controller: &Controller, args: StartArgs) -> Result<()> {
    let parameters = StartParameters {
        huggingface_token: args.hf_token,
        max_tokens: args.max_tokens,
        temperature: args.temperature,
    };
    let config = StartConfig {
        gpu_id: args.gpu,
        parameters: (parameters != StartParameters::default()).then_some(parameters),
        ..StartConfig::new(args.name, args.engine, args.usage)
    };

    let name = config.name.clone();
    controller.start(config).await?;
    println!("Start requested for {}; it will appear once the gateway lists it", name);
    Ok(())
}

async fn remove(controller: &Controller, ids: Vec<String>, yes: bool) -> Result<()> {
    controller.refresh().await?;

    let plan = controller.plan_removal(ids)?;
    let question = format!("Remove {} model(s): {}?", plan.len(), plan.ids().join(", "));
    if !yes && !confirm(&question).await? {
        println!("Aborted");
        return Ok(());
    }

    let outcome = controller.bulk_remove(plan.confirm()).await?;
    println!("{}", outcome.summary());

    if !outcome.is_success() {
        anyhow::bail!("{} model(s) could not be removed", outcome.failed.len());
    }
    Ok(())
}

/// Confirmation gate for destructive bulk actions
async fn confirm(question: &str) -> Result<bool> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("{} [y/N] ", question).as_bytes())
        .await?;
    stdout.flush().await?;

    let mut answer = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut answer)
        .await
        .context("Failed to read confirmation")?;

    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

async fn test(
    controller: &Controller,
    prompt: String,
    ids: Vec<String>,
    usage: UsageType,
    full: bool,
) -> Result<()> {
    controller.refresh().await?;

    let ids = if ids.is_empty() {
        controller
            .test_candidates(usage)
            .await
            .into_iter()
            .map(|m| m.id)
            .collect()
    } else {
        ids
    };

    let run = controller.run_tests(&ids, &prompt).await?;

    let mut expanded = ExpandedResults::new();
    if full {
        for result in run.iter() {
            expanded.toggle(&result.model_id);
        }
    }

    let limit = controller.config().embedding_preview_len;
    for result in run.iter() {
        println!("== {} ({}, {})", result.model_name, result.model_id, result.usage);
        println!("{}", expanded.render(result, limit));
    }
    println!(
        "{} of {} models answered",
        run.succeeded_count(),
        run.len()
    );
    Ok(())
}

async fn watch(controller: Arc<Controller>, ids: Vec<String>) -> Result<()> {
    let refresh = controller.spawn_auto_refresh(controller.config().registry_poll_interval());

    let mut printers = Vec::with_capacity(ids.len());
    for id in ids {
        let mut rx = controller.watch_container(&id);
        printers.push(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                match (&state.data, &state.error) {
                    (_, Some(error)) => println!("{}: error: {}", id, error),
                    (Some(info), None) => println!(
                        "{}: container={} image={} port={} gpu={}",
                        id,
                        info.container_id.as_deref().unwrap_or("-"),
                        info.image.as_deref().unwrap_or("-"),
                        info.port.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                        info.gpu_id.as_deref().unwrap_or("-"),
                    ),
                    (None, None) => {}
                }
            }
        }));
    }

    shutdown_signal().await;

    refresh.cancel();
    controller.containers().unwatch_all();
    for printer in printers {
        printer.abort();
    }

    tracing::info!("Watch stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
