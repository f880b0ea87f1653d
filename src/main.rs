// Flow Monitor - find the cloud flows behind a Dataverse record
//
// Command-line front end: scans an organization's cloud flows for one entity,
// lists a flow's latest runs, and streams the runs that mention a record.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, RwLock};

use flow_monitor::bridge::{self, BridgeHandler, BridgeRunApi};
use flow_monitor::client::{
    ApiClient, ApiClientConfig, DataPlatform, DataverseClient, FlowServiceClient, InteractiveTokenProvider,
    RunHistoryApi, StaticTokenProvider, TokenCache, TokenProvider,
};
use flow_monitor::config::auth::{AuthSetupGuide, SetupAction};
use flow_monitor::config::{ConfigManager, FlowMonitorConfig, LogLevel};
use flow_monitor::flow::scanner::EMPTY_PLACEHOLDER;
use flow_monitor::flow::{scan_all, ClassifiedRow, RowDetail, RowFilter, ScanContext, StatusFilter};
use flow_monitor::runs::stream::{SearchRequest, SearchSession};
use flow_monitor::runs::{list_all_runs_for_flow, RecordMatcher, RunSearch, SearchEvent};
use flow_monitor::FlowMonitorError;

/// Flow Monitor - which cloud flows touch this record?
#[derive(Parser)]
#[command(name = "flow-monitor")]
#[command(about = "Shows the Power Automate cloud flows that trigger on, update, or read a Dataverse entity")]
#[command(version)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify every cloud flow against an entity
    Scan {
        /// Entity logical name, e.g. account
        entity: String,
        /// Row status filter: all, active or draft
        #[arg(long, default_value = "all")]
        status: StatusFilter,
        /// Case-insensitive text filter
        #[arg(long, default_value = "")]
        query: String,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Latest runs of a flow from the data platform
    Runs {
        /// Maker id of the flow
        flow_id: String,
        /// Id tried when the maker id has no runs
        #[arg(long)]
        fallback: Option<String>,
        /// Only runs with this status, e.g. Failed
        #[arg(long)]
        status: Option<String>,
    },
    /// Stream the runs of a flow that mention a record (Ctrl-C stops)
    RecordRuns {
        /// Maker id of the flow
        flow_id: String,
        /// Record id, with or without braces
        #[arg(long)]
        record: String,
        /// Primary display value of the record
        #[arg(long)]
        primary_value: Option<String>,
        /// Id tried when the maker id has no runs
        #[arg(long)]
        fallback: Option<String>,
        /// OData filter for the run listing, e.g. "status eq 'Failed'"
        #[arg(long)]
        filter: Option<String>,
        /// Route API calls through the in-process message bridge
        #[arg(long)]
        via_bridge: bool,
    },
    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration and validation results
    Show,
    /// Set one key and save
    Set { key: String, value: String },
    /// Validate and save the app registration
    SaveCredentials {
        #[arg(long)]
        client_id: String,
        #[arg(long)]
        tenant_id: Option<String>,
    },
    /// Print setup instructions for missing settings
    Setup,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut manager = ConfigManager::new().await?;
    init_logging(manager.config().log_level, args.verbose, args.log_json)?;

    let outcome = match args.command {
        Command::Scan {
            entity,
            status,
            query,
            json,
        } => run_scan(manager.config(), &entity, RowFilter::new(status, query), json).await,
        Command::Runs {
            flow_id,
            fallback,
            status,
        } => run_bulk(manager.config(), &flow_id, fallback.as_deref(), status.as_deref()).await,
        Command::RecordRuns {
            flow_id,
            record,
            primary_value,
            fallback,
            filter,
            via_bridge,
        } => {
            let request = SearchRequest::new(manager.config().environment_id.clone(), flow_id)
                .with_fallback(fallback)
                .with_filter(filter)
                .with_max_concurrent_probes(manager.config().max_concurrent_probes);
            let matcher = RecordMatcher::new(&record, primary_value.as_deref());
            run_record_search(manager, request, matcher, via_bridge).await
        }
        Command::Config { action } => run_config(&mut manager, action).await,
    };

    if let Err(e) = &outcome {
        if let Some(error) = e.downcast_ref::<FlowMonitorError>() {
            if error.needs_configuration() {
                eprintln!("{}\n", error.user_message());
                print_setup_instructions(&ConfigManager::new().await?.config().clone());
            }
        }
    }
    outcome
}

/// Token cache for orchestration API calls
fn flow_tokens(shared: &Arc<RwLock<FlowMonitorConfig>>, config: &FlowMonitorConfig) -> TokenCache {
    let provider: Arc<dyn TokenProvider> = match &config.access_token {
        Some(token) => Arc::new(StaticTokenProvider::new(token.clone())),
        None => Arc::new(InteractiveTokenProvider::new(shared.clone())),
    };
    TokenCache::new(provider)
}

/// Token cache for Dataverse calls, scoped to the organization
fn dataverse_tokens(config: &FlowMonitorConfig, org_url: &str) -> TokenCache {
    let provider: Arc<dyn TokenProvider> = match &config.dataverse_token {
        Some(token) => Arc::new(StaticTokenProvider::new(token.clone())),
        None => {
            let mut scoped = config.clone();
            scoped.scope = format!("{}/.default", org_url.trim_end_matches('/'));
            Arc::new(InteractiveTokenProvider::new(Arc::new(RwLock::new(scoped))))
        }
    };
    TokenCache::new(provider)
}

fn dataverse_client(config: &FlowMonitorConfig) -> Result<DataverseClient> {
    let org_url = config
        .org_url
        .as_deref()
        .filter(|url| !url.is_empty())
        .ok_or_else(|| FlowMonitorError::Config("Organization URL not configured".to_string()))?;
    let api = ApiClient::with_config(dataverse_tokens(config, org_url), ApiClientConfig::from(config))?;
    Ok(DataverseClient::new(api, org_url))
}

async fn run_scan(config: &FlowMonitorConfig, entity: &str, filter: RowFilter, json: bool) -> Result<()> {
    let platform = dataverse_client(config)?;
    let ctx = ScanContext::new(config.environment_id.clone()).with_maker_base_url(config.maker_base_url.clone());

    let entity_set = platform.entity_set_name(entity).await;
    let flows = platform.fetch_cloud_flows().await?;
    tracing::info!("Scanning {} flows for {} ({})", flows.len(), entity, entity_set);
    let report = scan_all(&flows, entity, &entity_set, &ctx);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for (title, rows) in [
        ("Triggers", &report.triggers),
        ("Updates", &report.updates),
        ("Retrieves", &report.retrieves),
    ] {
        let visible = filter.apply(rows);
        println!("{} ({} of {})", title, visible.len(), rows.len());
        for row in visible {
            print_row(row);
        }
        println!();
    }
    Ok(())
}

fn print_row(row: &ClassifiedRow) {
    let summary = &row.summary;
    let detail = match &row.detail {
        RowDetail::Trigger { change_type } => format!("on {}", change_type),
        RowDetail::Update { operations, fields } => format!("{} [{}]", operations, fields),
        RowDetail::Retrieve { operations, columns } => format!("{} [{}]", operations, columns),
    };
    let system = if summary.is_system { " (system)" } else { "" };
    println!("  {} [{}]{} {}", summary.name, summary.status, system, detail);
    let link: &str = if summary.run_history_url.is_empty() {
        EMPTY_PLACEHOLDER
    } else {
        &summary.run_history_url
    };
    println!("    {}  {}", summary.flow_id_maker, link);
}

async fn run_bulk(config: &FlowMonitorConfig, flow_id: &str, fallback: Option<&str>, status: Option<&str>) -> Result<()> {
    let platform = dataverse_client(config)?;
    let ctx = ScanContext::new(config.environment_id.clone()).with_maker_base_url(config.maker_base_url.clone());

    let runs = list_all_runs_for_flow(&platform, flow_id, fallback, status).await;
    if runs.is_empty() {
        println!("No runs found");
    }
    for run in runs {
        let started = run
            .start_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| EMPTY_PLACEHOLDER.to_string());
        println!("  {} {:<10} {}  {}", run.name, run.status.as_str(), started, ctx.run_url(flow_id, &run.name));
    }
    Ok(())
}

async fn run_record_search(
    manager: ConfigManager,
    request: SearchRequest,
    matcher: RecordMatcher,
    via_bridge: bool,
) -> Result<()> {
    let config = manager.config().clone();
    let shared = Arc::new(RwLock::new(config.clone()));
    let api = ApiClient::with_config(flow_tokens(&shared, &config), ApiClientConfig::from(&config))?;
    let flow_service = FlowServiceClient::with_base_url(api.clone(), config.flow_api_base.clone());

    let runs: Arc<dyn RunHistoryApi> = if via_bridge {
        let handler = BridgeHandler::new(api, flow_service, manager, shared);
        let client = bridge::connect_local(handler, Duration::from_millis(config.bridge_timeout_millis));
        Arc::new(BridgeRunApi::with_base_url(client, config.flow_api_base.clone()))
    } else {
        Arc::new(flow_service)
    };

    let ctx = ScanContext::new(config.environment_id.clone()).with_maker_base_url(config.maker_base_url.clone());
    let search = RunSearch::new(runs, matcher);
    let mut session = SearchSession::new();
    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Stopping search after the current page");
            cancel.cancel();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = tokio::spawn(async move {
        search.run(&mut session, &request, &tx).await;
    });

    let mut failure = None;
    while let Some(event) = rx.recv().await {
        match event {
            SearchEvent::RunFound { run, flow_id } => {
                println!("  ✓ {} {}  {}", run.name, run.status, ctx.run_url(&flow_id, &run.name));
            }
            SearchEvent::Progress { scanned, has_more } => {
                eprintln!("  … {} runs scanned{}", scanned, if has_more { "" } else { ", done" });
            }
            SearchEvent::Error(e) => {
                eprintln!("  ✗ {}", e.user_message());
                failure = Some(e);
            }
            SearchEvent::Finished { scanned, cancelled } => {
                println!(
                    "\nSearch {} after {} runs",
                    if cancelled { "cancelled" } else { "finished" },
                    scanned
                );
            }
        }
    }
    worker.await.context("Run search task failed")?;

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

async fn run_config(manager: &mut ConfigManager, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("Configuration file: {}", manager.config_file().display());
            println!("{}", toml::to_string_pretty(manager.config())?);
            let validation = manager.validate();
            for error in &validation.errors {
                println!("error: {}", error);
            }
            for warning in &validation.warnings {
                println!("warning: {}", warning);
            }
        }
        ConfigAction::Set { key, value } => {
            manager.set(&key, &value).await?;
            println!("Saved {}", key);
        }
        ConfigAction::SaveCredentials {
            client_id,
            tenant_id,
        } => {
            manager
                .save_credentials(&client_id, tenant_id.as_deref())
                .await?;
            println!("Saved app registration to {}", manager.config_file().display());
        }
        ConfigAction::Setup => print_setup_instructions(manager.config()),
    }
    Ok(())
}

fn print_setup_instructions(config: &FlowMonitorConfig) {
    let instructions = AuthSetupGuide::generate_setup_instructions(config);
    for (index, step) in instructions.steps.iter().enumerate() {
        let marker = if step.required { "" } else { " (optional)" };
        println!("{}. {}{}", index + 1, step.title, marker);
        println!("   {}", step.description);
        match &step.action {
            SetupAction::VisitUrl { url, description } => println!("   {}: {}", description, url),
            SetupAction::RunCommand {
                command,
                description,
            } => println!("   $ {}\n   {}", command, description),
            SetupAction::SetEnvironmentVariables { variables } => {
                for (name, value) in variables {
                    println!("   export {}={}", name, value);
                }
            }
        }
    }
}

/// Initialize logging from the configured level; RUST_LOG takes precedence
fn init_logging(level: LogLevel, verbose: bool, json: bool) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.filter_directive(verbose).into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}
