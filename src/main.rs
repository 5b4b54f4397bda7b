// ██╗   ██╗██╗███╗   ██╗████████╗ █████╗  ██████╗ ███████╗
// ██║   ██║██║████╗  ██║╚══██╔══╝██╔══██╗██╔════╝ ██╔════╝
// ██║   ██║██║██╔██╗ ██║   ██║   ███████║██║  ███╗█████╗
// ╚██╗ ██╔╝██║██║╚██╗██║   ██║   ██╔══██║██║   ██║██╔══╝
//  ╚████╔╝ ██║██║ ╚████║   ██║   ██║  ██║╚██████╔╝███████╗
//   ╚═══╝  ╚═╝╚═╝  ╚═══╝   ╚═╝   ╚═╝  ╚═╝ ╚═════╝ ╚══════╝
//
// H U N T E R
//
// Somewhere within 100 miles of Louisville a county surplus office is
// auctioning a Betacam deck for eleven dollars. This finds it before
// anyone else does.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use vintage_hunter::circuit_breaker::HostBreakers;
use vintage_hunter::config::Config;
use vintage_hunter::dedup::Deduplicator;
use vintage_hunter::fetcher::HttpPageFetcher;
use vintage_hunter::metrics::{self, MetricsCollector};
use vintage_hunter::notifier::{NotificationDispatcher, NotifierWorker, NtfyTransport};
use vintage_hunter::{KeywordRuleSet, ScanOrchestrator, ScanRequest, ScanRun};

#[derive(Parser, Debug)]
#[command(name = "vintage_hunter", version, about = "Keyword alerts for auction listing pages")]
struct Cli {
    /// ntfy topic to publish alerts to
    #[arg(long, global = true)]
    topic: Option<String>,

    /// Target search page (repeatable). Replaces the configured list.
    #[arg(long = "url", global = true)]
    urls: Vec<String>,

    /// Categories as `Name=term, term; Name=term`, or a bare term list
    #[arg(long, global = true)]
    categories: Option<String>,

    /// Comma-separated exclusion terms
    #[arg(long, global = true)]
    exclude: Option<String>,

    /// Don't send push notifications, just print results
    #[arg(long, global = true)]
    no_notify: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Scan every URL once and print the results
    Scan {
        /// Print the full scan run as JSON instead of tables
        #[arg(long)]
        json: bool,
    },
    /// Scan on an interval until Ctrl+C
    Watch {
        /// Seconds between scans (overrides HUNTER_POLL_SECS)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(topic) = &self.topic {
            config.topic = topic.clone();
        }
        if !self.urls.is_empty() {
            config.urls = self.urls.clone();
        }
        if let Some(categories) = &self.categories {
            config.categories = categories.clone();
        }
        if let Some(exclude) = &self.exclude {
            config.exclusions = exclude.clone();
        }
        if self.no_notify {
            config.notify_enabled = false;
        }
        if let Some(Command::Watch {
            interval_secs: Some(secs),
        }) = self.command
        {
            config.poll_interval = Duration::from_secs(secs.max(1));
        }
    }
}

fn print_banner() {
    let banner = r#"
    ╔══════════════════════════════════════════════════════════════╗
    ║   📼  VINTAGE HUNTER                                         ║
    ║                                                              ║
    ║   Fetch:   reqwest + scraper                                 ║
    ║   Match:   Aho-Corasick, exclusions first                    ║
    ║   Dedup:   Bloom Filter + LRU Cache Hybrid                   ║
    ║   Alerts:  ntfy, off the hot path                            ║
    ║                                                              ║
    ║   "Be kind, rewind."                                         ║
    ╚══════════════════════════════════════════════════════════════╝
    "#;
    println!("{}", banner);
}

/// Logs go to stderr so `scan --json` output stays pipeable.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(true)
            .init();
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

fn print_run(run: &ScanRun) {
    println!();
    println!("{}", run);

    if run.matches.is_empty() {
        println!("  Nothing matched this time.");
    }

    for (category, rows) in run.rows_by_category() {
        println!();
        println!("── {} ({}) ──", category, rows.len());
        println!("{:<56} {:<24} LINK", "ITEM", "SOURCE");
        for row in rows {
            println!(
                "{:<56} {:<24} {}",
                truncate(&row.item_name, 56),
                truncate(&row.source, 24),
                row.link
            );
        }
    }

    if run.has_errors() {
        println!();
        println!("Trouble reading:");
        for (url, description) in &run.errors {
            println!("  ⚠️  {}: {}", url, description);
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env().context("failed to load configuration")?;
    init_tracing(config.log_json);
    cli.apply(&mut config);

    let command = cli.command.unwrap_or(Command::Scan { json: false });
    let json_output = matches!(command, Command::Scan { json: true });
    if !json_output {
        print_banner();
    }

    // Rules first: a bad keyword list fails here, before any page is touched.
    let specs = KeywordRuleSet::parse_category_specs(&config.categories)
        .context("invalid category specification")?;
    let rules = Arc::new(
        KeywordRuleSet::from_raw(&specs, &config.exclusions).context("failed to compile keyword rules")?,
    );
    if config.urls.is_empty() {
        bail!("no target URLs configured (set HUNTER_URLS, HUNTER_URLS_FILE or pass --url)");
    }

    info!(
        topic = config.topic.as_str(),
        urls = config.urls.len(),
        categories = ?rules.category_names().collect::<Vec<_>>(),
        exclusions = ?rules.exclusions().terms(),
        notify = config.notify_enabled,
        "✅ Configuration loaded"
    );

    let metrics_collector = Arc::new(MetricsCollector::new());
    let breakers = Arc::new(HostBreakers::new(config.breakers));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // ═══════════════════════════════════════════
    // SPAWN NOTIFIER
    // ═══════════════════════════════════════════
    let (dispatcher, notifier_handle) = if config.notify_enabled {
        let transport = NtfyTransport::new(&config.ntfy_base_url, config.notify_timeout)
            .context("failed to build ntfy client")?;
        let (dispatcher, receiver) =
            NotificationDispatcher::bounded(config.notify_queue_capacity, metrics_collector.clone());
        let worker = NotifierWorker::new(
            transport,
            receiver,
            shutdown_rx.clone(),
            config.notify_timeout,
            metrics_collector.clone(),
        );
        (Some(dispatcher), Some(tokio::spawn(worker.run())))
    } else {
        info!("🔕 Notifications disabled, results go to stdout only");
        (None, None)
    };

    let fetcher = HttpPageFetcher::new(&config.user_agent).context("failed to build HTTP client")?;
    let mut orchestrator = ScanOrchestrator::new(
        fetcher,
        Deduplicator::new(config.dedup.clone()),
        dispatcher,
        breakers.clone(),
        metrics_collector.clone(),
        config.fetch_timeout,
    );

    let request = ScanRequest {
        urls: config.urls.clone(),
        rules,
        topic: config.topic.clone(),
    };

    // Ctrl+C flips the shutdown flag; the scan notices between URLs.
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => warn!("🛑 Shutdown signal received!"),
            Err(err) => error!("❌ Signal listener error: {}", err),
        }
        let _ = signal_tx.send(true);
    });

    let mut metrics_handle = None;

    match command {
        Command::Scan { json } => {
            let run = orchestrator.run_scan(&request, &shutdown_rx).await;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&run).context("failed to serialize scan run")?
                );
            } else {
                print_run(&run);
            }
        }
        Command::Watch { .. } => {
            let port = config.metrics_port;
            let metrics_for_server = metrics_collector.clone();
            let breakers_for_server = breakers.clone();
            let mut metrics_shutdown = shutdown_rx.clone();
            metrics_handle = Some(tokio::spawn(async move {
                metrics::run_metrics_server(port, metrics_for_server, breakers_for_server, &mut metrics_shutdown)
                    .await;
            }));

            info!(
                interval_secs = config.poll_interval.as_secs(),
                metrics_port = port,
                "👀 Watching. Press Ctrl+C to stop"
            );

            let mut watch_shutdown = shutdown_rx.clone();
            orchestrator
                .watch(&request, config.poll_interval, &mut watch_shutdown, print_run)
                .await;
        }
    }

    // Dropping the dispatcher lets the notifier drain its queue and exit.
    drop(orchestrator.detach_dispatcher());

    info!("⏳ Waiting for tasks to complete (timeout: 10s)...");
    let wind_down = async {
        if let Some(handle) = notifier_handle {
            let _ = handle.await;
        }
        let _ = shutdown_tx.send(true);
        if let Some(handle) = metrics_handle {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(10), wind_down).await.is_err() {
        warn!("Tasks did not finish within 10s, exiting anyway");
    }

    let snapshot = metrics_collector.snapshot();
    info!(
        notifications_sent = snapshot.notifications_sent,
        notifications_failed = snapshot.notifications_failed,
        notifications_dropped = snapshot.notifications_dropped,
        "📼 VINTAGE HUNTER: OFFLINE"
    );
    Ok(())
}
