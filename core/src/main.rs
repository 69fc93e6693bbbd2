/// Notice feed console - main entry point
use colored::*;
use noticefeed_core::feed::{LiveFeedReconciler, LoadOutcome, NoticePayload};
use noticefeed_core::feed_types::FeedEvent;
use noticefeed_core::render::render_view;
use noticefeed_core::source::{NoticeApiClient, SseStream};
use noticefeed_core::{Config, FallbackPoller};
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type NoticeFeed = LiveFeedReconciler<NoticePayload, NoticeApiClient, SseStream>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let source = Arc::new(NoticeApiClient::new(&config));
    let stream = Arc::new(SseStream::new(&config));
    let feed: Arc<NoticeFeed> = Arc::new(LiveFeedReconciler::new(
        source,
        stream,
        config.topic(),
        config.page_size,
    ));
    let mut events = feed.events();

    info!("Loading notices for {}", config.topic());
    if let Err(e) = feed.initialize().await {
        eprintln!("{} Could not load notices: {}", "✗".red().bold(), e);
        return Err(anyhow::anyhow!("Initial load failed: {}", e));
    }
    print_view(&feed);
    println!("{}", "Commands: more | stats | quit".dimmed());

    let poller = FallbackPoller::spawn(feed.clone(), config.poll_interval);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    // Ids whose highlight has expired
    let (fade_tx, mut fade_rx) = mpsc::unbounded_channel::<String>();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Ctrl+C received");
                break;
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(cmd)) => {
                        if !handle_command(cmd.trim(), &feed).await {
                            break;
                        }
                    }
                    // stdin closed, keep following the stream
                    Ok(None) => stdin_open = false,
                    Err(e) => warn!("stdin error: {}", e),
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => handle_event(event, &feed, &config, &fade_tx),
                    Err(RecvError::Lagged(n)) => warn!("Presenter lagged {} events", n),
                    Err(RecvError::Closed) => break,
                }
            }
            Some(id) = fade_rx.recv() => {
                if feed.mark_seen(&id) {
                    print_view(&feed);
                }
            }
        }
    }

    poller.stop().await;
    feed.teardown();
    Ok(())
}

async fn handle_command(cmd: &str, feed: &Arc<NoticeFeed>) -> bool {
    match cmd {
        "" => {}
        "more" => match feed.load_older_page().await {
            Ok(LoadOutcome::Loaded { page, added, .. }) => {
                println!("Loaded page {} ({} new)", page, added);
                print_view(feed);
            }
            Ok(LoadOutcome::Skipped(reason)) => println!("Nothing to load ({:?})", reason),
            Ok(LoadOutcome::Discarded) => {}
            Err(e) => eprintln!("{} Loading older notices failed: {}", "✗".red().bold(), e),
        },
        "stats" => match serde_json::to_string_pretty(&feed.stats()) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!("stats: {}", e),
        },
        "quit" | "exit" => return false,
        other => println!("Unknown command: {}", other.yellow()),
    }
    true
}

fn handle_event(
    event: FeedEvent,
    feed: &Arc<NoticeFeed>,
    config: &Config,
    fade_tx: &mpsc::UnboundedSender<String>,
) {
    match event {
        FeedEvent::ItemAdded { id, .. } => {
            // Highlight fades after the configured duration
            let fade_tx = fade_tx.clone();
            let delay = config.highlight_duration;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = fade_tx.send(id);
            });
        }
        FeedEvent::ScrollToNewest { .. } => print_view(feed),
        FeedEvent::ConnectionChanged { state } => {
            println!("{}", format!("[stream {:?}]", state).dimmed());
        }
        _ => {}
    }
}

fn print_view(feed: &NoticeFeed) {
    let today = chrono::Utc::now().date_naive();
    for line in render_view(&feed.grouped_view(), today) {
        println!("{}", line);
    }
    if feed.has_more() {
        println!("{}", "(older notices available: type `more`)".dimmed());
    }
}
