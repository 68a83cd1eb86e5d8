//! Command handlers for the FolioFox CLI
//!
//! Each handler builds a coordinator from the loaded configuration,
//! executes one command against it and renders the outcome for the
//! terminal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::app::models::{BookFormat, IndexerId, QualityProfile, SearchFilters, SearchRequest};
use crate::app::queue::{DownloadRequest, QueueItemId, QueueStatus};
use crate::app::{select_best, Coordinator, Event};
use crate::cli::args::{IndexerAction, IndexerArgs, QueueAction, QueueArgs, SearchArgs};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// Handle the search command
pub async fn handle_search(args: SearchArgs, config: &AppConfig) -> Result<()> {
    let coordinator = Coordinator::new(config).await?;

    let mut request = SearchRequest::new(&args.query);
    request.filters = SearchFilters {
        formats: args.format.iter().map(|f| BookFormat::parse(f)).collect(),
        language: args.language.clone(),
        min_quality: args.min_quality,
        max_size_mb: args.max_size,
    };
    if !args.indexer.is_empty() {
        request.indexers = Some(args.indexer.iter().map(|id| IndexerId(*id)).collect());
    }
    request.profile = profile_from_args(&args);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Searching for \"{}\"...", args.query));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let response = coordinator.search(&request).await;
    spinner.finish_and_clear();
    let response = response?;

    if response.cached {
        println!(
            "{} results (cached) in {}ms",
            response.total_results, response.response_time_ms
        );
    } else {
        println!(
            "{} results from {} indexers in {}ms",
            response.total_results,
            response.indexers_searched.len(),
            response.response_time_ms
        );
    }

    for meta in &response.indexers_searched {
        if let Some(error) = &meta.error {
            println!("  ! {} skipped: {}", meta.indexer_name, error);
        }
    }
    println!();

    for (index, result) in response.results.iter().take(args.limit).enumerate() {
        let author = result.author.as_deref().unwrap_or("unknown author");
        let size = result
            .file_size_bytes
            .map(human_size)
            .unwrap_or_else(|| "?".to_string());
        println!(
            "{:>3}. {} - {} [{}] {} (score {:.0}, indexer {})",
            index + 1,
            author,
            result.title,
            result.format,
            size,
            result.quality_score,
            result.indexer_id,
        );
        println!("     {}", result.download_url);
    }

    if response.total_results > args.limit {
        println!(
            "\n... and {} more (raise --limit to see them)",
            response.total_results - args.limit
        );
    }

    if let Some(profile) = &request.profile {
        if let Some(best) = select_best(profile, &response.results) {
            println!(
                "\nBest match: {} [{}] (score {:.0})\n  {}",
                best.title, best.format, best.quality_score, best.download_url
            );
        }
    }
    Ok(())
}

/// Treat the format flags (plus any quality and size bounds) as an ad hoc
/// quality profile so the search can surface a single best match
fn profile_from_args(args: &SearchArgs) -> Option<QualityProfile> {
    if args.format.is_empty() {
        return None;
    }
    Some(QualityProfile {
        name: "cli".to_string(),
        preferred_formats: args.format.iter().map(|f| BookFormat::parse(f)).collect(),
        min_quality_score: args.min_quality.unwrap_or(0.0),
        max_file_size_mb: args.max_size,
    })
}

/// Handle queue subcommands
pub async fn handle_queue(args: QueueArgs, config: &AppConfig) -> Result<()> {
    match args.action {
        QueueAction::Add {
            title,
            url,
            author,
            format,
            priority,
        } => {
            let coordinator = Coordinator::new(config).await?;
            let mut request = DownloadRequest::new(title, url);
            request.author = author;
            request.format = BookFormat::parse(&format);
            request.priority = priority;
            let item = coordinator.enqueue_download(request).await?;
            println!(
                "Queued \"{}\" as item {} (priority {})",
                item.title, item.id, item.priority
            );
        }

        QueueAction::List {
            status,
            offset,
            limit,
        } => {
            let coordinator = Coordinator::new(config).await?;
            let filter = status.as_deref().map(parse_status).transpose()?;
            let items = coordinator.queue_snapshot(filter, offset, limit).await;
            if items.is_empty() {
                println!("Queue is empty");
                return Ok(());
            }
            for item in items {
                let detail = match item.status {
                    QueueStatus::Downloading => format!("{}%", item.progress_percent),
                    QueueStatus::Failed | QueueStatus::Pending if item.retry_count > 0 => {
                        format!("retry {}/{}", item.retry_count, item.max_retries)
                    }
                    _ => String::new(),
                };
                println!(
                    "{:>5}  p{}  {:<12} {} {}",
                    item.id, item.priority, item.status.to_string(), item.title, detail
                );
            }
        }

        QueueAction::Pause { id } => {
            let coordinator = Coordinator::new(config).await?;
            coordinator.pause(QueueItemId(id)).await?;
            println!("Paused item {}", id);
        }

        QueueAction::Resume { id } => {
            let coordinator = Coordinator::new(config).await?;
            coordinator.resume(QueueItemId(id)).await?;
            println!("Resumed item {}", id);
        }

        QueueAction::Cancel { id } => {
            let coordinator = Coordinator::new(config).await?;
            coordinator.cancel(QueueItemId(id)).await?;
            println!("Cancelled item {}", id);
        }

        QueueAction::Retry { id } => {
            let coordinator = Coordinator::new(config).await?;
            coordinator.retry_now(QueueItemId(id)).await?;
            println!("Item {} is eligible again", id);
        }

        QueueAction::Priority { id, priority } => {
            let coordinator = Coordinator::new(config).await?;
            coordinator.set_priority(QueueItemId(id), priority).await?;
            println!("Item {} set to priority {}", id, priority);
        }

        QueueAction::Run { workers } => {
            let mut config = config.clone();
            if let Some(workers) = workers {
                config.max_concurrent_downloads = workers;
            }
            run_queue(&config).await?;
        }

        QueueAction::Stats => {
            let coordinator = Coordinator::new(config).await?;
            let stats = coordinator.queue_stats().await;
            println!("pending:     {}", stats.pending);
            println!("downloading: {}", stats.downloading);
            println!("paused:      {}", stats.paused);
            println!("completed:   {}", stats.completed);
            println!("failed:      {}", stats.failed);
            println!("cancelled:   {}", stats.cancelled);
            println!("total:       {}", stats.total);
        }

        QueueAction::History => {
            let coordinator = Coordinator::new(config).await?;
            let history = coordinator.history().await?;
            if history.is_empty() {
                println!("No download history");
                return Ok(());
            }
            for record in history {
                println!(
                    "{:>5}  {:<10} {}  {}",
                    record.id,
                    record.final_status.to_string(),
                    record.completed_at.format("%Y-%m-%d %H:%M"),
                    record.title,
                );
            }
        }
    }
    Ok(())
}

/// Run workers with live progress until the queue drains or Ctrl-C
async fn run_queue(config: &AppConfig) -> Result<()> {
    let coordinator = Arc::new(Coordinator::new(config).await?);
    coordinator.start().await;
    info!(
        "Processing queue with {} workers",
        config.max_concurrent_downloads
    );

    let mut events = coordinator.subscribe();
    let multi = MultiProgress::new();
    let mut bars: HashMap<u64, ProgressBar> = HashMap::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(Event::DownloadProgress { item_id, progress_percent, download_speed_kbps, .. }) => {
                    let bar = bars.entry(item_id).or_insert_with(|| {
                        let bar = multi.add(ProgressBar::new(100));
                        bar.set_style(
                            ProgressStyle::default_bar()
                                .template("{msg:<30} [{bar:30}] {pos:>3}%")
                                .unwrap_or_else(|_| ProgressStyle::default_bar()),
                        );
                        bar.set_message(format!("item {}", item_id));
                        bar
                    });
                    bar.set_position(progress_percent as u64);
                    if let Some(kbps) = download_speed_kbps {
                        bar.set_message(format!("item {} ({} KiB/s)", item_id, kbps));
                    }
                }
                Ok(Event::DownloadCompleted { item_id, file_size_bytes }) => {
                    if let Some(bar) = bars.remove(&item_id) {
                        bar.finish_and_clear();
                    }
                    println!("✓ item {} done ({})", item_id, human_size(file_size_bytes));
                }
                Ok(Event::DownloadFailed { item_id, error, will_retry }) => {
                    if let Some(bar) = bars.remove(&item_id) {
                        bar.finish_and_clear();
                    }
                    if will_retry {
                        println!("↻ item {} failed, will retry: {}", item_id, error);
                    } else {
                        println!("✗ item {} failed permanently: {}", item_id, error);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!("Progress display lagged, skipped {} events", missed);
                }
                Err(RecvError::Closed) => break,
            },
            _ = ticker.tick() => {
                let stats = coordinator.queue_stats().await;
                if stats.pending == 0 && stats.downloading == 0 {
                    println!("Queue drained");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted, shutting down");
                break;
            }
        }
    }

    coordinator.shutdown().await;
    Ok(())
}

/// Handle indexer subcommands
pub async fn handle_indexer(args: IndexerArgs, config: &AppConfig) -> Result<()> {
    let coordinator = Coordinator::new(config).await?;
    match args.action {
        IndexerAction::List => {
            let mut indexers = coordinator.indexers().await;
            if indexers.is_empty() {
                println!("No indexers configured");
                return Ok(());
            }
            indexers.sort_by_key(|(i, _)| i.id);
            for (indexer, health) in indexers {
                let active = if indexer.is_active { "" } else { " (inactive)" };
                let response = health
                    .last_response_time_ms
                    .map(|ms| format!(", {}ms", ms))
                    .unwrap_or_default();
                println!(
                    "{:>3}  {:<20} {:<12} {:<11}{}{}",
                    indexer.id,
                    indexer.name,
                    indexer.kind.to_string(),
                    health.status.to_string(),
                    response,
                    active,
                );
            }
        }

        IndexerAction::Test { id } => {
            let ms = coordinator.test_indexer(IndexerId(id)).await?;
            println!("Indexer {} responded in {}ms", id, ms);
        }

        IndexerAction::Maintenance { id, off } => {
            coordinator
                .set_indexer_maintenance(IndexerId(id), !off)
                .await?;
            if off {
                println!("Indexer {} back in rotation", id);
            } else {
                println!("Indexer {} in maintenance", id);
            }
        }
    }
    Ok(())
}

fn parse_status(raw: &str) -> Result<QueueStatus> {
    match raw.to_ascii_lowercase().as_str() {
        "pending" => Ok(QueueStatus::Pending),
        "downloading" => Ok(QueueStatus::Downloading),
        "paused" => Ok(QueueStatus::Paused),
        "completed" => Ok(QueueStatus::Completed),
        "failed" => Ok(QueueStatus::Failed),
        "cancelled" => Ok(QueueStatus::Cancelled),
        other => Err(AppError::generic(format!("unknown status \"{}\"", other))),
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KiB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("Pending").unwrap(), QueueStatus::Pending);
        assert!(parse_status("bogus").is_err());
    }

    #[test]
    fn test_profile_from_args() {
        let mut args = SearchArgs {
            query: "dune".to_string(),
            format: Vec::new(),
            language: None,
            min_quality: None,
            max_size: None,
            indexer: Vec::new(),
            limit: 25,
        };
        assert!(profile_from_args(&args).is_none());

        args.format = vec!["epub".to_string(), "mobi".to_string()];
        args.min_quality = Some(60.0);
        args.max_size = Some(25);
        let profile = profile_from_args(&args).unwrap();
        assert_eq!(
            profile.preferred_formats,
            vec![BookFormat::Epub, BookFormat::Mobi]
        );
        assert_eq!(profile.min_quality_score, 60.0);
        assert_eq!(profile.max_file_size_mb, Some(25));
    }
}
