//! Harvest command.

use std::sync::Arc;

use anyhow::Context;
use console::style;
use indicatif::ProgressBar;
use tokio::sync::mpsc;

use crate::cli::helpers::page_progress_bar;
use crate::config::{Config, HarvestOptions, Settings};
use crate::harvest::{HarvestEvent, Harvester, RunOutcome};
use crate::models::{Category, RunStatus};
use crate::parser::HtmlPageParser;

/// Harvest one category or all of them until done or interrupted.
pub async fn cmd_run(
    settings: &Settings,
    config: &Config,
    category: Option<u32>,
    page: Option<u32>,
    options: HarvestOptions,
) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let ctx = settings.create_db_context();
    ctx.init_schema().await?;

    let site = settings
        .site_url()
        .with_context(|| format!("invalid base_url {:?}", settings.base_url))?;
    let client = Arc::new(settings.http_client(config.retry_policy())?);
    let categories = config.categories();

    if options.test_mode {
        println!(
            "{} Test mode: at most {} pages per category",
            style("!").yellow(),
            options.test_page_limit
        );
    }

    let (event_tx, event_rx) = mpsc::channel::<HarvestEvent>(100);
    let event_handler = tokio::spawn(render_events(event_rx, categories.clone()));

    let harvester = Harvester::new(
        &ctx,
        client,
        Arc::new(HtmlPageParser),
        &site,
        options,
    )
    .with_categories(categories.clone())
    .with_events(event_tx);

    // First Ctrl-C stops submission; the current wave drains and is flushed.
    let token = harvester.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n{} Interrupt received, finishing in-flight requests...",
                style("!").yellow()
            );
            token.cancel();
        }
    });

    let result = match category {
        Some(id) => harvester
            .run_category(id, page)
            .await
            .map(|outcome| vec![(Category::find(&categories, id), outcome)]),
        None => harvester.run_all().await,
    };

    let shutdown = harvester.shutdown().await;
    interrupt.abort();
    drop(harvester);
    let _ = event_handler.await;

    let outcomes = result?;
    shutdown?;

    for (category, outcome) in &outcomes {
        print_outcome(category, outcome);
    }

    if let Some((category, outcome)) = outcomes.iter().find(|(_, o)| o.status == RunStatus::Error) {
        anyhow::bail!(
            "category {} ({}) ended with an error: {}",
            category.id,
            category.label,
            outcome.error.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

async fn render_events(mut events: mpsc::Receiver<HarvestEvent>, categories: Vec<Category>) {
    let mut bar: Option<(ProgressBar, u32)> = None;

    while let Some(event) = events.recv().await {
        match event {
            HarvestEvent::CategoryStarted {
                category,
                start_page,
                total_pages,
            } => {
                let label = Category::find(&categories, category).label;
                println!(
                    "{} Category {} ({}): pages {}..={}",
                    style("→").cyan(),
                    category,
                    label,
                    start_page,
                    total_pages
                );
                let pages = total_pages.saturating_sub(start_page.saturating_sub(1));
                let pb = page_progress_bar(pages as u64);
                pb.set_message("listing...");
                bar = Some((pb, start_page));
            }
            HarvestEvent::WaveFlushed {
                next_page,
                works_seen,
                episodes_resolved,
                ..
            } => {
                if let Some((ref pb, start_page)) = bar {
                    pb.set_position(next_page.saturating_sub(start_page) as u64);
                    pb.set_message(format!(
                        "{} works, {} episodes resolved",
                        works_seen, episodes_resolved
                    ));
                }
            }
            HarvestEvent::CategoryFinished { .. } => {
                if let Some((pb, _)) = bar.take() {
                    pb.finish_and_clear();
                }
            }
        }
    }

    if let Some((pb, _)) = bar {
        pb.finish_and_clear();
    }
}

fn print_outcome(category: &Category, outcome: &RunOutcome) {
    let marker = match outcome.status {
        RunStatus::Completed => style("✓").green(),
        RunStatus::Interrupted => style("!").yellow(),
        _ => style("✗").red(),
    };
    println!(
        "{} Category {} ({}) {}: {} pages from page {}",
        marker,
        category.id,
        category.label,
        outcome.status,
        outcome.pages_processed,
        outcome.start_page
    );
    println!(
        "  {} works seen, {} new, {} written",
        outcome.works_seen,
        outcome.works_new,
        outcome.works_written()
    );
    println!(
        "  {} episodes resolved, {} unresolved, {} rows written",
        outcome.episodes_resolved,
        outcome.episodes_unresolved,
        outcome.flushed.episode_writes()
    );
    if outcome.tasks_failed > 0 {
        println!("  {} {} tasks failed", style("!").yellow(), outcome.tasks_failed);
    }
    if outcome.status == RunStatus::Interrupted {
        println!("  Run again to resume from the last flushed page");
    }
}
