//! Status command.

use chrono::Local;
use console::style;

use crate::cli::helpers::format_number;
use crate::config::{Config, Settings};
use crate::models::{Category, RunStatus};

/// Show stored totals and the checkpoint of every category that has one.
pub async fn cmd_status(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    if !settings.database_exists() {
        println!(
            "{} Store not initialized. Run 'harvest init' first.",
            style("!").yellow()
        );
        return Ok(());
    }

    let ctx = settings.create_db_context();
    let counts = ctx.catalog().counts().await?;
    let progress = ctx.progress().get_all().await?;
    let categories = config.categories();

    let separator = "─".repeat(70);
    println!();
    println!(
        "{:<50} {}",
        style("harvest status").bold(),
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    println!("{}", separator);
    println!("Database: {}", settings.database_url());
    println!("Source:   {}", settings.base_url);
    println!();

    println!("{}", style("CATALOG").cyan().bold());
    println!("  {:<20} {:>10}", "Works:", format_number(counts.works as u64));
    println!("  {:<20} {:>10}", "Episodes:", format_number(counts.episodes as u64));
    println!(
        "  {:<20} {:>10}",
        "Resolved:",
        format_number(counts.resolved_episodes as u64)
    );
    println!(
        "  {:<20} {:>10}",
        "Unresolved:",
        format_number((counts.episodes - counts.resolved_episodes) as u64)
    );
    println!();

    if progress.is_empty() {
        println!("{} No category has been harvested yet", style("!").yellow());
        return Ok(());
    }

    println!(
        "{:<30} {:>12} {:>8} {:>12}  {}",
        style("CATEGORIES").cyan().bold(),
        "Status",
        "Page",
        "Last work",
        "Updated"
    );
    for row in &progress {
        let category = Category::find(&categories, row.category);
        let status = match row.status {
            RunStatus::Completed => style(row.status.as_str()).green(),
            RunStatus::Running | RunStatus::Interrupted => style(row.status.as_str()).yellow(),
            RunStatus::Error => style(row.status.as_str()).red(),
        };
        println!(
            "  {:<28} {:>12} {:>8} {:>12}  {}",
            format!("{} {}", category.id, category.label),
            status,
            format!("{}/{}", row.current_page, row.total_pages),
            row.last_work_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            row.updated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        );
    }
    println!();

    Ok(())
}
