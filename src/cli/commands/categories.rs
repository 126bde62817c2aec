//! Categories command.

use std::collections::HashMap;

use console::style;

use crate::config::{Config, Settings};

/// List configured categories with their last run status.
pub async fn cmd_categories(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    let statuses: HashMap<u32, String> = if settings.database_exists() {
        settings
            .create_db_context()
            .progress()
            .get_all()
            .await?
            .into_iter()
            .map(|p| (p.category, p.status.to_string()))
            .collect()
    } else {
        HashMap::new()
    };

    println!("{:>6}  {:<16} {}", style("ID").bold(), style("Label").bold(), style("Last run").bold());
    for category in config.categories() {
        println!(
            "{:>6}  {:<16} {}",
            category.id,
            category.label,
            statuses
                .get(&category.id)
                .map(String::as_str)
                .unwrap_or("never")
        );
    }
    Ok(())
}
