//! Initialize command.

use console::style;

use crate::config::{Settings, CONFIG_FILENAME};

/// Create the data directory and the database schema.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let ctx = settings.create_db_context();
    ctx.init_schema().await?;

    println!(
        "{} Initialized catalog store in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    println!("  Database: {}", settings.database_url());

    if !settings.data_dir.join(CONFIG_FILENAME).is_file() {
        println!(
            "  {} No {} found; built-in defaults are in effect",
            style("!").yellow(),
            CONFIG_FILENAME
        );
    }

    Ok(())
}
