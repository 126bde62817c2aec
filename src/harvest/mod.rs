//! The harvesting pipeline.
//!
//! Components, leaves first: [`Frontier`] enumerates listing pages,
//! [`DedupOracle`] answers what is still missing, [`DetailExtractor`] and
//! [`EpisodeResolver`] do the per-item network work under the bounded
//! [`Executor`], [`WriterHandle`] batches results into the store, and
//! [`Checkpoint`] records how far each category got. [`Harvester`] wires
//! them into the run loop.

mod checkpoint;
mod detail;
mod executor;
mod frontier;
mod oracle;
mod orchestrator;
mod resolver;
mod writer;

pub use checkpoint::Checkpoint;
pub use detail::{DetailExtractor, DetailOutcome};
pub use executor::{Executor, TaskFailure, WaveResult};
pub use frontier::Frontier;
pub use oracle::{missing_from, DedupOracle};
pub use orchestrator::{HarvestEvent, Harvester, RunOutcome};
pub use resolver::{EpisodeResolution, EpisodeResolver, Resolution, Strategy};
pub use writer::{spawn_writer, BatchThresholds, WriterHandle};

use url::Url;

/// Parse the catalog root used to build and join every site URL.
///
/// The path always ends in `/`, so a root below the host (a mirror under
/// `/site`) keeps listing and play pages under it.
pub fn site_root(base_url: &str) -> Result<Url, url::ParseError> {
    let mut root = Url::parse(base_url.trim())?;
    if !root.path().ends_with('/') {
        let path = format!("{}/", root.path());
        root.set_path(&path);
    }
    Ok(root)
}
