//! Data models for the harvested catalog.

mod category;
mod progress;
mod work;

pub use category::Category;
pub use progress::{CategoryProgress, RunStatus};
pub use work::{Episode, EpisodeKey, Work};
