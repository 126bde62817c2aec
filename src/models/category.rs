//! Catalog categories exposed by the remote source.

use serde::{Deserialize, Serialize};

/// A listing category of the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: u32,
    pub label: String,
}

impl Category {
    pub fn new(id: u32, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }

    /// Built-in category table of the default source.
    pub fn defaults() -> Vec<Category> {
        [
            (1, "电影"),
            (2, "电视剧"),
            (3, "动漫"),
            (4, "综艺"),
            (19, "大陆剧"),
            (20, "欧美剧"),
            (21, "香港剧"),
            (22, "韩国剧"),
            (23, "台湾剧"),
            (24, "日本剧"),
            (25, "海外剧"),
            (26, "泰国剧"),
            (27, "短剧"),
        ]
        .into_iter()
        .map(|(id, label)| Category::new(id, label))
        .collect()
    }

    /// Look up a category by id, falling back to a numbered label.
    pub fn find(categories: &[Category], id: u32) -> Category {
        categories
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .unwrap_or_else(|| Category::new(id, format!("category {id}")))
    }
}
