//! Frontier enumeration: listing pages to candidate detail URLs.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};
use url::Url;

use crate::error::{HarvestError, Result};
use crate::http_client::PageSource;
use crate::parser::PageParser;

/// Enumerates the listing pages of a category.
#[derive(Clone)]
pub struct Frontier {
    source: Arc<dyn PageSource>,
    parser: Arc<dyn PageParser>,
    root: Url,
    concurrency: usize,
}

impl Frontier {
    pub fn new(
        source: Arc<dyn PageSource>,
        parser: Arc<dyn PageParser>,
        root: &Url,
        concurrency: usize,
    ) -> Self {
        Self {
            source,
            parser,
            root: root.clone(),
            concurrency: concurrency.max(1),
        }
    }

    pub fn listing_url(&self, category: u32, page: u32) -> Result<Url> {
        Ok(self.root.join(&format!("list/{}-{}.html", category, page))?)
    }

    /// Number of listing pages of a category, read from its first page.
    pub async fn total_pages(&self, category: u32) -> Result<u32> {
        let url = self.listing_url(category, 1)?;
        let html = self
            .source
            .fetch_page(url.as_str())
            .await
            .map_err(|e| HarvestError::Enumeration {
                category,
                reason: e.to_string(),
            })?;
        Ok(self.parser.total_pages(&html))
    }

    /// Detail URLs found on `pages`, deduplicated in page order.
    ///
    /// Pages that fail to load or lack a list container contribute nothing.
    pub async fn list_pages(&self, category: u32, pages: &[u32]) -> Vec<String> {
        if pages.is_empty() {
            return Vec::new();
        }

        let limit = self.concurrency.min(pages.len());
        let mut per_page: Vec<(u32, Vec<String>)> = stream::iter(pages.iter().copied())
            .map(|page| async move { (page, self.list_page(category, page).await) })
            .buffer_unordered(limit)
            .collect()
            .await;
        per_page.sort_by_key(|(page, _)| *page);

        let mut seen = HashSet::new();
        let urls: Vec<String> = per_page
            .into_iter()
            .flat_map(|(_, urls)| urls)
            .filter(|url| seen.insert(url.clone()))
            .collect();

        debug!(
            "Category {} pages {:?}: {} candidate works",
            category,
            pages,
            urls.len()
        );
        urls
    }

    async fn list_page(&self, category: u32, page: u32) -> Vec<String> {
        let url = match self.listing_url(category, page) {
            Ok(url) => url,
            Err(e) => {
                warn!("Skipping listing page {} of category {}: {}", page, category, e);
                return Vec::new();
            }
        };
        let html = match self.source.fetch_page(url.as_str()).await {
            Ok(html) => html,
            Err(e) => {
                warn!("Skipping listing page {}: {}", url, e);
                return Vec::new();
            }
        };

        match self.parser.detail_links(&html) {
            // Links resolve against the listing page itself.
            Some(links) => links
                .iter()
                .filter_map(|href| match url.join(href) {
                    Ok(link) => Some(link.to_string()),
                    Err(e) => {
                        debug!("Dropping link {:?} on {}: {}", href, url, e);
                        None
                    }
                })
                .collect(),
            None => {
                warn!("No list container on {}", url);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::site_root;
    use crate::http_client::fake::StaticPages;
    use crate::parser::HtmlPageParser;

    const BASE: &str = "https://m.example";

    fn listing(ids: &[u32]) -> String {
        let items: String = ids
            .iter()
            .map(|id| format!(r#"<li><a href="/mp4/{id}.html">{id}</a></li>"#))
            .collect();
        format!(r#"<ul class="list_mov">{items}</ul>"#)
    }

    fn frontier(pages: StaticPages) -> Frontier {
        Frontier::new(
            Arc::new(pages),
            Arc::new(HtmlPageParser),
            &site_root(BASE).unwrap(),
            5,
        )
    }

    #[tokio::test]
    async fn test_list_pages_unions_and_dedups() {
        let pages = StaticPages::new()
            .page(&format!("{BASE}/list/2-1.html"), &listing(&[1, 2]))
            .page(&format!("{BASE}/list/2-2.html"), &listing(&[2, 3]))
            .page(&format!("{BASE}/list/2-3.html"), "<html>layout changed</html>");
        let frontier = frontier(pages);

        // Page 4 is not served at all.
        let urls = frontier.list_pages(2, &[3, 1, 2, 4]).await;
        assert_eq!(
            urls,
            vec![
                format!("{BASE}/mp4/1.html"),
                format!("{BASE}/mp4/2.html"),
                format!("{BASE}/mp4/3.html"),
            ]
        );
    }

    #[tokio::test]
    async fn test_total_pages() {
        let html = r#"<ul class="page"><li><a href="/list/3-9.html">尾页</a></li></ul>"#;
        let frontier = frontier(StaticPages::new().page(&format!("{BASE}/list/3-1.html"), html));

        assert_eq!(frontier.total_pages(3).await.unwrap(), 9);
        assert!(matches!(
            frontier.total_pages(4).await,
            Err(HarvestError::Enumeration { category: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_links_join_against_mirror_path() {
        let root = site_root("https://mirror.example/site").unwrap();
        let html = r#"<ul class="list_mov">
            <li><a href="/mp4/1.html">1</a></li>
            <li><a href="../mp4/2.html">2</a></li>
            <li><a href="//cdn.example/mp4/3.html">3</a></li>
            <li><a href="https://other.example/mp4/4.html">4</a></li>
          </ul>"#;
        let pages = StaticPages::new().page("https://mirror.example/site/list/1-1.html", html);
        let frontier = Frontier::new(Arc::new(pages), Arc::new(HtmlPageParser), &root, 5);

        assert_eq!(
            frontier.listing_url(1, 1).unwrap().as_str(),
            "https://mirror.example/site/list/1-1.html"
        );
        assert_eq!(
            frontier.list_pages(1, &[1]).await,
            vec![
                "https://mirror.example/mp4/1.html".to_string(),
                "https://mirror.example/site/mp4/2.html".to_string(),
                "https://cdn.example/mp4/3.html".to_string(),
                "https://other.example/mp4/4.html".to_string(),
            ]
        );
    }
}
