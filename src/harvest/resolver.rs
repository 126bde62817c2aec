//! Episode resolution: play page to media address.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;
use url::Url;

use crate::error::Result;
use crate::http_client::PageSource;
use crate::models::Episode;
use crate::parser::PageParser;

/// Marker of a source value that points at the decrypt broker.
const BROKER_MARKER: &str = "get_dplayer";
/// Shorter values are never treated as encoded addresses.
const MIN_ENCODED_LEN: usize = 20;

/// Which step of the chain produced an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Broker,
    Base64,
    Direct,
    PageScan,
}

/// Outcome of one resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved { address: String, strategy: Strategy },
    /// Nothing found this time; retried on a later run.
    Unresolved,
}

impl Resolution {
    pub fn address(&self) -> Option<&str> {
        match self {
            Resolution::Resolved { address, .. } => Some(address),
            Resolution::Unresolved => None,
        }
    }
}

/// An episode record together with how its address was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeResolution {
    pub episode: Episode,
    pub resolution: Resolution,
}

fn is_absolute_address(value: &str) -> bool {
    Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
        .unwrap_or(false)
}

fn looks_like_base64(value: &str) -> bool {
    value.len() > MIN_ENCODED_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
}

fn decode_address(value: &str) -> Option<String> {
    let bytes = STANDARD.decode(value).ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    let decoded = decoded.trim();
    is_absolute_address(decoded).then(|| decoded.to_string())
}

/// Resolves media addresses with an ordered strategy chain.
#[derive(Clone)]
pub struct EpisodeResolver {
    source: Arc<dyn PageSource>,
    parser: Arc<dyn PageParser>,
    root: Url,
}

impl EpisodeResolver {
    pub fn new(source: Arc<dyn PageSource>, parser: Arc<dyn PageParser>, root: &Url) -> Self {
        Self {
            source,
            parser,
            root: root.clone(),
        }
    }

    /// Play page of a 1-based episode number.
    pub fn play_url(&self, work_id: i64, episode: u32) -> Result<String> {
        let path = format!("play/{}-0-{}.html", work_id, episode.saturating_sub(1));
        Ok(self.root.join(&path)?.to_string())
    }

    /// Fetch the play page and run the chain.
    ///
    /// Only a failed play page fetch is an error; an address that cannot be
    /// found is [`Resolution::Unresolved`].
    pub async fn resolve(&self, work_id: i64, episode: u32, name: &str) -> Result<EpisodeResolution> {
        let play_url = self.play_url(work_id, episode)?;
        let html = self.source.fetch_page(&play_url).await?;
        let resolution = self.resolve_page(&html).await;

        debug!("Episode {}#{}: {:?}", work_id, episode, resolution);

        let record = Episode::new(work_id, episode, name, &play_url)
            .with_media_url(resolution.address().map(ToString::to_string));
        Ok(EpisodeResolution {
            episode: record,
            resolution,
        })
    }

    /// Strategy chain over an already fetched play page.
    pub async fn resolve_page(&self, html: &str) -> Resolution {
        if let Some(value) = self.parser.player_source(html) {
            if let Some(resolution) = self.resolve_source(&value).await {
                return resolution;
            }
        }

        match self.parser.scan_media_address(html) {
            Some(address) => Resolution::Resolved {
                address,
                strategy: Strategy::PageScan,
            },
            None => Resolution::Unresolved,
        }
    }

    async fn resolve_source(&self, value: &str) -> Option<Resolution> {
        let (address, strategy) = if value.contains(BROKER_MARKER) {
            (self.ask_broker(value).await?, Strategy::Broker)
        } else if looks_like_base64(value) {
            (decode_address(value)?, Strategy::Base64)
        } else if is_absolute_address(value) {
            (value.to_string(), Strategy::Direct)
        } else {
            return None;
        };

        Some(Resolution::Resolved { address, strategy })
    }

    /// Ask the broker endpoint; accepts `{"code": 200, "url": "..."}` only.
    async fn ask_broker(&self, value: &str) -> Option<String> {
        let url = match self.root.join(value) {
            Ok(url) => url.to_string(),
            Err(e) => {
                debug!("Broker reference {:?} is not a URL: {}", value, e);
                return None;
            }
        };
        let body = match self.source.fetch_json(&url).await {
            Ok(body) => body,
            Err(e) => {
                debug!("Broker request {} failed: {}", url, e);
                return None;
            }
        };

        let code = body.get("code").and_then(|c| {
            c.as_i64()
                .or_else(|| c.as_str().and_then(|s| s.trim().parse().ok()))
        });
        if code != Some(200) {
            return None;
        }

        body.get("url")
            .and_then(|u| u.as_str())
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(ToString::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::site_root;
    use crate::http_client::fake::StaticPages;
    use crate::parser::HtmlPageParser;

    const BASE: &str = "https://m.example";

    fn player_page(value: &str) -> String {
        format!("<script>var player_aaaa = {{\"flag\":\"play\",\"url\":\"{value}\"}};</script>")
    }

    fn resolver(pages: StaticPages) -> EpisodeResolver {
        EpisodeResolver::new(Arc::new(pages), Arc::new(HtmlPageParser), &site_root(BASE).unwrap())
    }

    #[test]
    fn test_play_url_is_zero_indexed() {
        let r = resolver(StaticPages::new());
        assert_eq!(r.play_url(4821, 1).unwrap(), "https://m.example/play/4821-0-0.html");
        assert_eq!(r.play_url(4821, 12).unwrap(), "https://m.example/play/4821-0-11.html");
    }

    #[tokio::test]
    async fn test_base64_source_is_decoded() {
        let r = resolver(StaticPages::new());
        let resolution = r
            .resolve_page(&player_page("aHR0cDovL2Euc2FtcGxlL3guMzEuOHVybA=="))
            .await;
        assert_eq!(
            resolution,
            Resolution::Resolved {
                address: "http://a.sample/x.31.8url".to_string(),
                strategy: Strategy::Base64,
            }
        );
    }

    #[tokio::test]
    async fn test_page_scan_without_player_block() {
        let r = resolver(StaticPages::new());
        let html = r#"<video src="http://a.example/x.m3u8"></video>"#;
        assert_eq!(
            r.resolve_page(html).await,
            Resolution::Resolved {
                address: "http://a.example/x.m3u8".to_string(),
                strategy: Strategy::PageScan,
            }
        );
    }

    #[tokio::test]
    async fn test_direct_source() {
        let r = resolver(StaticPages::new());
        let resolution = r.resolve_page(&player_page("https://v.example/a.mp4")).await;
        assert_eq!(resolution.address(), Some("https://v.example/a.mp4"));
    }

    #[tokio::test]
    async fn test_broker_source() {
        let broker = format!("{BASE}/get_dplayer?id=abc");
        let pages = StaticPages::new().json(
            &broker,
            serde_json::json!({"code": 200, "url": "https://cdn.example/b.m3u8"}),
        );
        let r = resolver(pages);

        let resolution = r.resolve_page(&player_page("/get_dplayer?id=abc")).await;
        assert_eq!(
            resolution,
            Resolution::Resolved {
                address: "https://cdn.example/b.m3u8".to_string(),
                strategy: Strategy::Broker,
            }
        );
    }

    #[tokio::test]
    async fn test_broker_references_join_like_links() {
        let pages = StaticPages::new()
            .json(
                "https://cdn.example/get_dplayer?id=1",
                serde_json::json!({"code": 200, "url": "https://cdn.example/1.m3u8"}),
            )
            .json(
                "https://mirror.example/get_dplayer?id=2",
                serde_json::json!({"code": 200, "url": "https://cdn.example/2.m3u8"}),
            );
        let root = site_root("https://mirror.example/site/").unwrap();
        let r = EpisodeResolver::new(Arc::new(pages), Arc::new(HtmlPageParser), &root);

        assert_eq!(
            r.play_url(9, 1).unwrap(),
            "https://mirror.example/site/play/9-0-0.html"
        );
        let protocol_relative = r
            .resolve_page(&player_page("//cdn.example/get_dplayer?id=1"))
            .await;
        assert_eq!(protocol_relative.address(), Some("https://cdn.example/1.m3u8"));
        let host_absolute = r.resolve_page(&player_page("/get_dplayer?id=2")).await;
        assert_eq!(host_absolute.address(), Some("https://cdn.example/2.m3u8"));
    }

    #[tokio::test]
    async fn test_rejected_broker_falls_back_to_scan() {
        let broker = format!("{BASE}/get_dplayer?id=abc");
        let pages = StaticPages::new().json(&broker, serde_json::json!({"code": 404, "url": ""}));
        let r = resolver(pages);

        let html = format!(
            "{}<script>var backup = 'https://cdn.example/c.m3u8';</script>",
            player_page("/get_dplayer?id=abc")
        );
        let resolution = r.resolve_page(&html).await;
        assert_eq!(resolution.address(), Some("https://cdn.example/c.m3u8"));
    }

    #[tokio::test]
    async fn test_unresolvable_is_not_an_error() {
        let play = format!("{BASE}/play/7-0-1.html");
        let pages = StaticPages::new().page(&play, &player_page("short"));
        let r = resolver(pages);

        let result = r.resolve(7, 2, "Seven").await.unwrap();
        assert_eq!(result.resolution, Resolution::Unresolved);
        assert_eq!(result.episode.media_url, None);
        assert_eq!(result.episode.play_url, play);
        assert_eq!(result.episode.name, "Seven");
    }

    #[tokio::test]
    async fn test_failed_play_page_is_an_error() {
        let r = resolver(StaticPages::new());
        assert!(r.resolve(7, 1, "Seven").await.is_err());
    }

    #[test]
    fn test_base64_heuristics() {
        assert!(!looks_like_base64("abc"));
        assert!(!looks_like_base64("https://example.com/path/to/file.m3u8"));
        assert!(looks_like_base64("aHR0cHM6Ly9jZG4uZXhhbXBsZS92L2VwMS9pbmRleC5tM3U4"));
        assert_eq!(decode_address("bm90IGFuIGFkZHJlc3MgYXQgYWxs"), None);
    }
}
