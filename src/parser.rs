//! Page parsers for the remote catalog layout.
//!
//! Parsing is pure: page text in, extracted fields out. Nothing here
//! touches the network or the store, and a missing element always maps to
//! a default rather than an error.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Placeholder for metadata the detail page does not show.
pub const UNKNOWN: &str = "未知";
/// Placeholder synopsis.
pub const NO_SYNOPSIS: &str = "暂无简介";

const LAST_PAGE_LABEL: &str = "尾页";
const APP_ONLY_ENTRY: &str = "APP播放";

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());
static PAGE_LINKS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("ul.page a").unwrap());
static LIST_CONTAINERS: LazyLock<[Selector; 2]> = LazyLock::new(|| {
    [
        Selector::parse("ul.list_mov").unwrap(),
        Selector::parse(r#"ul[class*="-vodlist"]"#).unwrap(),
    ]
});
static LIST_LINKS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li a[href]").unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1.title").unwrap());
static DATA_ROWS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p.data").unwrap());
static DESCRIPTION_BLOCKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"div[class*="-content__desc"]"#).unwrap());
static META_DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="description"]"#).unwrap());
static PLAYLIST: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"ul[class*="-content__playlist"]"#).unwrap());
static PLAYLIST_ENTRIES: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li a").unwrap());

static LAST_PAGE_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/list/\d+-(\d+)\.html").unwrap());
static WORK_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/mp4/(\d+)\.html").unwrap());
static SYNOPSIS_LABEL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"剧情[:：](.+)").unwrap());
static PLAYER_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)var\s+player_aaaa\s*=\s*(\{.*?\})").unwrap());
static PLAYER_SOURCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\burl["']?\s*:\s*["']([^"']*)["']"#).unwrap());
static MEDIA_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s'"`,]+\.m3u8"#).unwrap());

/// Metadata shown on a detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkFields {
    pub title: String,
    pub genre: String,
    pub region: String,
    pub year: String,
    pub actors: Vec<String>,
    pub directors: Vec<String>,
    pub synopsis: String,
}

impl Default for WorkFields {
    fn default() -> Self {
        Self {
            title: UNKNOWN.to_string(),
            genre: UNKNOWN.to_string(),
            region: UNKNOWN.to_string(),
            year: UNKNOWN.to_string(),
            actors: Vec::new(),
            directors: Vec::new(),
            synopsis: NO_SYNOPSIS.to_string(),
        }
    }
}

/// Extracts structured fields from catalog pages.
pub trait PageParser: Send + Sync {
    /// Total listing pages advertised on a listing page (at least 1).
    fn total_pages(&self, html: &str) -> u32;

    /// Detail page links (as found in `href`) of a listing page, in page
    /// order. `None` when the list container is missing entirely.
    fn detail_links(&self, html: &str) -> Option<Vec<String>>;

    /// Number of episodes offered on a detail page (at least 1).
    fn episode_count(&self, html: &str) -> u32;

    fn work_fields(&self, html: &str) -> WorkFields;

    /// Source value declared in the embedded player configuration.
    fn player_source(&self, html: &str) -> Option<String>;

    /// First direct playlist address in the raw page text.
    fn scan_media_address(&self, html: &str) -> Option<String>;
}

/// Numeric work identifier encoded in a detail URL.
pub fn work_id_from_url(url: &str) -> Option<i64> {
    WORK_ID
        .captures(url)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Element text with each fragment trimmed.
fn text_of(element: ElementRef<'_>) -> String {
    element.text().map(str::trim).collect()
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// Player configurations are JSON-ish and often escape slashes.
fn unescape_slashes(value: &str) -> String {
    value.replace("\\/", "/")
}

/// [`PageParser`] for the site's mobile HTML layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlPageParser;

impl PageParser for HtmlPageParser {
    fn total_pages(&self, html: &str) -> u32 {
        let doc = Html::parse_document(html);

        let last_page = doc
            .select(&ANCHOR)
            .filter(|a| text_of(*a).contains(LAST_PAGE_LABEL))
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| LAST_PAGE_HREF.captures(href))
            .find_map(|c| c.get(1).and_then(|m| m.as_str().parse::<u32>().ok()));

        if let Some(pages) = last_page {
            return pages.max(1);
        }

        doc.select(&PAGE_LINKS)
            .filter_map(|a| text_of(a).parse::<u32>().ok())
            .max()
            .unwrap_or(1)
            .max(1)
    }

    fn detail_links(&self, html: &str) -> Option<Vec<String>> {
        let doc = Html::parse_document(html);
        let container = LIST_CONTAINERS
            .iter()
            .find_map(|selector| doc.select(selector).next())?;

        let mut links: Vec<String> = Vec::new();
        for href in container
            .select(&LIST_LINKS)
            .filter_map(|a| a.value().attr("href"))
            .filter(|href| href.contains("/mp4/"))
        {
            if !links.iter().any(|seen| seen == href) {
                links.push(href.to_string());
            }
        }
        Some(links)
    }

    fn episode_count(&self, html: &str) -> u32 {
        let doc = Html::parse_document(html);
        let Some(playlist) = doc.select(&PLAYLIST).next() else {
            return 1;
        };

        let count = playlist
            .select(&PLAYLIST_ENTRIES)
            .filter(|a| text_of(*a) != APP_ONLY_ENTRY)
            .count();
        (count as u32).max(1)
    }

    fn work_fields(&self, html: &str) -> WorkFields {
        let doc = Html::parse_document(html);
        let mut fields = WorkFields::default();

        if let Some(title) = doc.select(&TITLE).next() {
            let text = text_of(title);
            let name = text.split(['(', '（']).next().unwrap_or_default().trim();
            fields.title = non_empty_or(name.to_string(), UNKNOWN);
        }

        let rows: Vec<ElementRef<'_>> = doc.select(&DATA_ROWS).collect();
        let anchors = |row: usize| -> Vec<String> {
            rows.get(row)
                .map(|r| {
                    r.select(&ANCHOR)
                        .map(text_of)
                        .filter(|t| !t.is_empty())
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut labels = anchors(0).into_iter();
        if let Some(genre) = labels.next() {
            fields.genre = genre;
        }
        if let Some(region) = labels.next() {
            fields.region = region;
        }
        if let Some(year) = labels.next() {
            fields.year = year;
        }
        fields.actors = anchors(1);
        fields.directors = anchors(2);

        let synopsis = doc
            .select(&DESCRIPTION_BLOCKS)
            .nth(1)
            .map(text_of)
            .filter(|s| !s.is_empty());

        fields.synopsis = match synopsis {
            Some(s) => s,
            None => doc
                .select(&META_DESCRIPTION)
                .next()
                .and_then(|m| m.value().attr("content"))
                .map(|content| match SYNOPSIS_LABEL.captures(content) {
                    Some(c) => c[1].trim().to_string(),
                    None => content.trim().to_string(),
                })
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| NO_SYNOPSIS.to_string()),
        };

        fields
    }

    fn player_source(&self, html: &str) -> Option<String> {
        let block = PLAYER_BLOCK.captures(html)?.get(1)?.as_str();
        let source = PLAYER_SOURCE.captures(block)?.get(1)?.as_str();
        Some(unescape_slashes(source))
    }

    fn scan_media_address(&self, html: &str) -> Option<String> {
        let text = unescape_slashes(html);
        MEDIA_ADDRESS.find(&text).map(|m| m.as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <html><body>
          <ul class="myui-vodlist clearfix">
            <li><a href="/mp4/101.html">One</a></li>
            <li><a href="/mp4/102.html">Two</a></li>
            <li><a href="/mp4/101.html">One again</a></li>
            <li><a href="/news/5.html">Not a work</a></li>
          </ul>
          <ul class="page">
            <li><a href="/list/2-1.html">1</a></li>
            <li><a href="/list/2-2.html">2</a></li>
            <li><a href="/list/2-7.html">7</a></li>
            <li><a href="/list/2-2.html">下一页</a></li>
          </ul>
        </body></html>
    "#;

    const DETAIL: &str = r##"
        <html><head>
          <meta name="description" content="某剧 剧情：从元数据来的简介">
        </head><body>
          <h1 class="title">漫长的季节 (2023)</h1>
          <p class="data"><a>剧情</a><a>大陆</a><a>2023</a></p>
          <p class="data">主演：<a>范伟</a><a>秦昊</a></p>
          <p class="data">导演：<a>辛爽</a></p>
          <div class="myui-content__desc">short</div>
          <div class="myui-content__desc">一个完整的简介。</div>
          <ul class="myui-content__playlist">
            <li><a href="/play/4821-0-0.html">第01集</a></li>
            <li><a href="/play/4821-0-1.html">第02集</a></li>
            <li><a href="/play/4821-0-2.html">第03集</a></li>
            <li><a href="#">APP播放</a></li>
          </ul>
        </body></html>
    "##;

    #[test]
    fn test_total_pages_prefers_last_page_link() {
        let html = r#"<ul class="page"><li><a href="/list/1-2.html">2</a></li>
            <li><a href="/list/1-58.html">尾页</a></li></ul>"#;
        assert_eq!(HtmlPageParser.total_pages(html), 58);
    }

    #[test]
    fn test_total_pages_falls_back_to_numeric_links() {
        assert_eq!(HtmlPageParser.total_pages(LISTING), 7);
    }

    #[test]
    fn test_total_pages_defaults_to_one() {
        assert_eq!(HtmlPageParser.total_pages("<html><body></body></html>"), 1);
    }

    #[test]
    fn test_detail_links_deduped_in_order() {
        let links = HtmlPageParser.detail_links(LISTING).unwrap();
        assert_eq!(links, vec!["/mp4/101.html", "/mp4/102.html"]);
    }

    #[test]
    fn test_detail_links_missing_container() {
        assert_eq!(HtmlPageParser.detail_links("<ul class=\"other\"></ul>"), None);
    }

    #[test]
    fn test_work_fields() {
        let fields = HtmlPageParser.work_fields(DETAIL);
        assert_eq!(fields.title, "漫长的季节");
        assert_eq!(fields.genre, "剧情");
        assert_eq!(fields.region, "大陆");
        assert_eq!(fields.year, "2023");
        assert_eq!(fields.actors, vec!["范伟", "秦昊"]);
        assert_eq!(fields.directors, vec!["辛爽"]);
        assert_eq!(fields.synopsis, "一个完整的简介。");
    }

    #[test]
    fn test_work_fields_defaults_and_meta_synopsis() {
        let html = r#"<head><meta name="description" content="剧情:来自元数据"></head>
            <body><p class="data"><a>动作</a></p></body>"#;
        let fields = HtmlPageParser.work_fields(html);
        assert_eq!(fields.title, UNKNOWN);
        assert_eq!(fields.genre, "动作");
        assert_eq!(fields.region, UNKNOWN);
        assert!(fields.actors.is_empty());
        assert_eq!(fields.synopsis, "来自元数据");

        assert_eq!(HtmlPageParser.work_fields("").synopsis, NO_SYNOPSIS);
    }

    #[test]
    fn test_episode_count() {
        assert_eq!(HtmlPageParser.episode_count(DETAIL), 3);
        assert_eq!(HtmlPageParser.episode_count("<body>movie</body>"), 1);
        let app_only = r#"<ul class="x-content__playlist"><li><a>APP播放</a></li></ul>"#;
        assert_eq!(HtmlPageParser.episode_count(app_only), 1);
    }

    #[test]
    fn test_work_id_from_url() {
        assert_eq!(work_id_from_url("https://m.example/mp4/4821.html"), Some(4821));
        assert_eq!(work_id_from_url("https://m.example/mp4/abc.html"), None);
        assert_eq!(work_id_from_url("https://m.example/list/1-2.html"), None);
    }

    #[test]
    fn test_player_source_variants() {
        let single = "<script>var player_aaaa = {flag:'play', url:'abc123'};</script>";
        assert_eq!(HtmlPageParser.player_source(single).as_deref(), Some("abc123"));

        let json = r#"<script>var player_aaaa={"flag":"play","url":"https:\/\/v.test\/a.m3u8"}</script>"#;
        assert_eq!(
            HtmlPageParser.player_source(json).as_deref(),
            Some("https://v.test/a.m3u8")
        );

        assert_eq!(HtmlPageParser.player_source("<script>var x = 1;</script>"), None);
    }

    #[test]
    fn test_scan_media_address() {
        let html = r#"<script>var src = "http://a.example/x.m3u8";</script>"#;
        assert_eq!(
            HtmlPageParser.scan_media_address(html).as_deref(),
            Some("http://a.example/x.m3u8")
        );
        assert_eq!(HtmlPageParser.scan_media_address("<p>nothing</p>"), None);
    }
}
