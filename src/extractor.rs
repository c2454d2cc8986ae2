/// Manifest URL and title extraction from The Chosen episode pages
///
/// Pages carry the HLS manifest URL (`hls.m3u8?viewerToken=...`) in one of
/// several places depending on how the page was produced: the `og:url` meta
/// tag, the static markup, or an inline script. Live pages additionally
/// reveal it through the player's own network request, which is the most
/// reliable signal when available.
use regex::Regex;
use scraper::{Html, Selector};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::browser::PageRenderer;

/// Pattern for a tokenized HLS manifest URL. Greedy token capture ends at
/// the first whitespace or quote.
const MANIFEST_PATTERN: &str = r#"https://[^"\s]+/hls\.m3u8\?viewerToken=[^"\s]+"#;

/// Ordered episode-number patterns tried against a title.
const EPISODE_NUMBER_PATTERNS: &[&str] = &[
    r"(?i)Episode\s+(\d+)",
    r"(?i)Ep\s+(\d+)",
    r"(?i)E(\d+)",
    r"第\s*(\d+)\s*集",
];

#[derive(Debug, Error)]
pub enum ExtractorError {
    /// No strategy produced a manifest URL. Any title that was found is
    /// carried along so callers can still report which episode failed.
    #[error("no m3u8 manifest URL found in document")]
    ManifestNotFound { title: Option<String> },

    #[error("failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("browser error: {0}")]
    Browser(String),
}

/// A successful extraction: the manifest URL plus the page title when known.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub m3u8_url: String,
    pub title: Option<String>,
}

/// Extracts m3u8 manifest URLs from The Chosen streaming pages.
pub struct UrlExtractor {
    page_load_timeout: Duration,
}

impl UrlExtractor {
    pub fn new() -> Self {
        Self {
            page_load_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_page_load_timeout(mut self, timeout: Duration) -> Self {
        self.page_load_timeout = timeout;
        self
    }

    /// Extract the manifest URL and title from a saved HTML file.
    pub async fn extract_from_file(&self, path: &Path) -> Result<Extraction, ExtractorError> {
        let html = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ExtractorError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;
        self.extract_from_html(&html)
    }

    /// Extract the manifest URL and title from HTML content.
    ///
    /// Title extraction never fails the call; a missing manifest URL does.
    pub fn extract_from_html(&self, html: &str) -> Result<Extraction, ExtractorError> {
        let document = Html::parse_document(html);

        let title = self.extract_title(&document);
        let m3u8_url = self.extract_m3u8_url(&document, html);

        debug!(
            "Extracted manifest: {}, title: {:?}",
            m3u8_url.as_deref().unwrap_or("<none>"),
            title
        );

        match m3u8_url {
            Some(m3u8_url) => Ok(Extraction { m3u8_url, title }),
            None => Err(ExtractorError::ManifestNotFound { title }),
        }
    }

    /// Extract the manifest URL and title from a live episode page.
    ///
    /// The page is rendered in a headless browser while its network requests
    /// are observed; the first request for a `.m3u8` resource is
    /// authoritative. If no such request was seen, the rendered HTML is
    /// scanned with the same pattern used for static documents. Page-load
    /// and element-wait timeouts inside the renderer are non-fatal.
    pub async fn extract_from_url(
        &self,
        renderer: &dyn PageRenderer,
        url: &str,
    ) -> Result<Extraction, ExtractorError> {
        info!("  Launching browser...");
        let page = renderer
            .render(url, self.page_load_timeout)
            .await
            .map_err(|e| ExtractorError::Browser(e.to_string()))?;

        let from_requests = page
            .request_urls
            .iter()
            .find(|request_url| request_url.contains(".m3u8"))
            .cloned();

        let m3u8_url = match from_requests {
            Some(found) => {
                debug!("Manifest captured from network request: {}", truncate(&found));
                Some(found)
            }
            None => {
                debug!("No m3u8 request observed, scanning rendered HTML");
                scan_for_manifest(&page.html)
            }
        };

        let title = page
            .title
            .filter(|t| !t.is_empty())
            .or_else(|| self.extract_title(&Html::parse_document(&page.html)));

        match m3u8_url {
            Some(m3u8_url) => {
                info!("  Video URL extracted successfully");
                Ok(Extraction { m3u8_url, title })
            }
            None => {
                warn!("  Could not find video URL for {}", url);
                Err(ExtractorError::ManifestNotFound { title })
            }
        }
    }

    /// Apply the manifest strategies in order of precedence.
    fn extract_m3u8_url(&self, document: &Html, html: &str) -> Option<String> {
        // Strategy 1: og:url meta tag, only when it already carries the
        // manifest path and a viewer token. A plain canonical page URL in
        // og:url must not win here.
        if let Ok(selector) = Selector::parse(r#"meta[property="og:url"]"#) {
            if let Some(content) = document
                .select(&selector)
                .next()
                .and_then(|meta| meta.value().attr("content"))
            {
                if content.contains("hls.m3u8") && content.contains("viewerToken=") {
                    return Some(content.to_string());
                }
            }
        }

        // Strategy 2: pattern scan of the raw document text.
        if let Some(found) = scan_for_manifest(html) {
            return Some(found);
        }

        // Strategy 3: pattern scan restricted to script contents, for
        // manifests injected via inline script.
        if let Ok(selector) = Selector::parse("script") {
            for script in document.select(&selector) {
                let text: String = script.text().collect();
                if let Some(found) = scan_for_manifest(&text) {
                    return Some(found);
                }
            }
        }

        None
    }

    /// Title precedence: og:title content, then the trimmed `<title>` text.
    fn extract_title(&self, document: &Html) -> Option<String> {
        if let Ok(selector) = Selector::parse(r#"meta[property="og:title"]"#) {
            if let Some(content) = document
                .select(&selector)
                .next()
                .and_then(|meta| meta.value().attr("content"))
            {
                if !content.is_empty() {
                    return Some(content.to_string());
                }
            }
        }

        if let Ok(selector) = Selector::parse("title") {
            if let Some(title) = document.select(&selector).next() {
                let text = title.text().collect::<String>().trim().to_string();
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }

        None
    }

    /// Best-effort episode number from a title, first matching pattern wins.
    pub fn extract_episode_number(&self, title: &str) -> Option<u32> {
        for pattern in EPISODE_NUMBER_PATTERNS {
            if let Ok(re) = Regex::new(pattern) {
                if let Some(captures) = re.captures(title) {
                    if let Some(number) = captures.get(1).and_then(|m| m.as_str().parse().ok()) {
                        return Some(number);
                    }
                }
            }
        }
        None
    }
}

impl Default for UrlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// First tokenized manifest URL in the text, if any.
fn scan_for_manifest(text: &str) -> Option<String> {
    if let Ok(re) = Regex::new(MANIFEST_PATTERN) {
        if let Some(found) = re.find(text) {
            return Some(found.as_str().to_string());
        }
    }
    None
}

fn truncate(url: &str) -> String {
    url.chars().take(100).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{RenderError, RenderedPage};
    use async_trait::async_trait;

    const MANIFEST_IN_META: &str =
        "https://cdn.example.com/meta/hls.m3u8?viewerToken=from-meta";
    const MANIFEST_IN_SCRIPT: &str =
        "https://cdn.example.com/script/hls.m3u8?viewerToken=from-script";

    struct FakeRenderer {
        page: RenderedPage,
    }

    #[async_trait]
    impl PageRenderer for FakeRenderer {
        async fn render(
            &self,
            _url: &str,
            _timeout: Duration,
        ) -> Result<RenderedPage, RenderError> {
            Ok(self.page.clone())
        }
    }

    #[test]
    fn test_meta_tag_strategy_takes_precedence_over_script() {
        let html = format!(
            r#"<html><head>
                <meta property="og:url" content="{}">
                <script>var src = "{}";</script>
            </head><body></body></html>"#,
            MANIFEST_IN_META, MANIFEST_IN_SCRIPT
        );

        let extraction = UrlExtractor::new().extract_from_html(&html).unwrap();
        assert_eq!(extraction.m3u8_url, MANIFEST_IN_META);
    }

    #[test]
    fn test_meta_tag_without_viewer_token_is_rejected() {
        let html = format!(
            r#"<html><head>
                <meta property="og:url" content="https://watch.example.tv/video/1">
                <script>var src = "{}";</script>
            </head><body></body></html>"#,
            MANIFEST_IN_SCRIPT
        );

        let extraction = UrlExtractor::new().extract_from_html(&html).unwrap();
        assert_eq!(extraction.m3u8_url, MANIFEST_IN_SCRIPT);
    }

    #[test]
    fn test_raw_text_scan_terminates_at_quote() {
        let html = format!(
            r#"<html><body><div data-src="{}"></div></body></html>"#,
            MANIFEST_IN_META
        );

        let extraction = UrlExtractor::new().extract_from_html(&html).unwrap();
        assert_eq!(extraction.m3u8_url, MANIFEST_IN_META);
    }

    #[test]
    fn test_missing_manifest_is_an_error_but_carries_title() {
        let html = r#"<html><head>
            <meta property="og:title" content="Season 1 Episode 2: Shabbat">
        </head><body>nothing here</body></html>"#;

        let err = UrlExtractor::new().extract_from_html(html).unwrap_err();
        match err {
            ExtractorError::ManifestNotFound { title } => {
                assert_eq!(title.as_deref(), Some("Season 1 Episode 2: Shabbat"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_title_prefers_og_title_over_title_tag() {
        let html = format!(
            r#"<html><head>
                <meta property="og:title" content="Episode 3: Jesus Loves the Little Children">
                <title>  The Chosen | watch free  </title>
                <meta property="og:url" content="{}">
            </head></html>"#,
            MANIFEST_IN_META
        );

        let extraction = UrlExtractor::new().extract_from_html(&html).unwrap();
        assert_eq!(
            extraction.title.as_deref(),
            Some("Episode 3: Jesus Loves the Little Children")
        );
    }

    #[test]
    fn test_title_falls_back_to_trimmed_title_tag() {
        let html = format!(
            r#"<html><head>
                <title>  Episode 4  </title>
                <meta property="og:url" content="{}">
            </head></html>"#,
            MANIFEST_IN_META
        );

        let extraction = UrlExtractor::new().extract_from_html(&html).unwrap();
        assert_eq!(extraction.title.as_deref(), Some("Episode 4"));
    }

    #[test]
    fn test_episode_number_patterns() {
        let extractor = UrlExtractor::new();
        assert_eq!(
            extractor.extract_episode_number("Season 1 Episode 7: Invitations"),
            Some(7)
        );
        assert_eq!(extractor.extract_episode_number("ep 12 - finale"), Some(12));
        assert_eq!(extractor.extract_episode_number("S01E05"), Some(5));
        assert_eq!(extractor.extract_episode_number("第 3 集"), Some(3));
        assert_eq!(extractor.extract_episode_number("Random Title"), None);
    }

    #[tokio::test]
    async fn test_live_extraction_prefers_observed_network_request() {
        let renderer = FakeRenderer {
            page: RenderedPage {
                request_urls: vec![
                    "https://cdn.example.com/app.js".to_string(),
                    "https://cdn.example.com/live/hls.m3u8?viewerToken=live".to_string(),
                ],
                html: format!(r#"<html><body>"{}"</body></html>"#, MANIFEST_IN_META),
                title: Some("Episode 1".to_string()),
            },
        };

        let extraction = UrlExtractor::new()
            .extract_from_url(&renderer, "https://watch.example.tv/video/1")
            .await
            .unwrap();
        assert_eq!(
            extraction.m3u8_url,
            "https://cdn.example.com/live/hls.m3u8?viewerToken=live"
        );
        assert_eq!(extraction.title.as_deref(), Some("Episode 1"));
    }

    #[tokio::test]
    async fn test_live_extraction_falls_back_to_rendered_html() {
        let renderer = FakeRenderer {
            page: RenderedPage {
                request_urls: vec!["https://cdn.example.com/app.js".to_string()],
                html: format!(r#"<html><body>"{}"</body></html>"#, MANIFEST_IN_META),
                title: None,
            },
        };

        let extraction = UrlExtractor::new()
            .extract_from_url(&renderer, "https://watch.example.tv/video/1")
            .await
            .unwrap();
        assert_eq!(extraction.m3u8_url, MANIFEST_IN_META);
    }
}
