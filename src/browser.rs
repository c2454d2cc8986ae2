/// Headless-browser render capability
///
/// The platform only hands out a tokenized manifest URL once its player
/// boots, so live pages are rendered in headless Chromium while every
/// outgoing network request is recorded. The `PageRenderer` trait is the
/// seam the extractor works against; tests substitute their own
/// implementation.
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{EnableParams, EventRequestWillBeSent};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("page navigation failed: {0}")]
    Navigation(String),
}

/// What a render pass observed: every outgoing request URL in order, the
/// final DOM serialized back to HTML, and the page title when one was set.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub request_urls: Vec<String>,
    pub html: String,
    pub title: Option<String>,
}

/// Render a page and observe its network traffic.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str, timeout: Duration) -> Result<RenderedPage, RenderError>;
}

/// `PageRenderer` backed by headless Chromium via the DevTools protocol.
///
/// A fresh browser is launched per render and closed afterwards; one
/// extraction at a time is the expected usage.
pub struct ChromiumRenderer {
    video_wait_timeout: Duration,
    settle_delay: Duration,
}

impl ChromiumRenderer {
    pub fn new() -> Self {
        Self {
            video_wait_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_secs(5),
        }
    }

    pub fn with_video_wait_timeout(mut self, timeout: Duration) -> Self {
        self.video_wait_timeout = timeout;
        self
    }

    async fn render_page(
        &self,
        browser: &Browser,
        url: &str,
        timeout: Duration,
    ) -> Result<RenderedPage, RenderError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;

        // Enable the network domain and start recording requests before
        // navigation so the player's first manifest request is not missed.
        page.execute(EnableParams::default())
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;
        let mut request_events = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;

        let request_urls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&request_urls);
        let collector = tokio::spawn(async move {
            while let Some(event) = request_events.next().await {
                if let Ok(mut urls) = sink.lock() {
                    urls.push(event.request.url.clone());
                }
            }
        });

        debug!("Navigating to {}", url);
        let navigation = tokio::time::timeout(timeout, async {
            page.goto(url).await?.wait_for_navigation().await.map(|_| ())
        })
        .await;
        match navigation {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                collector.abort();
                return Err(RenderError::Navigation(e.to_string()));
            }
            // A slow page is tolerated; the manifest request may already
            // have been captured.
            Err(_) => warn!("Page load timed out, continuing with captured requests"),
        }

        // Wait for the video player element, tolerating its absence.
        let deadline = Instant::now() + self.video_wait_timeout;
        loop {
            if page.find_element("video").await.is_ok() {
                debug!("Video player loaded");
                break;
            }
            if Instant::now() >= deadline {
                warn!("Timeout waiting for video player, continuing");
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        // Give the player a moment to issue its manifest request.
        tokio::time::sleep(self.settle_delay).await;

        let html = page.content().await.unwrap_or_default();
        let title = page.get_title().await.ok().flatten();

        collector.abort();
        let request_urls = request_urls
            .lock()
            .map(|urls| urls.clone())
            .unwrap_or_default();

        debug!("Captured {} network requests", request_urls.len());
        Ok(RenderedPage {
            request_urls,
            html,
            title,
        })
    }
}

impl Default for ChromiumRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageRenderer for ChromiumRenderer {
    async fn render(&self, url: &str, timeout: Duration) -> Result<RenderedPage, RenderError> {
        let config = BrowserConfig::builder()
            .build()
            .map_err(RenderError::Launch)?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;
        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let result = self.render_page(&browser, url, timeout).await;

        if let Err(e) = browser.close().await {
            warn!("Failed to close browser cleanly: {}", e);
        }
        let _ = browser.wait().await;
        handler_task.abort();

        result
    }
}
