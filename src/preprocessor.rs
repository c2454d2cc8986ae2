/// Batch preprocessing of episode sources
///
/// Resolves a list of sources (episode page URLs or saved HTML files) through
/// the extractor and fills a cache with the results. Remote resolutions are
/// paced with a fixed delay so the origin is not hammered; a source that
/// fails to resolve is skipped, never aborting the batch.
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::browser::PageRenderer;
use crate::cache::{Cache, CacheEntry};
use crate::extractor::UrlExtractor;

pub struct Preprocessor {
    extractor: UrlExtractor,
    rate_limit: Duration,
}

impl Preprocessor {
    pub fn new(rate_limit: Duration) -> Self {
        Self {
            extractor: UrlExtractor::new(),
            rate_limit,
        }
    }

    pub fn with_page_load_timeout(mut self, timeout: Duration) -> Self {
        self.extractor = UrlExtractor::new().with_page_load_timeout(timeout);
        self
    }

    /// Resolve every source in `list_file` and persist the results to
    /// `cache_file`.
    ///
    /// Overall success is the success of the final save; individual sources
    /// failing to resolve is expected and only reduces the entry count.
    pub async fn process_url_list(
        &self,
        list_file: &Path,
        cache_file: &Path,
        season: u32,
        renderer: &dyn PageRenderer,
    ) -> Result<()> {
        let sources = self.read_source_list(list_file).await?;
        if sources.is_empty() {
            bail!("no URLs found in {}", list_file.display());
        }
        info!("Found {} sources to process", sources.len());

        let mut cache = Cache::new(cache_file);
        cache.season = Some(season);

        let resolved = self.process_sources(&sources, &mut cache, renderer).await;

        cache
            .save()
            .await
            .with_context(|| format!("failed to save cache to {}", cache_file.display()))?;
        info!(
            "💾 Cached {} episodes ({} resolved this run) to {}",
            cache.len(),
            resolved,
            cache_file.display()
        );
        Ok(())
    }

    /// Resolve each source into `cache`, returning how many resolved.
    ///
    /// The episode number is parsed from the resolved title when possible,
    /// falling back to the source's 1-based position in the list.
    pub async fn process_sources(
        &self,
        sources: &[String],
        cache: &mut Cache,
        renderer: &dyn PageRenderer,
    ) -> usize {
        let total = sources.len();
        let mut resolved = 0;

        for (index, source) in sources.iter().enumerate() {
            let position = index + 1;
            info!("[{}/{}] Processing: {}", position, total, source);

            let is_local = Path::new(source).exists();
            let outcome = if is_local {
                self.extractor.extract_from_file(Path::new(source)).await
            } else {
                self.extractor.extract_from_url(renderer, source).await
            };

            match outcome {
                Ok(extraction) => {
                    let episode_number = extraction
                        .title
                        .as_deref()
                        .and_then(|title| self.extractor.extract_episode_number(title))
                        .unwrap_or(position as u32);
                    let title = extraction
                        .title
                        .unwrap_or_else(|| format!("Episode {}", episode_number));

                    info!("  Episode {}: {}", episode_number, title);
                    cache.add_episode(CacheEntry::new(
                        episode_number,
                        title,
                        source.clone(),
                        extraction.m3u8_url,
                    ));
                    resolved += 1;
                }
                Err(e) => {
                    warn!("Failed to extract m3u8 URL from {}: {}", source, e);
                }
            }

            // Pace remote resolutions only; no pause after the final item.
            if !is_local && position < total {
                tokio::time::sleep(self.rate_limit).await;
            }
        }

        resolved
    }

    /// Read sources from a list file, one per line. A line is accepted when
    /// it is a URL, names an existing file, or at least looks like a saved
    /// HTML snapshot.
    async fn read_source_list(&self, path: &Path) -> Result<Vec<String>> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read source list {}", path.display()))?;

        let sources = content
            .lines()
            .map(str::trim)
            .filter(|line| {
                line.starts_with("http") || Path::new(line).exists() || line.ends_with(".html")
            })
            .map(str::to_string)
            .collect();
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{RenderError, RenderedPage};
    use async_trait::async_trait;
    use tempfile::tempdir;

    /// Renderer that always fails; the tests below only resolve local files.
    struct UnreachableRenderer;

    #[async_trait]
    impl PageRenderer for UnreachableRenderer {
        async fn render(
            &self,
            _url: &str,
            _timeout: Duration,
        ) -> Result<RenderedPage, RenderError> {
            Err(RenderError::Launch("no browser in tests".to_string()))
        }
    }

    fn page_with_manifest(title: Option<&str>, token: &str) -> String {
        let title_tag = title
            .map(|t| format!(r#"<meta property="og:title" content="{}">"#, t))
            .unwrap_or_default();
        format!(
            r#"<html><head>{}</head>
            <body>"https://cdn.example.com/{}/hls.m3u8?viewerToken={}"</body></html>"#,
            title_tag, token, token
        )
    }

    #[tokio::test]
    async fn test_episode_number_comes_from_title_when_present() {
        let dir = tempdir().unwrap();
        let page = dir.path().join("ep.html");
        tokio::fs::write(&page, page_with_manifest(Some("Season 1 Episode 5: Wedding Gift"), "t5"))
            .await
            .unwrap();

        let preprocessor = Preprocessor::new(Duration::ZERO);
        let mut cache = Cache::new(dir.path().join("cache.json"));
        let sources = vec![page.to_string_lossy().into_owned()];

        let resolved = preprocessor
            .process_sources(&sources, &mut cache, &UnreachableRenderer)
            .await;
        assert_eq!(resolved, 1);
        let entry = cache.get_episode(5).unwrap();
        assert_eq!(entry.title, "Season 1 Episode 5: Wedding Gift");
        assert_eq!(entry.episode_url, sources[0]);
    }

    #[tokio::test]
    async fn test_episode_number_falls_back_to_list_position() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("a.html");
        let second = dir.path().join("b.html");
        tokio::fs::write(&first, page_with_manifest(None, "a")).await.unwrap();
        tokio::fs::write(&second, page_with_manifest(None, "b")).await.unwrap();

        let preprocessor = Preprocessor::new(Duration::ZERO);
        let mut cache = Cache::new(dir.path().join("cache.json"));
        let sources = vec![
            first.to_string_lossy().into_owned(),
            second.to_string_lossy().into_owned(),
        ];

        let resolved = preprocessor
            .process_sources(&sources, &mut cache, &UnreachableRenderer)
            .await;
        assert_eq!(resolved, 2);
        assert_eq!(cache.get_episode(1).unwrap().title, "Episode 1");
        assert_eq!(cache.get_episode(2).unwrap().title, "Episode 2");
    }

    #[tokio::test]
    async fn test_failed_source_is_skipped_without_aborting_batch() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.html");
        let bad = dir.path().join("bad.html");
        tokio::fs::write(&good, page_with_manifest(Some("Episode 2"), "g"))
            .await
            .unwrap();
        tokio::fs::write(&bad, "<html><body>no manifest here</body></html>")
            .await
            .unwrap();

        let preprocessor = Preprocessor::new(Duration::ZERO);
        let mut cache = Cache::new(dir.path().join("cache.json"));
        let sources = vec![
            bad.to_string_lossy().into_owned(),
            good.to_string_lossy().into_owned(),
        ];

        let resolved = preprocessor
            .process_sources(&sources, &mut cache, &UnreachableRenderer)
            .await;
        assert_eq!(resolved, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_episode(2).is_some());
    }

    #[tokio::test]
    async fn test_process_url_list_saves_cache_with_season() {
        let dir = tempdir().unwrap();
        let page = dir.path().join("ep1.html");
        tokio::fs::write(&page, page_with_manifest(Some("Episode 1"), "t1"))
            .await
            .unwrap();

        let list = dir.path().join("sources.txt");
        let body = format!("# comment line ignored\n{}\n\n", page.display());
        tokio::fs::write(&list, body).await.unwrap();

        let cache_file = dir.path().join("out/season2.json");
        Preprocessor::new(Duration::ZERO)
            .process_url_list(&list, &cache_file, 2, &UnreachableRenderer)
            .await
            .unwrap();

        let mut reloaded = Cache::new(&cache_file);
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.season, Some(2));
        assert_eq!(reloaded.len(), 1);
    }

    #[tokio::test]
    async fn test_save_failure_propagates_from_process_url_list() {
        let dir = tempdir().unwrap();
        let page = dir.path().join("ep1.html");
        tokio::fs::write(&page, page_with_manifest(Some("Episode 1"), "t1"))
            .await
            .unwrap();

        let list = dir.path().join("sources.txt");
        tokio::fs::write(&list, format!("{}\n", page.display()))
            .await
            .unwrap();

        // A directory squatting on the cache path makes the final rename
        // fail, and that failure must surface as the overall result.
        let cache_path = dir.path().join("cache.json");
        tokio::fs::create_dir(&cache_path).await.unwrap();

        let result = Preprocessor::new(Duration::ZERO)
            .process_url_list(&list, &cache_path, 1, &UnreachableRenderer)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_source_list_is_an_error() {
        let dir = tempdir().unwrap();
        let list = dir.path().join("sources.txt");
        tokio::fs::write(&list, "just prose, no urls\n").await.unwrap();

        let result = Preprocessor::new(Duration::ZERO)
            .process_url_list(
                &list,
                &dir.path().join("cache.json"),
                1,
                &UnreachableRenderer,
            )
            .await;
        assert!(result.is_err());
    }
}
