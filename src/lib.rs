/// chosen-dl
///
/// Extracts HLS manifest URLs from The Chosen streaming pages, caches them
/// keyed by episode number, and drives yt-dlp to download selected episodes.

pub mod browser;
pub mod cache;
pub mod config;
pub mod downloader;
pub mod extractor;
pub mod preprocessor;
pub mod selection;

// Re-export main types for easy access
pub use crate::browser::{ChromiumRenderer, PageRenderer, RenderError, RenderedPage};
pub use crate::cache::{Cache, CacheEntry};
pub use crate::config::Config;
pub use crate::downloader::{DownloadOptions, VideoDownloader};
pub use crate::extractor::{Extraction, ExtractorError, UrlExtractor};
pub use crate::preprocessor::Preprocessor;
pub use crate::selection::parse_episode_selection;
