/// Episode URL cache with atomic persistence
///
/// Stores resolved m3u8 manifest URLs keyed by episode number so that
/// repeated downloads never have to re-drive the browser. The on-disk
/// format is a single JSON snapshot; every save replaces the whole file
/// atomically.
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One resolved episode.
///
/// `episode_number` is the sole lookup key; `episode_url` records where the
/// manifest came from and is provenance only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub episode_number: u32,
    pub title: String,
    pub episode_url: String,
    pub m3u8_url: String,
    #[serde(default = "now_timestamp")]
    pub extracted_at: String,
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

impl CacheEntry {
    pub fn new(
        episode_number: u32,
        title: impl Into<String>,
        episode_url: impl Into<String>,
        m3u8_url: impl Into<String>,
    ) -> Self {
        Self {
            episode_number,
            title: title.into(),
            episode_url: episode_url.into(),
            m3u8_url: m3u8_url.into(),
            extracted_at: now_timestamp(),
        }
    }
}

/// On-disk cache shape. Unknown fields written by newer versions are ignored.
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    season: Option<u32>,
    #[serde(default)]
    episodes: Vec<CacheEntry>,
}

/// A named durable collection of cache entries, bound to one file.
///
/// `episodes` is kept sorted ascending by episode number after every
/// mutation, with at most one entry per number.
#[derive(Debug)]
pub struct Cache {
    cache_file: PathBuf,
    pub season: Option<u32>,
    episodes: Vec<CacheEntry>,
}

impl Cache {
    pub fn new(cache_file: impl Into<PathBuf>) -> Self {
        Self {
            cache_file: cache_file.into(),
            season: None,
            episodes: Vec::new(),
        }
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    /// Load the cache from its backing file.
    ///
    /// A missing file is not an error: the cache initializes empty and this
    /// returns `Ok`. An unreadable or unparseable file returns `Err` and
    /// leaves the cache in the same empty state, so the caller can tell
    /// "unusable" apart from "empty by design" through the return value.
    pub async fn load(&mut self) -> Result<()> {
        self.season = None;
        self.episodes.clear();

        if !self.cache_file.exists() {
            debug!("No cache file at {}, starting empty", self.cache_file.display());
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.cache_file)
            .await
            .with_context(|| format!("failed to read cache file {}", self.cache_file.display()))?;

        let data: CacheFile = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse cache file {}", self.cache_file.display()))?;

        self.season = data.season;
        self.episodes = data.episodes;
        self.episodes.sort_by_key(|ep| ep.episode_number);

        debug!(
            "Loaded {} cached episodes from {}",
            self.episodes.len(),
            self.cache_file.display()
        );
        Ok(())
    }

    /// Persist the full collection atomically.
    ///
    /// The snapshot is written to a temporary file in the same directory and
    /// renamed onto the target, so a concurrent reader sees either the old
    /// complete snapshot or the new one, never a partial write. On failure
    /// the temporary file is removed and the target is left untouched.
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.cache_file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("failed to create cache directory {}", parent.display())
                })?;
            }
        }

        let data = CacheFile {
            season: self.season,
            episodes: self.episodes.clone(),
        };
        let json = serde_json::to_string_pretty(&data).context("failed to serialize cache")?;

        let temp_path = self.temp_path();
        if let Err(e) = tokio::fs::write(&temp_path, &json).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e).with_context(|| {
                format!("failed to write temporary cache file {}", temp_path.display())
            });
        }

        if let Err(e) = tokio::fs::rename(&temp_path, &self.cache_file).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e).with_context(|| {
                format!("failed to replace cache file {}", self.cache_file.display())
            });
        }

        debug!(
            "Saved {} episodes to {}",
            self.episodes.len(),
            self.cache_file.display()
        );
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .cache_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cache.json".to_string());
        self.cache_file
            .with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()))
    }

    /// Add or replace an episode, keyed by episode number.
    pub fn add_episode(&mut self, entry: CacheEntry) {
        self.episodes
            .retain(|ep| ep.episode_number != entry.episode_number);
        self.episodes.push(entry);
        self.episodes.sort_by_key(|ep| ep.episode_number);
    }

    pub fn get_episode(&self, episode_number: u32) -> Option<&CacheEntry> {
        self.episodes
            .iter()
            .find(|ep| ep.episode_number == episode_number)
    }

    /// Episodes with numbers in `start..=end`, ascending.
    pub fn get_episodes_in_range(&self, start: u32, end: u32) -> Vec<CacheEntry> {
        self.episodes
            .iter()
            .filter(|ep| start <= ep.episode_number && ep.episode_number <= end)
            .cloned()
            .collect()
    }

    /// Defensive copy of all entries, ascending by episode number.
    pub fn get_all_episodes(&self) -> Vec<CacheEntry> {
        self.episodes.clone()
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    /// Reset to an empty collection with no season. Disk state is untouched
    /// until the next `save`.
    pub fn clear(&mut self) {
        self.episodes.clear();
        self.season = None;
    }
}
