/// Episode selection expression parsing
///
/// A selection is a comma-separated list of terms, each either an inclusive
/// range `A-B` or a single episode number. Malformed terms and numbers not
/// present in the cache are skipped with a warning, never fatal.
/// Overlapping terms are not deduplicated; `1-3,2` yields episode 2 twice.
use tracing::warn;

use crate::cache::{Cache, CacheEntry};

pub fn parse_episode_selection(selection: &str, cache: &Cache) -> Vec<CacheEntry> {
    let mut episodes = Vec::new();

    for term in selection.split(',') {
        let term = term.trim();

        if let Some((start, end)) = term.split_once('-') {
            match (start.trim().parse::<u32>(), end.trim().parse::<u32>()) {
                (Ok(start), Ok(end)) => {
                    episodes.extend(cache.get_episodes_in_range(start, end));
                }
                _ => warn!("Invalid range: {}", term),
            }
        } else {
            match term.parse::<u32>() {
                Ok(number) => match cache.get_episode(number) {
                    Some(episode) => episodes.push(episode.clone()),
                    None => warn!("Episode {} not found in cache", number),
                },
                Err(_) => warn!("Invalid episode number: {}", term),
            }
        }
    }

    episodes
}
