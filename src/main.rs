use anyhow::{anyhow, bail, Context, Result};
use clap::{Arg, ArgAction, Command};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use chosen_dl::{
    parse_episode_selection, Cache, CacheEntry, ChromiumRenderer, Config, DownloadOptions,
    PageRenderer, Preprocessor, UrlExtractor, VideoDownloader,
};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("chosen-dl")
        .version("0.1.0")
        .about("Download episodes from The Chosen streaming platform")
        .arg(
            Arg::new("sources")
                .num_args(0..)
                .value_name("SOURCE")
                .help("Episode URL(s), HTML file(s), or a cache file (with --batch)")
        )
        .arg(
            Arg::new("preprocess")
                .long("preprocess")
                .value_name("FILE")
                .conflicts_with("batch")
                .help("Preprocess a URL list file (extract and cache m3u8 URLs)")
        )
        .arg(
            Arg::new("batch")
                .long("batch")
                .action(ArgAction::SetTrue)
                .help("Batch download mode (source should be a cache file)")
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("PATH")
                .help("Output filename or cache file path")
        )
        .arg(
            Arg::new("quality")
                .short('q')
                .long("quality")
                .value_name("QUALITY")
                .value_parser(["360p", "480p", "720p", "1080p", "2160p"])
                .help("Video quality preference (default: 1080p)")
        )
        .arg(
            Arg::new("no-subtitles")
                .long("no-subtitles")
                .action(ArgAction::SetTrue)
                .help("Disable subtitle download")
        )
        .arg(
            Arg::new("subtitles-only")
                .long("subtitles-only")
                .action(ArgAction::SetTrue)
                .help("Download subtitles only, without video")
        )
        .arg(
            Arg::new("subtitle-lang")
                .long("subtitle-lang")
                .value_name("LANG")
                .help("Subtitle language code (default: zh-TW)")
        )
        .arg(
            Arg::new("episodes")
                .short('e')
                .long("episodes")
                .value_name("SELECTION")
                .help("Episode selection for batch mode (e.g. \"1-3\" or \"1,3,5\")")
        )
        .arg(
            Arg::new("season")
                .long("season")
                .value_name("NUM")
                .default_value("1")
                .help("Season number for preprocessing")
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose logging")
        )
        .get_matches();

    // Initialize logging
    let filter = if matches.get_flag("verbose") {
        "chosen_dl=debug,info"
    } else {
        "chosen_dl=info,warn"
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });

    let sources: Vec<String> = matches
        .get_many::<String>("sources")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let base_options = DownloadOptions {
        output_path: None,
        quality: Some(
            matches
                .get_one::<String>("quality")
                .cloned()
                .unwrap_or_else(|| config.default_quality.clone()),
        ),
        subtitles: !matches.get_flag("no-subtitles"),
        subtitle_lang: matches
            .get_one::<String>("subtitle-lang")
            .cloned()
            .unwrap_or_else(|| config.default_subtitle_lang.clone()),
        subtitles_only: matches.get_flag("subtitles-only"),
    };

    if let Some(list_file) = matches.get_one::<String>("preprocess") {
        let output = matches
            .get_one::<String>("output")
            .ok_or_else(|| anyhow!("--output is required for preprocessing mode"))?;
        let season: u32 = matches
            .get_one::<String>("season")
            .unwrap()
            .parse()
            .context("invalid --season value")?;
        return preprocess_mode(&config, Path::new(list_file), Path::new(output), season).await;
    }

    if sources.is_empty() {
        bail!("at least one source is required unless using --preprocess");
    }

    if matches.get_flag("batch") {
        let selection = matches.get_one::<String>("episodes").cloned();
        return batch_mode(&sources[0], selection.as_deref(), &base_options).await;
    }

    download_mode(
        &config,
        &sources,
        matches.get_one::<String>("output").map(String::as_str),
        &base_options,
    )
    .await
}

fn renderer_from(config: &Config) -> ChromiumRenderer {
    ChromiumRenderer::new()
        .with_video_wait_timeout(Duration::from_secs(config.video_wait_timeout_secs))
}

fn extractor_from(config: &Config) -> UrlExtractor {
    UrlExtractor::new()
        .with_page_load_timeout(Duration::from_secs(config.page_load_timeout_secs))
}

/// Preprocessing mode: resolve a URL list file into a cache of m3u8 URLs.
async fn preprocess_mode(
    config: &Config,
    list_file: &Path,
    cache_file: &Path,
    season: u32,
) -> Result<()> {
    info!("Preprocessing URLs from: {}", list_file.display());
    info!("Output cache file: {}", cache_file.display());
    info!("Season: {}", season);

    let renderer = renderer_from(config);
    Preprocessor::new(config.rate_limit())
        .with_page_load_timeout(Duration::from_secs(config.page_load_timeout_secs))
        .process_url_list(list_file, cache_file, season, &renderer)
        .await
}

/// Batch mode: download episodes already resolved into a cache file.
async fn batch_mode(
    cache_file: &str,
    selection: Option<&str>,
    base_options: &DownloadOptions,
) -> Result<()> {
    if !Path::new(cache_file).exists() {
        bail!("cache file not found: {}", cache_file);
    }

    let mut cache = Cache::new(cache_file);
    cache
        .load()
        .await
        .with_context(|| format!("failed to load cache from {}", cache_file))?;

    let episodes = match selection {
        Some(selection) => parse_episode_selection(selection, &cache),
        None => cache.get_all_episodes(),
    };
    if episodes.is_empty() {
        info!("No episodes to download");
        return Ok(());
    }

    info!("Downloading {} episode(s)", episodes.len());
    let downloader = VideoDownloader::new();
    let mut failed = Vec::new();

    for (index, episode) in episodes.iter().enumerate() {
        info!(
            "[{}/{}] Episode {}: {}",
            index + 1,
            episodes.len(),
            episode.episode_number,
            episode.title
        );

        let options = DownloadOptions {
            output_path: Some(PathBuf::from(format!("{}.mp4", episode.title))),
            ..base_options.clone()
        };
        if let Err(e) = downloader.download(&episode.m3u8_url, &options).await {
            error!("Failed to download episode {}: {}", episode.episode_number, e);
            failed.push(episode.episode_number);
        }
    }

    report_tally(episodes.len(), failed.len());
    if !failed.is_empty() {
        bail!(
            "failed episodes: {}",
            failed
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(())
}

struct ResolvedSource {
    m3u8_url: String,
    title: Option<String>,
    /// Extractions are cached; direct manifest URLs are not.
    cacheable: bool,
}

/// Download mode: resolve each source (page, file, or direct manifest) and
/// download it, continuing past per-source failures.
async fn download_mode(
    config: &Config,
    sources: &[String],
    output: Option<&str>,
    base_options: &DownloadOptions,
) -> Result<()> {
    let total = sources.len();
    if total > 1 {
        info!("Downloading {} episode(s)", total);
    }

    let extractor = extractor_from(config);
    let renderer = renderer_from(config);
    let downloader = VideoDownloader::new();
    let mut failed = Vec::new();

    for (index, source) in sources.iter().enumerate() {
        let position = index + 1;
        if total > 1 {
            info!("[{}/{}] Processing: {}", position, total, source);
        }

        let resolved = match resolve_source(&extractor, &renderer, source).await {
            Ok(resolved) => resolved,
            Err(e) => {
                error!("Failed to extract m3u8 URL from {}: {}", source, e);
                failed.push(source.clone());
                continue;
            }
        };

        if resolved.cacheable {
            save_to_auto_cache(
                config,
                &extractor,
                source,
                &resolved.m3u8_url,
                resolved.title.as_deref(),
            )
            .await;
        }

        let output_path = output_path_for(output, resolved.title.as_deref(), position, total);
        info!("Downloading to: {}", output_path.display());

        let options = DownloadOptions {
            output_path: Some(output_path),
            ..base_options.clone()
        };
        if let Err(e) = downloader.download(&resolved.m3u8_url, &options).await {
            error!("Download failed for {}: {}", source, e);
            failed.push(source.clone());
        }
    }

    if total > 1 {
        report_tally(total, failed.len());
    }
    if !failed.is_empty() {
        bail!("{}", download_failure_message(total, &failed));
    }
    Ok(())
}

fn download_failure_message(total: usize, failed: &[String]) -> String {
    format!(
        "{} of {} download(s) failed: {}",
        failed.len(),
        total,
        failed.join(", ")
    )
}

async fn resolve_source(
    extractor: &UrlExtractor,
    renderer: &dyn PageRenderer,
    source: &str,
) -> Result<ResolvedSource> {
    if Path::new(source).exists() {
        info!("Extracting URL from file: {}", source);
        let extraction = extractor.extract_from_file(Path::new(source)).await?;
        return Ok(ResolvedSource {
            m3u8_url: extraction.m3u8_url,
            title: extraction.title,
            cacheable: true,
        });
    }

    if let Ok(parsed) = Url::parse(source) {
        if matches!(parsed.scheme(), "http" | "https") {
            let is_episode_page = parsed
                .host_str()
                .is_some_and(|host| host.ends_with("watch.thechosen.tv"))
                && !source.contains("hls.m3u8");
            if is_episode_page {
                info!("Extracting URL from page: {}", source);
                let extraction = extractor.extract_from_url(renderer, source).await?;
                return Ok(ResolvedSource {
                    m3u8_url: extraction.m3u8_url,
                    title: extraction.title,
                    cacheable: true,
                });
            }
            // Direct manifest URL: nothing to extract, nothing to cache.
            return Ok(ResolvedSource {
                m3u8_url: source.to_string(),
                title: None,
                cacheable: false,
            });
        }
    }

    bail!("invalid source: {}", source)
}

/// Upsert an ad-hoc extraction into the automatic cache. Failures here are
/// warnings only; the download proceeds regardless.
async fn save_to_auto_cache(
    config: &Config,
    extractor: &UrlExtractor,
    source: &str,
    m3u8_url: &str,
    title: Option<&str>,
) {
    let mut cache = Cache::new(&config.auto_cache_path);
    if let Err(e) = cache.load().await {
        warn!("Auto cache unreadable, starting fresh: {}", e);
    }

    let episode_number = title
        .and_then(|title| extractor.extract_episode_number(title))
        .unwrap_or(1);
    let title = title
        .map(str::to_string)
        .unwrap_or_else(|| format!("Episode {}", episode_number));

    cache.add_episode(CacheEntry::new(episode_number, title, source, m3u8_url));
    match cache.save().await {
        Ok(()) => debug!("Cached extraction to {}", config.auto_cache_path.display()),
        Err(e) => warn!("Failed to save auto cache: {}", e),
    }
}

fn output_path_for(
    output: Option<&str>,
    title: Option<&str>,
    position: usize,
    total: usize,
) -> PathBuf {
    match output {
        // An explicit output names the first file; later files get numbered
        // variants of it.
        Some(path) if position == 1 => PathBuf::from(path),
        Some(path) => numbered_variant(path, position),
        None => match title {
            Some(title) => PathBuf::from(format!("{}.mp4", title)),
            None if total > 1 => PathBuf::from(format!("video_{}.mp4", position)),
            None => PathBuf::from("video.mp4"),
        },
    }
}

fn numbered_variant(path: &str, position: usize) -> PathBuf {
    match path.rsplit_once('.') {
        Some((base, ext)) => PathBuf::from(format!("{}_{}.{}", base, position, ext)),
        None => PathBuf::from(format!("{}_{}.mp4", path, position)),
    }
}

fn report_tally(total: usize, failed: usize) {
    info!("Download complete:");
    info!("  Successful: {}", total - failed);
    info!("  Failed: {}", failed);
}
