/// Video download driver
///
/// Shells out to `yt-dlp` to fetch HLS media by manifest URL. Quality tags
/// map to height-bounded format selectors; subtitle tracks can be fetched
/// and embedded, or fetched alone. Fragment transfer parallelism is
/// yt-dlp's business, not ours.
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Browser-like request headers; the origin CDN throttles bare clients.
const REQUEST_HEADERS: &[(&str, &str)] = &[
    (
        "User-Agent",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    ),
    ("Accept", "*/*"),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Origin", "https://watch.thechosen.tv"),
    ("Referer", "https://watch.thechosen.tv/"),
];

/// Per-download settings, resolved by the CLI from flags and config.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub output_path: Option<PathBuf>,
    pub quality: Option<String>,
    pub subtitles: bool,
    pub subtitle_lang: String,
    pub subtitles_only: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            output_path: None,
            quality: None,
            subtitles: true,
            subtitle_lang: "zh-TW".to_string(),
            subtitles_only: false,
        }
    }
}

/// Downloads videos by driving yt-dlp as a subprocess.
pub struct VideoDownloader;

impl VideoDownloader {
    pub fn new() -> Self {
        Self
    }

    /// Download one manifest URL. A non-zero yt-dlp exit is a per-episode
    /// failure for the caller to tally.
    pub async fn download(&self, url: &str, options: &DownloadOptions) -> Result<()> {
        let args = build_args(url, options);
        debug!("yt-dlp args: {:?}", args);

        let status = tokio::process::Command::new("yt-dlp")
            .args(&args)
            .status()
            .await
            .context("failed to launch yt-dlp (is it installed?)")?;

        if !status.success() {
            return Err(anyhow!("yt-dlp exited with {}", status));
        }

        info!("✅ Download completed");
        Ok(())
    }
}

impl Default for VideoDownloader {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a quality tag to a yt-dlp format selector. Unknown or absent tags
/// fall back to unbounded best quality.
fn format_selector(quality: Option<&str>) -> String {
    let height = match quality.map(|q| q.to_lowercase()).as_deref() {
        Some("2160p") => 2160,
        Some("1080p") => 1080,
        Some("720p") => 720,
        Some("480p") => 480,
        Some("360p") => 360,
        _ => return "bestvideo+bestaudio/best".to_string(),
    };
    format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]", h = height)
}

/// Normalize a subtitle language code to the manifest's track naming:
/// hyphens become underscores, lowercase (`zh-TW` -> `zh_tw`).
fn normalize_subtitle_lang(lang: &str) -> String {
    lang.replace('-', "_").to_lowercase()
}

fn build_args(url: &str, options: &DownloadOptions) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--retries".into(),
        "10".into(),
        "--fragment-retries".into(),
        "10".into(),
        "--abort-on-unavailable-fragments".into(),
    ];

    for (name, value) in REQUEST_HEADERS {
        args.push("--add-headers".into());
        args.push(format!("{}:{}", name, value));
    }

    if options.subtitles_only {
        args.push("--skip-download".into());
    } else {
        args.push("--format".into());
        args.push(format_selector(options.quality.as_deref()));
        args.push("--concurrent-fragments".into());
        args.push("4".into());
    }

    if options.subtitles || options.subtitles_only {
        args.push("--write-subs".into());
        args.push("--write-auto-subs".into());
        args.push("--sub-langs".into());
        args.push(normalize_subtitle_lang(&options.subtitle_lang));
        if !options.subtitles_only {
            args.push("--embed-subs".into());
        }
    }

    args.push("--output".into());
    args.push(output_template(options.output_path.as_deref()));

    args.push(url.to_string());
    args
}

fn output_template(output_path: Option<&Path>) -> String {
    match output_path {
        Some(path) if path.is_absolute() => path.to_string_lossy().into_owned(),
        Some(path) => std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
            .to_string_lossy()
            .into_owned(),
        None => "%(title)s.%(ext)s".to_string(),
    }
}
