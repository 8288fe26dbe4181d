//! yt-dlp adapter: URL-to-local-audio acquisition and video metadata.

use std::path::Path;
use std::process::Command;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Result, SublingoError};

/// Minimal sanity check before handing a link to the downloader.
pub fn is_supported_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Download the best audio track of a remote video as mp3.
pub fn download_audio(config: &Config, url: &str, output: &Path) -> Result<()> {
    if !is_supported_url(url) {
        return Err(SublingoError::Download(format!("invalid link: {url}")));
    }

    let mut cmd = Command::new(&config.ytdlp_path);
    cmd.args([
        "-f",
        "bestaudio",
        "--extract-audio",
        "--audio-format",
        "mp3",
        "--audio-quality",
        "192K",
        "-o",
    ])
    .arg(output)
    .arg(url);
    append_cookies(&mut cmd, config);

    info!(url, "downloading audio");
    let output_result = cmd
        .output()
        .map_err(|e| SublingoError::Download(format!("failed to run yt-dlp: {e}")))?;
    if !output_result.status.success() {
        let stderr = String::from_utf8_lossy(&output_result.stderr);
        let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
        return Err(SublingoError::Download(format!("yt-dlp failed: {tail}")));
    }
    if !output.exists() {
        return Err(SublingoError::Download(
            "yt-dlp reported success but produced no file".to_string(),
        ));
    }
    Ok(())
}

/// Title and description of a remote video. Both are best-effort; a fetch
/// failure yields an empty string rather than an error.
pub fn fetch_video_info(config: &Config, url: &str) -> (String, String) {
    let title = fetch_field(config, url, "--get-title");
    let description = fetch_field(config, url, "--get-description");
    (title, description)
}

fn fetch_field(config: &Config, url: &str, flag: &str) -> String {
    let mut cmd = Command::new(&config.ytdlp_path);
    cmd.args(["--skip-download", "--encoding", "utf-8", flag, url]);
    append_cookies(&mut cmd, config);

    match cmd.output() {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        Ok(output) => {
            warn!(
                flag,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "yt-dlp metadata fetch failed"
            );
            String::new()
        }
        Err(e) => {
            warn!(flag, error = %e, "failed to run yt-dlp");
            String::new()
        }
    }
}

fn append_cookies(cmd: &mut Command, config: &Config) {
    if let Some(cookies) = &config.cookies_file {
        if cookies.exists() {
            cmd.arg("--cookies").arg(cookies);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_supported_url() {
        assert!(is_supported_url("https://www.youtube.com/watch?v=abc"));
        assert!(is_supported_url("http://example.com/video"));
        assert!(!is_supported_url("ftp://example.com/video"));
        assert!(!is_supported_url("/local/path.mp4"));
    }

    #[test]
    fn test_download_rejects_bad_url() {
        let config = Config::default();
        let result = download_audio(&config, "not a url", Path::new("/tmp/out.mp3"));
        assert!(matches!(result, Err(SublingoError::Download(_))));
    }
}
