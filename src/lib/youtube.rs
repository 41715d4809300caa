//! Local extraction through yt-dlp.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use crate::error::BackendError;
use crate::playback::{AudioBackend, StreamLocator, Track};

/// Title used when the extractor doesn't report one.
const UNKNOWN_TITLE: &str = "Unknown";

/// Runs the `yt-dlp` binary for every lookup.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
}

impl YtDlp {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

#[async_trait]
impl AudioBackend for YtDlp {
    async fn probe(&self) -> Result<(), BackendError> {
        let output = self
            .command()
            .arg("--version")
            .output()
            .await
            .map_err(BackendError::Spawn)?;

        if output.status.success() {
            let version = String::from_utf8_lossy(&output.stdout);
            tracing::debug!("Found yt-dlp {}", version.trim());
            Ok(())
        } else {
            Err(extractor_error(&output.stderr))
        }
    }

    #[instrument(skip(self))]
    async fn lookup(&self, query: &str) -> Result<Option<Track>, BackendError> {
        let ytdlp_args = [
            "-J",
            "-f",
            "bestaudio/best",
            "--no-playlist",
            "--default-search",
            "ytsearch",
            "--geo-bypass",
            "--no-warnings",
            "--ignore-config",
            "--",
            query,
        ];

        let output = self
            .command()
            .args(ytdlp_args)
            .output()
            .await
            .map_err(BackendError::Spawn)?;

        if !output.status.success() {
            return Err(extractor_error(&output.stderr));
        }

        let info: ExtractInfo = serde_json::from_slice(&output.stdout)?;
        Ok(info.best_track())
    }
}

/// Keep the last non-empty stderr line, that's where yt-dlp puts the reason.
fn extractor_error(stderr: &[u8]) -> BackendError {
    let stderr = String::from_utf8_lossy(stderr);
    let reason = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("exited without output");
    BackendError::Extractor {
        stderr: reason.to_string(),
    }
}

/// The subset of yt-dlp's `--dump-single-json` output we use.
#[derive(Debug, Default, Deserialize)]
pub struct ExtractInfo {
    /// Present on searches and playlists.
    entries: Option<Vec<ExtractInfo>>,
    formats: Option<Vec<Format>>,
    url: Option<String>,
    title: Option<String>,
    /// Seconds.
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Format {
    url: Option<String>,
    acodec: Option<String>,
    vcodec: Option<String>,
}

impl Format {
    fn is_audio_only(&self) -> bool {
        let has_audio = self.acodec.as_deref().is_some_and(|c| c != "none");
        let has_video = self.vcodec.as_deref().is_some_and(|c| c != "none");
        has_audio && !has_video
    }
}

impl ExtractInfo {
    /// Pick a stream from the first result.
    ///
    /// Audio-only formats win, then any format, then the top level url.
    /// yt-dlp lists formats worst to best so the last one is taken.
    pub fn best_track(self) -> Option<Track> {
        let info = match self.entries {
            Some(entries) => entries.into_iter().next()?,
            None => self,
        };

        let formats: Vec<Format> = info
            .formats
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f.url.is_some())
            .collect();

        let stream_url = match formats.iter().rposition(Format::is_audio_only) {
            Some(i) => formats.into_iter().nth(i).and_then(|f| f.url),
            None => match formats.into_iter().last() {
                Some(format) => format.url,
                None => info.url,
            },
        }?;

        let duration = info
            .duration
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64);

        Some(Track {
            title: info.title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            locator: StreamLocator::Direct(stream_url),
            duration,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(json: &str) -> ExtractInfo {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn prefers_the_last_audio_only_format() {
        let info = parse(
            r#"{
                "title": "Song",
                "duration": 201.0,
                "url": "https://top.level/url",
                "formats": [
                    {"url": "https://a/low", "acodec": "opus", "vcodec": "none"},
                    {"url": "https://a/video", "acodec": "mp4a", "vcodec": "avc1"},
                    {"url": "https://a/high", "acodec": "opus", "vcodec": "none"},
                    {"url": "https://a/storyboard", "acodec": "none", "vcodec": "none"}
                ]
            }"#,
        );

        let track = info.best_track().unwrap();

        assert_eq!(track.locator, StreamLocator::Direct("https://a/high".into()));
        assert_eq!(track.title, "Song");
        assert_eq!(track.duration, Some(Duration::from_secs(201)));
    }

    #[test]
    fn falls_back_to_the_last_format() {
        let info = parse(
            r#"{
                "title": "Clip",
                "formats": [
                    {"url": "https://v/360", "acodec": "mp4a", "vcodec": "avc1"},
                    {"url": "https://v/720", "acodec": "mp4a", "vcodec": "avc1"}
                ]
            }"#,
        );

        assert_eq!(info.best_track().unwrap().locator.url(), "https://v/720");
    }

    #[test]
    fn direct_url_without_formats_is_used_as_is() {
        let info = parse(r#"{"url": "https://cdn.example/file.mp3", "title": null}"#);

        let track = info.best_track().unwrap();

        assert_eq!(track.locator.url(), "https://cdn.example/file.mp3");
        assert_eq!(track.title, UNKNOWN_TITLE);
    }

    #[test]
    fn search_takes_the_first_entry() {
        let info = parse(
            r#"{
                "entries": [
                    {"title": "First", "url": "https://first"},
                    {"title": "Second", "url": "https://second"}
                ]
            }"#,
        );

        assert_eq!(info.best_track().unwrap().title, "First");
    }

    #[test]
    fn nothing_playable() {
        assert!(parse(r#"{"entries": []}"#).best_track().is_none());
        assert!(parse(r#"{"title": "No stream", "formats": []}"#)
            .best_track()
            .is_none());
    }

    #[test]
    fn extractor_error_keeps_the_reason() {
        let stderr = b"WARNING: something\nERROR: Unsupported URL: nope\n\n";
        match extractor_error(stderr) {
            BackendError::Extractor { stderr } => assert_eq!(stderr, "ERROR: Unsupported URL: nope"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_unreachable() {
        let ytdlp = YtDlp::new("definitely-not-yt-dlp-on-this-machine");
        let err = ytdlp.probe().await.unwrap_err();
        assert!(err.is_unreachable());
    }
}
