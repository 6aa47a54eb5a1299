// File: src/resolver/ytdlp.rs
//
// TrackResolver backed by the `yt-dlp` binary. One `--dump-single-json`
// invocation per lookup; stream-address selection prefers the highest-bitrate
// audio-only format, then any format carrying audio, then the top-level URL.

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::Error;
use crate::resolver::TrackResolver;
use tunebot_common::models::{SearchCandidate, TrackMetadata};

pub struct YtDlpResolver {
    binary: String,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn dump_json(&self, locator: &str, extra_args: &[&str]) -> Result<Value, Error> {
        debug!("running {} for '{}'", self.binary, locator);
        let output = Command::new(&self.binary)
            .arg("--dump-single-json")
            .arg("--no-warnings")
            .arg("--prefer-free-formats")
            .args(extra_args)
            .arg(locator)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::ResolutionFailed(format!("failed to run {}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ResolutionFailed(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::ResolutionFailed(format!("unparseable {} output: {e}", self.binary)))
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve_metadata(&self, locator: &str) -> Result<TrackMetadata, Error> {
        let value = self.dump_json(locator, &["--skip-download"]).await?;
        Ok(metadata_from_value(&value, locator))
    }

    async fn resolve_stream_address(&self, locator: &str) -> Result<String, Error> {
        let value = self
            .dump_json(locator, &["--youtube-skip-dash-manifest"])
            .await?;
        select_audio_address(&value).ok_or_else(|| {
            Error::ResolutionFailed(format!("no playable audio format for '{locator}'"))
        })
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchCandidate>, Error> {
        let value = self
            .dump_json(&format!("ytsearch{limit}:{query}"), &["--skip-download"])
            .await?;
        let entries = value
            .get("entries")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::ResolutionFailed(format!("no results for '{query}'")))?;
        Ok(entries.iter().map(candidate_from_value).collect())
    }
}

fn metadata_from_value(value: &Value, fallback_locator: &str) -> TrackMetadata {
    TrackMetadata {
        title: value
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Unknown track")
            .to_string(),
        canonical_locator: value
            .get("webpage_url")
            .and_then(Value::as_str)
            .unwrap_or(fallback_locator)
            .to_string(),
        duration_secs: value
            .get("duration")
            .and_then(Value::as_f64)
            .map(|d| d as u64),
        thumbnail: value
            .get("thumbnail")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn candidate_from_value(value: &Value) -> SearchCandidate {
    SearchCandidate {
        title: value
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Unknown track")
            .to_string(),
        locator: value
            .get("webpage_url")
            .or_else(|| value.get("url"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        duration_secs: value
            .get("duration")
            .and_then(Value::as_f64)
            .map(|d| d as u64),
        channel: value
            .get("channel")
            .or_else(|| value.get("uploader"))
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn has_audio(format: &Value) -> bool {
    format.get("acodec").and_then(Value::as_str) != Some("none")
}

fn is_audio_only(format: &Value) -> bool {
    has_audio(format) && matches!(format.get("vcodec").and_then(Value::as_str), None | Some("none"))
}

/// Pick the best stream address: highest-bitrate audio-only format, then the
/// first format that carries audio at all, then the top-level `url`.
fn select_audio_address(value: &Value) -> Option<String> {
    if let Some(formats) = value.get("formats").and_then(Value::as_array) {
        let best_audio_only = formats
            .iter()
            .filter(|f| is_audio_only(f))
            .max_by(|a, b| {
                let abr_a = a.get("abr").and_then(Value::as_f64).unwrap_or(0.0);
                let abr_b = b.get("abr").and_then(Value::as_f64).unwrap_or(0.0);
                abr_a.total_cmp(&abr_b)
            })
            .and_then(|f| f.get("url").and_then(Value::as_str));
        if let Some(addr) = best_audio_only {
            return Some(addr.to_string());
        }

        let any_with_audio = formats
            .iter()
            .find(|f| has_audio(f))
            .and_then(|f| f.get("url").and_then(Value::as_str));
        if let Some(addr) = any_with_audio {
            return Some(addr.to_string());
        }
    }

    value
        .get("url")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn picks_highest_bitrate_audio_only_format() {
        let value = json!({
            "url": "https://cdn.test/top",
            "formats": [
                { "acodec": "opus", "vcodec": "none", "abr": 70.0, "url": "https://cdn.test/opus70" },
                { "acodec": "opus", "vcodec": "none", "abr": 160.0, "url": "https://cdn.test/opus160" },
                { "acodec": "mp4a", "vcodec": "avc1", "abr": 192.0, "url": "https://cdn.test/muxed" },
            ]
        });
        assert_eq!(
            select_audio_address(&value).as_deref(),
            Some("https://cdn.test/opus160")
        );
    }

    #[test]
    fn falls_back_to_any_format_with_audio() {
        let value = json!({
            "url": "https://cdn.test/top",
            "formats": [
                { "acodec": "none", "vcodec": "avc1", "url": "https://cdn.test/video-only" },
                { "acodec": "mp4a", "vcodec": "avc1", "url": "https://cdn.test/muxed" },
            ]
        });
        assert_eq!(
            select_audio_address(&value).as_deref(),
            Some("https://cdn.test/muxed")
        );
    }

    #[test]
    fn falls_back_to_top_level_url() {
        let value = json!({
            "url": "https://cdn.test/top",
            "formats": [
                { "acodec": "none", "vcodec": "avc1", "url": "https://cdn.test/video-only" },
            ]
        });
        assert_eq!(
            select_audio_address(&value).as_deref(),
            Some("https://cdn.test/top")
        );
    }

    #[test]
    fn null_vcodec_counts_as_audio_only() {
        let value = json!({
            "formats": [
                { "acodec": "mp4a", "vcodec": null, "abr": 128.0, "url": "https://cdn.test/audio" },
            ]
        });
        assert_eq!(
            select_audio_address(&value).as_deref(),
            Some("https://cdn.test/audio")
        );
    }

    #[test]
    fn metadata_falls_back_to_input_locator() {
        let value = json!({ "title": "Some Song", "duration": 213.4 });
        let meta = metadata_from_value(&value, "https://youtu.be/abc");
        assert_eq!(meta.title, "Some Song");
        assert_eq!(meta.canonical_locator, "https://youtu.be/abc");
        assert_eq!(meta.duration_secs, Some(213));
        assert!(meta.thumbnail.is_none());
    }
}
