//! External track resolvers
//!
//! [`TrackResolver`] is the boundary to whatever turns a query into a local
//! audio file. [`ExternalResolver`] shells out to yt-dlp (general URLs and
//! searches), spotdl (Spotify track links) and ffprobe (duration).
//!
//! Every child process is spawned with `kill_on_drop`, so a timed-out
//! acquisition terminates the tool by dropping its future.

use crate::acquire::QueryKind;
use crate::error::{DownloadFailure, Error, Result};
use async_trait::async_trait;
use djbot_common::config::AcquisitionConfig;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;
use walkdir::WalkDir;

/// Extensions accepted when a tool leaves a directory behind
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "flac", "wav", "opus", "ogg"];

/// Raw resolver output, validated by the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub title: String,
    pub filepath: PathBuf,
    /// `None` when the tool reported no duration
    pub duration_seconds: Option<f64>,
}

/// Query → local audio file
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Produce a local file for `query` under `work_dir`
    async fn resolve(&self, query: &str, kind: QueryKind, work_dir: &Path) -> Result<Resolved>;

    /// Read the duration of a local file in seconds
    async fn probe_duration(&self, path: &Path) -> Result<f64>;

    /// List per-entry queries of a playlist
    async fn expand_playlist(&self, url: &str) -> Result<Vec<String>>;
}

/// Resolver backed by command-line tools
#[derive(Debug, Clone)]
pub struct ExternalResolver {
    yt_dlp: String,
    spotdl: String,
    ffprobe: String,
}

impl ExternalResolver {
    pub fn new(config: &AcquisitionConfig) -> Self {
        Self {
            yt_dlp: config.yt_dlp.clone(),
            spotdl: config.spotdl.clone(),
            ffprobe: config.ffprobe.clone(),
        }
    }

    async fn resolve_generic(&self, query: &str, work_dir: &Path) -> Result<Resolved> {
        let template = work_dir.join("%(id)s.%(ext)s");
        let mut cmd = Command::new(&self.yt_dlp);
        cmd.arg("-f")
            .arg("bestaudio/best")
            .arg("-o")
            .arg(&template)
            .args(["--no-playlist", "--dump-json", "--no-simulate"])
            .args(["--default-search", "ytsearch", "--quiet", "--no-warnings"])
            .arg(query);

        let output = run(&mut cmd, &self.yt_dlp).await?;
        let info = last_json_line(&output.stdout).ok_or_else(|| {
            DownloadFailure::InvalidMetadata("yt-dlp printed no metadata".to_string())
        })?;
        parse_yt_dlp_info(&info, work_dir)
    }

    async fn resolve_spotify(&self, query: &str, work_dir: &Path) -> Result<Resolved> {
        let prefix = uuid::Uuid::new_v4().to_string();
        let template = work_dir.join(format!("{}.{{output-ext}}", prefix));
        let mut cmd = Command::new(&self.spotdl);
        cmd.arg(query).arg("--output").arg(&template);

        // spotdl's exit status is unreliable; the produced file decides
        if let Err(e) = run(&mut cmd, &self.spotdl).await {
            debug!(query = %query, error = %e, "spotdl reported failure");
        }

        let path = find_by_prefix(work_dir, &prefix).await?;
        let title = file_title(&path)?;
        Ok(Resolved {
            title,
            filepath: path,
            duration_seconds: None,
        })
    }
}

#[async_trait]
impl TrackResolver for ExternalResolver {
    async fn resolve(&self, query: &str, kind: QueryKind, work_dir: &Path) -> Result<Resolved> {
        match kind {
            QueryKind::SpotifyTrack => self.resolve_spotify(query, work_dir).await,
            QueryKind::Playlist | QueryKind::Generic => self.resolve_generic(query, work_dir).await,
        }
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.args(["-v", "error", "-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(path);
        let output = run(&mut cmd, &self.ffprobe).await?;
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .map_err(|e| Error::Internal(format!("unparseable ffprobe duration: {}", e)))
    }

    async fn expand_playlist(&self, url: &str) -> Result<Vec<String>> {
        let mut cmd = Command::new(&self.yt_dlp);
        cmd.args(["--flat-playlist", "-J", "--quiet", "--no-warnings"]).arg(url);
        let output = run(&mut cmd, &self.yt_dlp).await?;
        let info: Value = serde_json::from_slice(&output.stdout).map_err(|e| {
            DownloadFailure::InvalidMetadata(format!("playlist metadata: {}", e))
        })?;
        Ok(playlist_entries(&info))
    }
}

/// Run a tool to completion, mapping spawn errors and failure exits
async fn run(cmd: &mut Command, tool: &str) -> Result<Output> {
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| DownloadFailure::ToolFailed(format!("{} could not be started: {}", tool, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = stderr.lines().last().unwrap_or("").trim().to_string();
        return Err(DownloadFailure::ToolFailed(format!(
            "{} exited with {}: {}",
            tool, output.status, tail
        ))
        .into());
    }
    Ok(output)
}

fn last_json_line(stdout: &[u8]) -> Option<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .rev()
        .filter(|l| !l.trim().is_empty())
        .find_map(|l| serde_json::from_str(l).ok())
}

/// Extract title/path/duration from a yt-dlp info document
pub fn parse_yt_dlp_info(info: &Value, work_dir: &Path) -> Result<Resolved> {
    let title = info
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
        .to_string();
    let duration_seconds = info.get("duration").and_then(Value::as_f64);

    // Newer yt-dlp reports the final path directly
    let reported = info
        .get("requested_downloads")
        .and_then(|d| d.get(0))
        .and_then(|d| d.get("filepath"))
        .and_then(Value::as_str)
        .map(PathBuf::from);

    let filepath = match reported {
        Some(path) => path,
        None => {
            let id = info.get("id").and_then(Value::as_str).unwrap_or_default();
            let ext = info.get("ext").and_then(Value::as_str).unwrap_or_default();
            if id.is_empty() || ext.is_empty() {
                return Err(DownloadFailure::InvalidMetadata(
                    "yt-dlp did not return a file id/ext".to_string(),
                )
                .into());
            }
            work_dir.join(format!("{}.{}", id, ext))
        }
    };

    Ok(Resolved {
        title,
        filepath,
        duration_seconds,
    })
}

/// Per-entry queries from a flat playlist document
pub fn playlist_entries(info: &Value) -> Vec<String> {
    let Some(entries) = info.get("entries").and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let url = entry.get("url").and_then(Value::as_str).unwrap_or_default();
            if url.starts_with("http://") || url.starts_with("https://") {
                return Some(url.to_string());
            }
            entry
                .get("id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(|id| format!("https://www.youtube.com/watch?v={}", id))
        })
        .collect()
}

/// Locate the entry a tool created under `prefix`
///
/// A directory entry is searched for its first audio file.
pub async fn find_by_prefix(dir: &Path, prefix: &str) -> Result<PathBuf> {
    let mut matches = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with(prefix) {
            matches.push(entry.path());
        }
    }
    matches.sort();

    let Some(path) = matches.into_iter().next() else {
        return Err(DownloadFailure::NoOutputProduced(
            "tool finished but no file found".to_string(),
        )
        .into());
    };

    if !path.is_dir() {
        return Ok(path);
    }

    WalkDir::new(&path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .find(|p| is_audio_file(p))
        .ok_or_else(|| {
            DownloadFailure::NoOutputProduced("tool created a directory with no audio inside".to_string())
                .into()
        })
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn file_title(path: &Path) -> Result<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DownloadFailure::InvalidMetadata(format!("{} has no name", path.display())).into())
}
