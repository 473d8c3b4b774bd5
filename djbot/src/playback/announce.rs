//! Spoken track announcements
//!
//! Renders a short narration with an external TTS command, plays it through
//! the voice sink to completion and deletes the rendered file. The whole
//! step is bounded by a timeout.

use crate::error::{Error, Result};
use crate::voice::{StreamOptions, StreamRequest, VoiceSink};
use djbot_common::config::AnnounceConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Announcer {
    command: Vec<String>,
    work_dir: PathBuf,
    timeout: Duration,
}

impl Announcer {
    pub fn new(config: &AnnounceConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: config.command.clone(),
            work_dir: work_dir.into(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Program and arguments with `{text}`/`{output}` substituted
    pub fn render_command(&self, text: &str, output: &Path) -> Option<(String, Vec<String>)> {
        let output = output.to_string_lossy();
        let mut parts = self
            .command
            .iter()
            .map(|part| part.replace("{text}", text).replace("{output}", &output));
        let program = parts.next()?;
        Some((program, parts.collect()))
    }

    /// Speak `text` through `sink` and wait for it to finish
    pub async fn announce(
        &self,
        sink: &dyn VoiceSink,
        text: &str,
        volume: f32,
        generation: u64,
    ) -> Result<()> {
        let output = self
            .work_dir
            .join(format!("announce-{}.wav", uuid::Uuid::new_v4()));

        let result = timeout(
            self.timeout,
            self.render_and_play(sink, text, &output, volume, generation),
        )
        .await;

        if let Err(e) = tokio::fs::remove_file(&output).await {
            debug!(path = %output.display(), "Announcement file not removed: {}", e);
        }

        match result {
            Ok(inner) => inner,
            Err(_) => {
                sink.stop().await?;
                Err(Error::Internal(format!(
                    "announcement timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }

    async fn render_and_play(
        &self,
        sink: &dyn VoiceSink,
        text: &str,
        output: &Path,
        volume: f32,
        generation: u64,
    ) -> Result<()> {
        let (program, args) = self
            .render_command(text, output)
            .ok_or_else(|| Error::Config("announce command is empty".to_string()))?;

        let status = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::Internal(format!("{} could not be started: {}", program, e)))?;
        if !status.success() {
            return Err(Error::Internal(format!("{} exited with {}", program, status)));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = StreamRequest {
            path: output.to_path_buf(),
            options: StreamOptions::new(0.0, volume),
            generation,
        };
        sink.play(request, tx).await?;
        if let Some(ended) = rx.recv().await {
            if let Some(error) = ended.error {
                debug!("Announcement stream ended with error: {}", error);
            }
        }
        Ok(())
    }
}
