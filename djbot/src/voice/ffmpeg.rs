//! Local ffmpeg voice sink
//!
//! Each configured channel is an ffmpeg output (`-f <format> <target>`).
//! A stream is one `ffmpeg -re` process; its exit is the end-of-stream
//! notification and `stop` kills it.

use crate::error::{Error, Result};
use crate::session::ConnectionHandle;
use crate::voice::{StreamEnded, StreamRequest, VoiceSink};
use async_trait::async_trait;
use djbot_common::config::{ChannelConfig, VoiceConfig};
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ActiveStream {
    generation: u64,
    kill: oneshot::Sender<()>,
    watcher: JoinHandle<()>,
}

pub struct FfmpegSink {
    ffmpeg: String,
    channels: Vec<ChannelConfig>,
    connected: Mutex<Option<ChannelConfig>>,
    active: tokio::sync::Mutex<Option<ActiveStream>>,
}

impl FfmpegSink {
    pub fn new(config: &VoiceConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            channels: config.channels.clone(),
            connected: Mutex::new(None),
            active: tokio::sync::Mutex::new(None),
        }
    }

    fn connected_channel(&self) -> Option<ChannelConfig> {
        self.connected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_connected(&self, channel: Option<ChannelConfig>) {
        *self
            .connected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = channel;
    }

    /// Full ffmpeg argument list for one stream
    pub fn build_args(channel: &ChannelConfig, request: &StreamRequest) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin", "-re"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(request.options.before_options());
        args.push("-i".to_string());
        args.push(request.path.to_string_lossy().into_owned());
        args.push("-vn".to_string());
        args.extend(request.options.filter_options());
        if let Some(kbps) = channel.bitrate_kbps {
            args.extend([
                "-c:a".to_string(),
                "libopus".to_string(),
                "-b:a".to_string(),
                format!("{}k", kbps),
            ]);
        }
        args.extend(["-f".to_string(), channel.format.clone(), channel.target.clone()]);
        args
    }

    async fn stop_active(&self) {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            debug!(generation = active.generation, "Stopping stream");
            let _ = active.kill.send(());
            if let Err(e) = active.watcher.await {
                warn!("Stream watcher ended abnormally: {}", e);
            }
        }
    }
}

/// Wait for the process or a kill request, then report the end
async fn watch(
    mut child: Child,
    generation: u64,
    kill: oneshot::Receiver<()>,
    on_end: mpsc::UnboundedSender<StreamEnded>,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill => None,
    };

    let error = match exited {
        Some(Ok(status)) if status.success() => None,
        Some(Ok(status)) => Some(format!("ffmpeg exited with {}", status)),
        Some(Err(e)) => Some(e.to_string()),
        None => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            None
        }
    };
    let _ = on_end.send(StreamEnded { generation, error });
}

#[async_trait]
impl VoiceSink for FfmpegSink {
    fn channels(&self) -> BTreeMap<String, String> {
        self.channels
            .iter()
            .map(|c| (c.id.clone(), c.name.clone()))
            .collect()
    }

    async fn connect(&self, channel_id: &str) -> Result<ConnectionHandle> {
        let channel = self
            .channels
            .iter()
            .find(|c| c.id == channel_id)
            .cloned()
            .ok_or_else(|| Error::NotInVoiceChannel(format!("unknown channel '{}'", channel_id)))?;

        if self.connected_channel().map(|c| c.id) != Some(channel.id.clone()) {
            // Switching outputs ends whatever was playing on the old one
            self.stop_active().await;
        }

        info!(channel = %channel.id, "Connected to voice channel");
        let handle = ConnectionHandle {
            channel_id: channel.id.clone(),
            channel_name: channel.name.clone(),
        };
        self.set_connected(Some(channel));
        Ok(handle)
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_active().await;
        if let Some(channel) = self.connected_channel() {
            info!(channel = %channel.id, "Disconnected from voice channel");
        }
        self.set_connected(None);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected_channel().is_some()
    }

    async fn play(
        &self,
        request: StreamRequest,
        on_end: mpsc::UnboundedSender<StreamEnded>,
    ) -> Result<()> {
        let channel = self
            .connected_channel()
            .ok_or_else(|| Error::NotInVoiceChannel("not connected".to_string()))?;

        self.stop_active().await;

        if let Err(e) = tokio::fs::File::open(&request.path).await {
            return Err(Error::PlaybackSource(format!(
                "{}: {}",
                request.path.display(),
                e
            )));
        }

        let args = Self::build_args(&channel, &request);
        debug!(generation = request.generation, ?args, "Launching ffmpeg");
        let child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::PlaybackSource(format!("{} could not be started: {}", self.ffmpeg, e)))?;

        let (kill_tx, kill_rx) = oneshot::channel();
        let generation = request.generation;
        let watcher = tokio::spawn(watch(child, generation, kill_rx, on_end));

        *self.active.lock().await = Some(ActiveStream {
            generation,
            kill: kill_tx,
            watcher,
        });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stop_active().await;
        Ok(())
    }
}
