//! Line-oriented console front end
//!
//! Reads commands from stdin (`play <query>`, `skip`, `volume 50`, ...),
//! runs them through the control bridge and prints the short outcome.
//! Downloads started here are waited for, unlike on the HTTP surface.

use crate::control::{parse_index, parse_level, parse_seconds, ControlHandle, ControlRequest};
use crate::error::{Error, Result};
use crate::session::SessionSnapshot;
use djbot_common::time::format_seconds;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

pub const HELP: &str = "\
Commands:
  join [channel]      connect to a voice channel
  leave               disconnect
  play <query|url>    download and queue a track (playlist links expand)
  playlist <url>      queue a playlist until the queue is full
  removeplaylist      drop the tracks of the latest playlist
  remove <n>          drop queue entry n (1-based)
  skip | stop | pause | resume | clear | previous
  loop                toggle single-track loop
  loopqueue           toggle queue loop
  volume <0-100>      set volume
  seek <seconds>      jump within the current track
  status | queue      show the session
  help                this text";

/// What a console line asks for
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleLine {
    Request(ControlRequest),
    Queue,
    Help,
    Empty,
}

/// Parse one console line
pub fn parse_line(line: &str) -> Result<ConsoleLine> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ConsoleLine::Empty);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let arg = |what: &str| {
        if rest.is_empty() {
            Err(Error::BadRequest(format!("usage: {} <{}>", word, what)))
        } else {
            Ok(rest.to_string())
        }
    };

    let request = match word.to_ascii_lowercase().as_str() {
        "help" | "?" => return Ok(ConsoleLine::Help),
        "queue" => return Ok(ConsoleLine::Queue),
        "status" => ControlRequest::Status,
        "join" => ControlRequest::Join((!rest.is_empty()).then(|| rest.to_string())),
        "leave" => ControlRequest::Leave,
        "play" | "add" => ControlRequest::Add(arg("query")?),
        "playlist" => ControlRequest::AddPlaylist(arg("url")?),
        "removeplaylist" => ControlRequest::RemovePlaylist,
        "remove" => ControlRequest::Remove(parse_index(&arg("n")?)?),
        "skip" => ControlRequest::Skip,
        "stop" => ControlRequest::Stop,
        "pause" => ControlRequest::Pause,
        "resume" => ControlRequest::Resume,
        "clear" => ControlRequest::Clear,
        "previous" => ControlRequest::Previous,
        "loop" => ControlRequest::Loop,
        "loopqueue" => ControlRequest::LoopQueue,
        "volume" => ControlRequest::SetVolume(parse_level(&arg("level")?)?),
        "seek" => ControlRequest::Seek(parse_seconds(&arg("seconds")?)?),
        other => {
            return Err(Error::BadRequest(format!(
                "unknown command '{}', try 'help'",
                other
            )))
        }
    };
    Ok(ConsoleLine::Request(request))
}

/// Multi-line status text
pub fn render_status(snapshot: &SessionSnapshot) -> String {
    let mut lines = Vec::new();
    match &snapshot.current {
        Some(title) => lines.push(format!(
            "Currently playing: {} [{} / {}]{}",
            title,
            format_seconds(snapshot.position),
            format_seconds(snapshot.duration),
            if snapshot.paused { " (paused)" } else { "" }
        )),
        None => lines.push("Currently playing: none".to_string()),
    }
    lines.push(format!("Queue length: {}", snapshot.queue.len()));
    lines.push(format!(
        "Volume: {}%  Loop: {}  Queue loop: {}",
        snapshot.volume,
        on_off(snapshot.loop_single),
        on_off(snapshot.loop_queue)
    ));
    if snapshot.downloads.is_empty() {
        lines.push("Downloading: none".to_string());
    } else {
        lines.push("Downloading:".to_string());
        lines.extend(
            snapshot
                .downloads
                .iter()
                .map(|(query, secs)| format!(" - {} ({:.0}s)", query, secs)),
        );
    }
    lines.join("\n")
}

/// Numbered queue listing
pub fn render_queue(snapshot: &SessionSnapshot) -> String {
    if snapshot.queue.is_empty() {
        return "Queue is empty".to_string();
    }
    let listing: Vec<String> = snapshot
        .queue
        .iter()
        .enumerate()
        .map(|(i, title)| format!("{}. {}", i + 1, title))
        .collect();
    format!("Queue:\n{}", listing.join("\n"))
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

/// Handle one line and produce the text to print
pub async fn respond(control: &ControlHandle, line: &str) -> String {
    let parsed = match parse_line(line) {
        Ok(parsed) => parsed,
        Err(e) => return e.to_string(),
    };
    let request = match parsed {
        ConsoleLine::Empty => return String::new(),
        ConsoleLine::Help => return HELP.to_string(),
        ConsoleLine::Queue => {
            return match control.snapshot().await {
                Ok(snapshot) => render_queue(&snapshot),
                Err(e) => e.to_string(),
            }
        }
        ConsoleLine::Request(request) => request,
    };

    let is_status = request == ControlRequest::Status;
    match control.execute(request).await {
        Ok(reply) if is_status => render_status(&reply.snapshot),
        Ok(reply) => reply.message,
        Err(e) => e.to_string(),
    }
}

/// Read lines until EOF
pub async fn run<R, W>(control: ControlHandle, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let output = respond(&control, &line).await;
        if output.is_empty() {
            continue;
        }
        writer.write_all(output.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    debug!("Console input closed");
    Ok(())
}
