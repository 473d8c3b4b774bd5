//! Retention janitor
//!
//! Hourly sweep of the working directory. Files whose modification time is
//! older than the retention window are deleted unless the session still
//! references them. Per-file failures are logged and skipped.

use crate::control::ControlHandle;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Delete stale top-level files in `dir`; returns how many were removed
pub fn purge_stale_files(dir: &Path, retention: Duration, keep: &HashSet<PathBuf>) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), "Janitor cannot read directory: {}", e);
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() || keep.contains(&path) {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age <= retention {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), age_secs = age.as_secs(), "Removed stale file");
                removed += 1;
            }
            Err(e) => debug!(path = %path.display(), "Stale file not removed: {}", e),
        }
    }
    removed
}

/// Sweep now and then every `period` until the session goes away
pub fn spawn_janitor(
    control: ControlHandle,
    dir: PathBuf,
    retention: Duration,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let keep = match control.referenced_files().await {
                Ok(keep) => keep,
                Err(_) => break,
            };
            let sweep_dir = dir.clone();
            let removed = tokio::task::spawn_blocking(move || {
                purge_stale_files(&sweep_dir, retention, &keep)
            })
            .await
            .unwrap_or_else(|e| {
                warn!("Janitor sweep panicked: {}", e);
                0
            });
            if removed > 0 {
                info!(removed, "Periodic cleanup removed stale files");
            }
        }
        debug!("Janitor stopped");
    })
}
