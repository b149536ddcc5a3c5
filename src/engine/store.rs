//! Append-only run history with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) for simplicity
//! and easy debugging/inspection.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::domain::Event;

/// File-based event store using JSONL format
#[derive(Debug)]
pub struct EventStore {
    /// Path to the events.jsonl file
    events_path: PathBuf,

    /// Whether a torn final line has been cut off before appending
    tail_checked: AtomicBool,
}

impl EventStore {
    fn at(base_dir: &Path, run_id: Uuid) -> Self {
        Self {
            events_path: base_dir.join(run_id.to_string()).join("events.jsonl"),
            tail_checked: AtomicBool::new(false),
        }
    }

    /// Create or open the store for a run under `base_dir`
    pub async fn open_in(base_dir: &Path, run_id: Uuid) -> Result<Self> {
        let run_dir = base_dir.join(run_id.to_string());

        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        Ok(Self::at(base_dir, run_id))
    }

    /// Open the store of a run that already has history, creating nothing
    pub async fn open_existing(base_dir: &Path, run_id: Uuid) -> Result<Self> {
        let store = Self::at(base_dir, run_id);
        if !store.events_path.exists() {
            anyhow::bail!("Run {} not found", run_id);
        }
        Ok(store)
    }

    /// Get the path to the events file
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<()> {
        if !self.tail_checked.load(Ordering::Acquire) {
            self.repair_tail().await?;
            self.tail_checked.store(true, Ordering::Release);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open events file: {}",
                    self.events_path.display()
                )
            })?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Cut a partially written final line so new events start on a fresh line
    async fn repair_tail(&self) -> Result<()> {
        if !self.events_path.exists() {
            return Ok(());
        }

        let content = fs::read(&self.events_path)
            .await
            .with_context(|| format!("Failed to read events file: {}", self.events_path.display()))?;
        if content.is_empty() || content.ends_with(b"\n") {
            return Ok(());
        }

        let keep = content
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |i| i + 1);
        warn!(
            path = %self.events_path.display(),
            dropped_bytes = content.len() - keep,
            "Discarding partially written event"
        );

        let file = OpenOptions::new()
            .write(true)
            .open(&self.events_path)
            .await
            .context("Failed to open events file for repair")?;
        file.set_len(keep as u64)
            .await
            .context("Failed to truncate partially written event")?;

        Ok(())
    }

    /// Replay all events in order.
    ///
    /// A final line without its newline is a write cut short by a crash; it is
    /// skipped. Any other unparseable line is an error.
    pub async fn replay(&self) -> Result<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let torn_tail = !content.is_empty() && !content.ends_with('\n');
        let mut lines = content.lines().peekable();
        let mut events = Vec::new();

        while let Some(line) = lines.next() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(event) => events.push(event),
                Err(e) if torn_tail && lines.peek().is_none() => {
                    warn!(
                        path = %self.events_path.display(),
                        error = %e,
                        "Ignoring partially written event at end of history"
                    );
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to parse event: {}", line));
                }
            }
        }

        Ok(events)
    }

    /// List all run IDs under `base_dir`
    pub async fn list_runs(base_dir: &Path) -> Result<Vec<Uuid>> {
        if !base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        runs.push(uuid);
                    }
                }
            }
        }

        Ok(runs)
    }
}

/// Deterministic id handed to executors so a step can dedupe repeated deliveries.
///
/// Format: `{run_id}:{seq}:{step}:{input_hash16}`
pub fn activity_id(run_id: Uuid, seq: u64, step: &str, input: &str) -> String {
    format!("{}:{}:{}:{}", run_id, seq, step, hash_input(input))
}

/// Hash input content (first 16 chars of SHA256)
pub fn hash_input(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
