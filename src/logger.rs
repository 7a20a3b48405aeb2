use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

use crate::types::Channel;

/// How decoded batches are written to the traffic log.
pub enum MessageLogMode {
    /// Every batch in full.
    Full,
    /// First batch in full, afterwards only the frame positions that changed.
    Diffed,
}

/// NDJSON log of the traffic exchanged with the stove.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_batch: Option<Vec<String>>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous_batch: None,
        })
    }

    pub fn log_command(&mut self, channel: Channel, action: &str, command: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "channel": channel.to_string(),
            "action": action,
            "command": command,
        });
        self.write_line(&entry);
    }

    pub fn log_response(&mut self, channel: Channel, action: &str, body: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "resp",
            "channel": channel.to_string(),
            "action": action,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_batch(&mut self, channel: Channel, frames: &[String]) {
        let entry = match (&self.mode, &self.previous_batch) {
            (MessageLogMode::Diffed, Some(prev)) => {
                let changes: Vec<Value> = changed_positions(prev, frames)
                    .into_iter()
                    .map(|(index, old, new)| json!({ "index": index, "old": old, "new": new }))
                    .collect();
                json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "batch",
                    "channel": channel.to_string(),
                    "changes": changes,
                })
            }
            (MessageLogMode::Diffed, None) => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "batch",
                "channel": channel.to_string(),
                "full": true,
                "frames": frames,
            }),
            (MessageLogMode::Full, _) => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "batch",
                "channel": channel.to_string(),
                "frames": frames,
            }),
        };
        self.write_line(&entry);
        self.previous_batch = Some(frames.to_vec());
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

fn changed_positions(
    previous: &[String],
    current: &[String],
) -> Vec<(usize, Option<String>, Option<String>)> {
    let len = previous.len().max(current.len());
    (0..len)
        .filter_map(|i| {
            let old = previous.get(i);
            let new = current.get(i);
            (old != new).then(|| (i, old.cloned(), new.cloned()))
        })
        .collect()
}
