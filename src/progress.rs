//! Durable forwarding cursor
//!
//! The cursor is the highest message id that was forwarded successfully. It
//! lives in a single JSON record (`{"last_id": 123}`) so a restarted process
//! resumes right after the last forwarded message.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// Telegram message identifier.
pub type MessageId = i32;

/// Default location of the progress record.
pub const PROGRESS_FILE: &str = "progress.json";

#[derive(Debug, Serialize, Deserialize)]
struct ProgressRecord {
    last_id: i64,
}

/// File-backed store for the forwarding cursor.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last recorded cursor.
    ///
    /// A missing, unreadable or malformed record means "no progress yet" and
    /// yields 0. This never fails.
    pub fn load(&self) -> MessageId {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(err) => {
                warn!(path = %self.path.display(), "Failed to read progress record: {}", err);
                return 0;
            }
        };

        match serde_json::from_str::<ProgressRecord>(&content) {
            Ok(record) => match MessageId::try_from(record.last_id) {
                Ok(id) if id >= 0 => id,
                _ => {
                    warn!(
                        path = %self.path.display(),
                        last_id = record.last_id,
                        "Progress record holds an invalid id, starting from scratch"
                    );
                    0
                }
            },
            Err(err) => {
                warn!(path = %self.path.display(), "Corrupt progress record: {}", err);
                0
            }
        }
    }

    /// Overwrite the record with `cursor`.
    pub fn save(&self, cursor: MessageId) -> Result<()> {
        let body = serde_json::to_vec(&ProgressRecord {
            last_id: i64::from(cursor),
        })?;
        write_atomic(&self.path, &body)?;
        debug!(cursor, "Progress saved");
        Ok(())
    }
}

/// Write `contents` to a sibling temp file and rename it over `path`.
///
/// Readers observe either the old or the new contents, never a partial file.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)
}
