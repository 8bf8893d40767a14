//! Opening the forwarder's Telegram session
//!
//! Only one forwarder may use a session file at a time, so the session is
//! guarded by an fs2 lock file that lives as long as the connection. Logging
//! in (creating the session file) is done with separate tooling; this module
//! only opens an existing one.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use grammers_client::client::updates::UpdatesLike;
use grammers_client::Client;
use grammers_mtsender::SenderPool;
use grammers_session::storages::SqliteSession;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{Error, Result};

/// Exclusive hold on a lock file, released on drop.
pub struct InstanceLock {
    path: PathBuf,
    file: Option<File>,
}

impl InstanceLock {
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::LockError(format!("{}: {}", path.display(), e)))?;

        if file.try_lock_exclusive().is_err() {
            error!(
                lock = %path.display(),
                "Session is already used by another forwarder instance; stop it first"
            );
            return Err(Error::SessionLocked);
        }

        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        let _ = file.unlock();
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Fail with [`Error::SessionNotFound`] unless `session_file` exists.
pub fn require_session_file(session_file: &str) -> Result<()> {
    if Path::new(session_file).exists() {
        return Ok(());
    }
    error!(
        session = session_file,
        "Session file not found; log in with your session tooling first"
    );
    Err(Error::SessionNotFound(session_file.to_string()))
}

/// A connected client plus everything that must outlive it.
pub struct ForwarderSession {
    pub client: Client,
    updates: Option<mpsc::UnboundedReceiver<UpdatesLike>>,
    runner: JoinHandle<()>,
    _lock: InstanceLock,
}

impl ForwarderSession {
    /// Lock the session, open it and start the network runner.
    pub async fn open(config: &Config) -> Result<Self> {
        let lock = InstanceLock::acquire(&config.lock_file)?;

        let session_file = config.session_file();
        require_session_file(&session_file)?;
        let session = SqliteSession::open(&session_file)
            .map_err(|e| Error::SessionNotFound(format!("{}: {}", session_file, e)))?;

        let pool = SenderPool::new(Arc::new(session), config.api_id);
        // The client borrows the whole pool, so build it before splitting.
        let client = Client::new(&pool);
        let SenderPool {
            runner, updates, ..
        } = pool;
        let runner = tokio::spawn(async move {
            runner.run().await;
        });

        info!(session = %session_file, "Telegram session opened");
        Ok(Self {
            client,
            updates: Some(updates),
            runner,
            _lock: lock,
        })
    }

    /// Raw update receiver; `None` once taken.
    pub fn take_updates(&mut self) -> Option<mpsc::UnboundedReceiver<UpdatesLike>> {
        self.updates.take()
    }
}

impl Drop for ForwarderSession {
    fn drop(&mut self) {
        self.runner.abort();
    }
}

impl std::ops::Deref for ForwarderSession {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lock_file_removed_on_release_and_drop() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("forwarder.lock");

        let mut lock = InstanceLock::acquire(&path).expect("lock");
        assert!(path.exists());
        lock.release();
        assert!(!path.exists());

        {
            let _lock = InstanceLock::acquire(&path).expect("relock");
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn release_twice_is_harmless() {
        let dir = tempdir().expect("tempdir");
        let mut lock = InstanceLock::acquire(dir.path().join("forwarder.lock")).expect("lock");
        lock.release();
        lock.release();
    }

    #[test]
    fn unwritable_lock_path_is_lock_error() {
        let dir = tempdir().expect("tempdir");
        let result = InstanceLock::acquire(dir.path().join("missing").join("forwarder.lock"));
        assert!(matches!(result, Err(Error::LockError(_))));
    }

    #[test]
    fn session_file_must_exist() {
        let dir = tempdir().expect("tempdir");
        let session_file = dir.path().join("session_bot_forwarder.session");
        let session_file = session_file.to_str().expect("utf-8 path");

        let err = require_session_file(session_file).unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(ref p) if p.ends_with(".session")));

        File::create(session_file).expect("create session file");
        require_session_file(session_file).expect("session should exist");
    }
}
