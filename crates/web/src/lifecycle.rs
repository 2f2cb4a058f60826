//! Deciding when the server should stop.
//!
//! The server runs until either a [`LivenessSignal`] fires (by default the
//! running executable being replaced or removed) or the process receives a
//! termination signal. A supervisor such as systemd is expected to start the
//! new binary afterwards.

use std::{
    future::Future,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};
use tokio::time::MissedTickBehavior;

/// Something that can tell the server it should restart.
pub trait LivenessSignal: Send {
    /// Resolves with `Ok` once a restart is needed, or with the error that
    /// stopped the observation.
    fn wait(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Polls an executable for changes to its contents.
pub struct ExecutableWatcher {
    path: PathBuf,
    interval: Duration,
    len: u64,
    modified: Option<SystemTime>,
    digest: blake3::Hash,
}

impl ExecutableWatcher {
    pub async fn new(path: impl Into<PathBuf>, interval: Duration) -> Result<Self> {
        let path = path.into();
        let (len, modified) =
            stat(&path).await.with_context(|| format!("Failed to stat {}", path.display()))?;
        let digest =
            hash(&path).await.with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self { path, interval, len, modified, digest })
    }

    /// Whether the file was removed or its contents differ from the last
    /// observation. Files that were only touched are hashed but not reported.
    async fn changed(&mut self) -> Result<bool> {
        let (len, modified) = match stat(&self.path).await {
            Ok(stat) => stat,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to stat {}", self.path.display()));
            }
        };
        if len == self.len && modified == self.modified {
            return Ok(false);
        }
        self.len = len;
        self.modified = modified;
        match hash(&self.path).await {
            Ok(digest) => Ok(digest != self.digest),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }
}

impl LivenessSignal for ExecutableWatcher {
    async fn wait(&mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if self.changed().await? {
                tracing::info!("Executable {} changed or removed", self.path.display());
                return Ok(());
            }
        }
    }
}

async fn stat(path: &Path) -> io::Result<(u64, Option<SystemTime>)> {
    let metadata = tokio::fs::metadata(path).await?;
    Ok((metadata.len(), metadata.modified().ok()))
}

async fn hash(path: &Path) -> io::Result<blake3::Hash> {
    Ok(blake3::hash(&tokio::fs::read(path).await?))
}

/// Wait for a reason to shut down.
///
/// Without a liveness signal only `terminate` can end the wait, so the server
/// keeps running until it is stopped from the outside.
pub async fn wait_for_shutdown<S, T>(signal: Option<S>, terminate: T) -> Result<()>
where
    S: LivenessSignal,
    T: Future<Output = ()>,
{
    let liveness = async move {
        match signal {
            Some(mut signal) => signal.wait().await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        result = liveness => {
            match &result {
                Ok(()) => tracing::info!("Restart requested, shutting down"),
                Err(e) => tracing::error!("Waiting failure: {:?}", e),
            }
            result
        }
        () = terminate => {
            tracing::info!("Received termination signal, shutting down");
            Ok(())
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn termination_signal() {
    if let Err(e) = termination_signal_io().await {
        tracing::warn!("Failed to listen for termination signals: {e}");
        std::future::pending::<()>().await;
    }
}

async fn termination_signal_io() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use tokio::sync::oneshot;

    use super::*;

    struct ChannelSignal(Option<oneshot::Receiver<Result<()>>>);

    impl LivenessSignal for ChannelSignal {
        async fn wait(&mut self) -> Result<()> {
            match self.0.take() {
                Some(rx) => rx.await.unwrap_or_else(|_| Err(anyhow!("sender dropped"))),
                None => std::future::pending().await,
            }
        }
    }

    const INTERVAL: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn test_executable_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pullhook");
        std::fs::write(&path, b"old binary").unwrap();
        let mut watcher = ExecutableWatcher::new(&path, INTERVAL).await.unwrap();

        let next = dir.path().join("pullhook.new");
        std::fs::write(&next, b"new binary, longer").unwrap();
        std::fs::rename(&next, &path).unwrap();

        tokio::time::timeout(Duration::from_secs(5), watcher.wait()).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_executable_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pullhook");
        std::fs::write(&path, b"binary").unwrap();
        let mut watcher = ExecutableWatcher::new(&path, INTERVAL).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        tokio::time::timeout(Duration::from_secs(5), watcher.wait()).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_executable_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("bin");
        std::fs::create_dir(&parent).unwrap();
        let path = parent.join("pullhook");
        std::fs::write(&path, b"binary").unwrap();
        let mut watcher = ExecutableWatcher::new(&path, INTERVAL).await.unwrap();
        // A file where the parent directory used to be makes stat fail with
        // ENOTDIR rather than ENOENT.
        std::fs::remove_dir_all(&parent).unwrap();
        std::fs::write(&parent, b"not a directory").unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), watcher.wait()).await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_executable_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pullhook");
        std::fs::write(&path, b"binary").unwrap();
        let mut watcher = ExecutableWatcher::new(&path, INTERVAL).await.unwrap();
        // Rewriting identical contents bumps the mtime but isn't a change.
        std::fs::write(&path, b"binary").unwrap();

        let result = tokio::time::timeout(Duration::from_millis(100), watcher.wait()).await;
        assert!(result.is_err(), "watcher fired without a content change");
    }

    #[tokio::test]
    async fn test_watcher_requires_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ExecutableWatcher::new(dir.path().join("missing"), INTERVAL).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_on_signal() {
        let (tx, rx) = oneshot::channel();
        tx.send(Ok(())).unwrap();
        let result =
            wait_for_shutdown(Some(ChannelSignal(Some(rx))), std::future::pending()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_on_watch_error() {
        let (tx, rx) = oneshot::channel();
        tx.send(Err(anyhow!("inotify went away"))).unwrap();
        let result =
            wait_for_shutdown(Some(ChannelSignal(Some(rx))), std::future::pending()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_on_terminate_without_watcher() {
        let result = wait_for_shutdown(None::<ChannelSignal>, async {}).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_no_watcher_idles() {
        let wait = wait_for_shutdown(None::<ChannelSignal>, std::future::pending());
        assert!(tokio::time::timeout(Duration::from_millis(50), wait).await.is_err());
    }
}
