use anyhow::Context;
use chrono::NaiveDate;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;

const LOCK_DIR: &str = "locks";

/// Held for the duration of one daily run. The lock file is removed on release
/// or drop; a crashed run leaves it behind until it goes stale.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    released: bool,
}

impl RunLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn lock_path(data_dir: &Path, as_of_date: NaiveDate) -> PathBuf {
    data_dir.join(LOCK_DIR).join(format!("{as_of_date}.lock"))
}

/// `Ok(None)` when another live run holds the lock for this date.
pub async fn try_acquire_as_of_date_lock(
    data_dir: &Path,
    as_of_date: NaiveDate,
    stale_after: Duration,
) -> anyhow::Result<Option<RunLock>> {
    let path = lock_path(data_dir, as_of_date);
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create lock directory {}", dir.display()))?;
    }

    for _ in 0..2 {
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut f) => {
                let body = format!(
                    "pid={}\nacquired_at={}\n",
                    std::process::id(),
                    chrono::Utc::now().to_rfc3339()
                );
                f.write_all(body.as_bytes()).await?;
                f.sync_all().await?;
                return Ok(Some(RunLock {
                    path,
                    released: false,
                }));
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                if !is_stale(&path, stale_after).await {
                    return Ok(None);
                }
                tracing::warn!(%as_of_date, path = %path.display(), "removing stale run lock");
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => {
                        return Err(err).with_context(|| {
                            format!("failed to remove stale lock {}", path.display())
                        })
                    }
                }
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to create lock file {}", path.display()))
            }
        }
    }
    Ok(None)
}

pub async fn release_as_of_date_lock(mut lock: RunLock) -> anyhow::Result<()> {
    lock.released = true;
    match tokio::fs::remove_file(&lock.path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err)
            .with_context(|| format!("failed to release run lock {}", lock.path.display())),
    }
}

async fn is_stale(path: &Path, stale_after: Duration) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        // Vanished in between: treat as free.
        return true;
    };
    meta.modified()
        .ok()
        .and_then(|m| SystemTime::now().duration_since(m).ok())
        .is_some_and(|age| age > stale_after)
}
