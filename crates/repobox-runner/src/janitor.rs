//! Janitor (4.N): periodic workspace GC driven entirely off what's on
//! disk under `TEMP_DIR/sessions/*`, cross-referenced against the
//! session store. Every directory removal is best-effort — an I/O error
//! is logged and the sweep moves on, never blocking the runner.

use std::path::{Path, PathBuf};
use std::time::Duration;

use repobox_core::error::StoreError;
use repobox_core::store::SessionStore;
use repobox_core::types::{SessionPatch, SessionStatus};
use repobox_core::workspace;
use tokio_util::sync::CancellationToken;

pub struct Janitor {
    session_store: SessionStore,
    temp_dir: String,
    interval: Duration,
    max_age_secs: i64,
    max_disk_mb: u64,
    run_on_startup: bool,
}

impl Janitor {
    pub fn new(
        session_store: SessionStore,
        temp_dir: String,
        interval_secs: u64,
        max_age_secs: i64,
        max_disk_mb: u64,
        run_on_startup: bool,
    ) -> Self {
        Self {
            session_store,
            temp_dir,
            interval: Duration::from_secs(interval_secs.max(1)),
            max_age_secs,
            max_disk_mb,
            run_on_startup,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        if self.run_on_startup {
            self.sweep().await;
        }
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // consume the immediate first tick, we already ran above
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep().await,
                _ = cancel.cancelled() => break,
            }
        }
        tracing::info!("janitor shutting down");
    }

    async fn sweep(&self) {
        let sessions_root = Path::new(&self.temp_dir).join("sessions");
        let entries = match std::fs::read_dir(&sessions_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list session workspaces");
                return;
            }
        };

        let mut live: Vec<(PathBuf, String, i64)> = Vec::new();

        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let Some(session_id) = workspace::session_id_from_dir(&self.temp_dir, &dir) else {
                continue;
            };

            match self.session_store.get(&session_id).await {
                Err(StoreError::NotFound) => {
                    tracing::info!(session_id, "orphaned workspace, deleting");
                    remove_dir(&dir);
                }
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "failed to load session during sweep, skipping");
                }
                Ok(session) if session.status.is_terminal() && session.status != SessionStatus::Failed => {
                    tracing::info!(session_id, status = session.status.as_str(), "terminal session, deleting workspace");
                    remove_dir(&dir);
                }
                Ok(session) => {
                    let age_secs = (now_millis() - session.last_activity_at) / 1000;
                    if age_secs > self.max_age_secs {
                        tracing::info!(session_id, age_secs, "session stale beyond max age, archiving");
                        self.archive(&session_id).await;
                        remove_dir(&dir);
                    } else {
                        live.push((dir, session_id, session.last_activity_at));
                    }
                }
            }
        }

        self.enforce_disk_quota(live).await;
    }

    async fn enforce_disk_quota(&self, mut live: Vec<(PathBuf, String, i64)>) {
        let max_bytes = self.max_disk_mb.saturating_mul(1024 * 1024);
        let mut total: u64 = live.iter().map(|(dir, _, _)| dir_size(dir)).sum();
        if total <= max_bytes {
            return;
        }

        live.sort_by_key(|(_, _, last_activity_at)| *last_activity_at);
        for (dir, session_id, _) in live {
            if total <= max_bytes {
                break;
            }
            let freed = dir_size(&dir);
            tracing::info!(session_id, freed_bytes = freed, "over disk quota, archiving oldest session");
            self.archive(&session_id).await;
            remove_dir(&dir);
            total = total.saturating_sub(freed);
        }
    }

    async fn archive(&self, session_id: &str) {
        let result = self
            .session_store
            .update_status(session_id, SessionStatus::Archived, SessionPatch::default())
            .await;
        if let Err(e) = result {
            tracing::warn!(session_id, error = %e, "failed to archive session during sweep");
        }
    }
}

fn remove_dir(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "failed to remove workspace directory, skipping");
    }
}

fn dir_size(dir: &Path) -> u64 {
    let mut total = 0u64;
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if let Ok(metadata) = entry.metadata() {
            if metadata.is_dir() {
                total += dir_size(&path);
            } else {
                total += metadata.len();
            }
        }
    }
    total
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_size_sums_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"12345").unwrap();
        let nested = tmp.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("b.txt"), b"12").unwrap();
        assert_eq!(dir_size(tmp.path()), 7);
    }
}
