//! Admission controller (4.H): a per-user in-flight counter, claimed with
//! an atomic `INCR` + read and released with `DECR`. The cap is
//! deliberately soft — see spec.md's note on the transient overshoot
//! bound — this just keeps the counter honest, not linearizable.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::StoreError;
use crate::keys;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionResult {
    Acquired,
    Rejected,
}

#[derive(Clone)]
pub struct AdmissionController {
    conn: ConnectionManager,
}

impl AdmissionController {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Increments the user's in-flight counter and checks it against
    /// `cap`. On rejection the increment is immediately undone. On
    /// success, returns a guard whose `Drop` releases the slot — this is
    /// how "always release the admission slot" (§7 golden rule) is
    /// enforced structurally rather than by convention at every call
    /// site.
    pub async fn try_acquire(&self, user_id: &str, cap: u64) -> Result<AdmissionResult, StoreError> {
        let key = keys::user_running(user_id);
        let mut conn = self.conn.clone();
        let count: u64 = conn.incr(&key, 1).await?;
        if count > cap {
            conn.decr::<_, u64>(&key, 1).await?;
            return Ok(AdmissionResult::Rejected);
        }
        Ok(AdmissionResult::Acquired)
    }

    pub fn acquire_guard(&self, user_id: &str) -> Admission {
        Admission {
            conn: self.conn.clone(),
            user_id: user_id.to_string(),
            released: false,
        }
    }

    pub async fn release(&self, user_id: &str) {
        let key = keys::user_running(user_id);
        let mut conn = self.conn.clone();
        if let Err(e) = conn.decr::<_, i64>(&key, 1).await {
            tracing::warn!(user_id, error = %e, "failed to release admission slot");
        }
    }
}

/// A held admission slot. Releases on drop, whether the executor returned
/// normally, returned an error, or panicked.
pub struct Admission {
    conn: ConnectionManager,
    user_id: String,
    released: bool,
}

impl Admission {
    pub fn release_now(mut self) {
        self.released = true;
        let key = keys::user_running(&self.user_id);
        let mut conn = self.conn.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.decr::<_, i64>(&key, 1).await {
                tracing::warn!(error = %e, "failed to release admission slot");
            }
        });
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let key = keys::user_running(&self.user_id);
        let mut conn = self.conn.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.decr::<_, i64>(&key, 1).await {
                tracing::warn!(error = %e, "failed to release admission slot");
            }
        });
    }
}
