//! Session store (4.G) and credential store (4.F): typed read/update
//! access to the Redis hashes laid out in §6.2. Per the "dynamic hashes
//! -> typed records" design note, every entity gets one parse function
//! that validates required fields and coerces numeric strings rather
//! than crashing on a malformed record.

use std::collections::HashMap;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::crypto::{self, KEY_LEN};
use crate::error::StoreError;
use crate::keys;
use crate::types::{
    Job, JobPatch, JobStatus, Provider, ProviderKind, SecretToken, Session, SessionPatch,
    SessionStatus,
};

fn field(map: &HashMap<String, String>, key: &str) -> Result<String, StoreError> {
    map.get(key)
        .cloned()
        .ok_or_else(|| StoreError::Malformed(format!("missing field `{key}`")))
}

fn parse_u64(map: &HashMap<String, String>, key: &str, default: u64) -> Result<u64, StoreError> {
    match map.get(key) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| StoreError::Malformed(format!("field `{key}` is not a u64: {v}"))),
    }
}

fn parse_i64_opt(map: &HashMap<String, String>, key: &str) -> Result<Option<i64>, StoreError> {
    match map.get(key) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| StoreError::Malformed(format!("field `{key}` is not an i64: {v}"))),
    }
}

fn opt_string(map: &HashMap<String, String>, key: &str) -> Option<String> {
    map.get(key).filter(|v| !v.is_empty()).cloned()
}

fn parse_session(id: &str, map: HashMap<String, String>) -> Result<Session, StoreError> {
    if map.is_empty() {
        return Err(StoreError::NotFound);
    }
    let status_raw = field(&map, "status")?;
    let status = SessionStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Malformed(format!("unknown status `{status_raw}`")))?;
    Ok(Session {
        id: id.to_string(),
        user_id: field(&map, "user_id")?,
        provider_id: field(&map, "provider_id")?,
        repo_url: field(&map, "repo_url")?,
        repo_name: field(&map, "repo_name")?,
        base_branch: field(&map, "base_branch")?,
        work_branch: map.get("work_branch").cloned().unwrap_or_default(),
        status,
        job_count: parse_u64(&map, "job_count", 0)?,
        total_lines_added: parse_u64(&map, "total_lines_added", 0)?,
        total_lines_removed: parse_u64(&map, "total_lines_removed", 0)?,
        mr_url: opt_string(&map, "mr_url"),
        mr_warning: opt_string(&map, "mr_warning"),
        error_message: opt_string(&map, "error_message"),
        last_job_status: opt_string(&map, "last_job_status"),
        created_at: parse_i64_opt(&map, "created_at")?.unwrap_or(0),
        last_activity_at: parse_i64_opt(&map, "last_activity_at")?.unwrap_or(0),
        pushed_at: parse_i64_opt(&map, "pushed_at")?,
    })
}

fn parse_job(id: &str, map: HashMap<String, String>) -> Result<Job, StoreError> {
    if map.is_empty() {
        return Err(StoreError::NotFound);
    }
    let status_raw = field(&map, "status")?;
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Malformed(format!("unknown job status `{status_raw}`")))?;
    Ok(Job {
        id: id.to_string(),
        session_id: field(&map, "session_id")?,
        user_id: field(&map, "user_id")?,
        prompt: field(&map, "prompt")?,
        environment: map.get("environment").cloned().unwrap_or_default(),
        status,
        started_at: parse_i64_opt(&map, "started_at")?,
        finished_at: parse_i64_opt(&map, "finished_at")?,
        lines_added: Some(parse_u64(&map, "lines_added", 0)?).filter(|_| map.contains_key("lines_added")),
        lines_removed: Some(parse_u64(&map, "lines_removed", 0)?)
            .filter(|_| map.contains_key("lines_removed")),
        error_message: opt_string(&map, "error_message"),
    })
}

fn parse_provider(
    id: &str,
    user_id: &str,
    map: HashMap<String, String>,
    key: &[u8; KEY_LEN],
) -> Result<Provider, StoreError> {
    if map.is_empty() {
        return Err(StoreError::NotFound);
    }
    let kind_raw = field(&map, "type")?;
    let kind = ProviderKind::parse(&kind_raw)
        .ok_or_else(|| StoreError::Malformed(format!("unknown provider type `{kind_raw}`")))?;
    let ciphertext = field(&map, "token")?;
    let plaintext = crypto::decrypt(&ciphertext, key)
        .map_err(|e| StoreError::Malformed(format!("credential decrypt failed: {e}")))?;
    Ok(Provider {
        id: id.to_string(),
        user_id: user_id.to_string(),
        kind,
        base_url: field(&map, "url")?,
        token: SecretToken::new(plaintext),
        verified: map.get("verified").map(|v| v == "true").unwrap_or(false),
    })
}

#[derive(Clone)]
pub struct SessionStore {
    conn: ConnectionManager,
}

impl SessionStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn get(&self, session_id: &str) -> Result<Session, StoreError> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(keys::session(session_id)).await?;
        parse_session(session_id, map)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job, StoreError> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(keys::job(job_id)).await?;
        parse_job(job_id, map)
    }

    /// Blind merge: sets the new status, `last_activity_at = now`, and any
    /// patch fields the caller supplied. No CAS — the FSM already
    /// guarantees a single writer per session at any instant (§4.G).
    pub async fn update_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        patch: SessionPatch,
    ) -> Result<(), StoreError> {
        let mut fields: Vec<(String, String)> = vec![
            ("status".into(), status.as_str().into()),
            ("last_activity_at".into(), now_millis().to_string()),
        ];
        if let Some(v) = patch.job_count {
            fields.push(("job_count".into(), v.to_string()));
        }
        if let Some(v) = patch.total_lines_added {
            fields.push(("total_lines_added".into(), v.to_string()));
        }
        if let Some(v) = patch.total_lines_removed {
            fields.push(("total_lines_removed".into(), v.to_string()));
        }
        if let Some(v) = patch.mr_url {
            fields.push(("mr_url".into(), v));
        }
        if let Some(v) = patch.mr_warning {
            fields.push(("mr_warning".into(), v));
        }
        if let Some(v) = patch.error_message {
            fields.push(("error_message".into(), v));
        }
        if let Some(v) = patch.last_job_status {
            fields.push(("last_job_status".into(), v));
        }
        if let Some(v) = patch.pushed_at {
            fields.push(("pushed_at".into(), v.to_string()));
        }
        if let Some(v) = patch.work_branch {
            fields.push(("work_branch".into(), v));
        }

        let mut conn = self.conn.clone();
        conn.hset_multiple(keys::session(session_id), &fields)
            .await?;
        Ok(())
    }

    /// Atomically bumps `job_count`, `total_lines_added`/`total_lines_removed`
    /// and `last_activity_at` on a successful prompt (§3 invariant 3: "job_count
    /// increments only on successful prompt completion"). Uses `HINCRBY` rather
    /// than the blind-merge `update_status` path because these three fields are
    /// deltas, not replacements.
    pub async fn record_job_success(
        &self,
        session_id: &str,
        lines_added: u64,
        lines_removed: u64,
    ) -> Result<(), StoreError> {
        let key = keys::session(session_id);
        let mut conn = self.conn.clone();
        let _: i64 = conn.hincr(&key, "job_count", 1).await?;
        if lines_added > 0 {
            let _: i64 = conn.hincr(&key, "total_lines_added", lines_added).await?;
        }
        if lines_removed > 0 {
            let _: i64 = conn.hincr(&key, "total_lines_removed", lines_removed).await?;
        }
        conn.hset(&key, "last_activity_at", now_millis().to_string())
            .await?;
        Ok(())
    }

    pub async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        patch: JobPatch,
    ) -> Result<(), StoreError> {
        let mut fields: Vec<(String, String)> = vec![("status".into(), status.as_str().into())];
        if let Some(v) = patch.started_at {
            fields.push(("started_at".into(), v.to_string()));
        }
        if let Some(v) = patch.finished_at {
            fields.push(("finished_at".into(), v.to_string()));
        }
        if let Some(v) = patch.lines_added {
            fields.push(("lines_added".into(), v.to_string()));
        }
        if let Some(v) = patch.lines_removed {
            fields.push(("lines_removed".into(), v.to_string()));
        }
        if let Some(v) = patch.error_message {
            fields.push(("error_message".into(), v));
        }

        let mut conn = self.conn.clone();
        conn.hset_multiple(keys::job(job_id), &fields).await?;
        Ok(())
    }

    /// Session ids belonging to a user — used by the janitor's age sweep
    /// and by tests; the natural companion to §2 row G's "enumerate
    /// sessions per user".
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(keys::user_sessions(user_id)).await?;
        Ok(ids)
    }

    /// All known session ids on this runner's store, used by the janitor
    /// to cross-reference on-disk workspaces against live records.
    pub async fn all_session_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys("work_session:*").await?;
        Ok(keys
            .into_iter()
            .filter(|k| !k.ends_with(":output"))
            .filter_map(|k| k.strip_prefix("work_session:").map(str::to_string))
            .collect())
    }
}

#[derive(Clone)]
pub struct CredentialStore {
    conn: ConnectionManager,
    encryption_key: [u8; KEY_LEN],
}

impl CredentialStore {
    pub fn new(conn: ConnectionManager, encryption_key: [u8; KEY_LEN]) -> Self {
        Self {
            conn,
            encryption_key,
        }
    }

    pub async fn get_provider(&self, user_id: &str, provider_id: &str) -> Result<Provider, StoreError> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> =
            conn.hgetall(keys::git_provider(user_id, provider_id)).await?;
        parse_provider(provider_id, user_id, map, &self.encryption_key)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
