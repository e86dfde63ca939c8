//! The consumer-group primitive the stream dispatcher (4.I) is built on:
//! `XGROUP CREATE`, `XAUTOCLAIM`, `XREADGROUP`, `XACK` against a Redis
//! stream, behind a trait so the dispatcher's tick logic can be exercised
//! against an in-memory fake instead of a live Redis instance (per
//! SPEC_FULL.md's "no test depends on a live Redis instance" rule).

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Value;

/// One undelivered-or-reclaimed stream entry: its id (used only for
/// `XACK`) and its flat field map.
pub type StreamEntry = (String, HashMap<String, String>);

#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()>;

    /// Reclaims entries idle beyond `min_idle_ms` in `group`'s pending
    /// list, handing them to `consumer`. Runs on every tick, not just at
    /// startup (§4.I.2 / SPEC_FULL's resolution of the §9 open question).
    async fn claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: u64,
    ) -> Result<Vec<StreamEntry>>;

    /// Blocks up to `block_ms` for one new entry. `None` on an empty
    /// result (§4.I.3: "on empty result, loop").
    async fn read_one(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block_ms: u64,
    ) -> Result<Option<StreamEntry>>;

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisStreamSource {
    conn: ConnectionManager,
}

impl RedisStreamSource {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

/// `XRANGE`/`XREADGROUP`-shaped entry: `[id, [field, value, field, value, ...]]`.
fn parse_stream_entry(value: &Value) -> Option<StreamEntry> {
    let Value::Array(parts) = value else {
        return None;
    };
    let [id_value, fields_value] = &parts[..] else {
        return None;
    };
    let id = match id_value {
        Value::BulkString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::SimpleString(s) => s.clone(),
        _ => return None,
    };
    let Value::Array(flat) = fields_value else {
        return None;
    };
    let mut map = HashMap::new();
    let mut iter = flat.iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        let (Value::BulkString(kb), Value::BulkString(vb)) = (k, v) else {
            continue;
        };
        map.insert(
            String::from_utf8_lossy(kb).into_owned(),
            String::from_utf8_lossy(vb).into_owned(),
        );
    }
    Some((id, map))
}

/// `XREADGROUP`'s top-level reply shape: `[[stream_name, [entry, entry, ...]]]`.
fn parse_xreadgroup_reply(value: Value) -> Vec<StreamEntry> {
    let Value::Array(streams) = value else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for stream_reply in streams {
        let Value::Array(pair) = stream_reply else {
            continue;
        };
        let [_name, entries] = &pair[..] else {
            continue;
        };
        let Value::Array(entries) = entries else {
            continue;
        };
        for entry in entries {
            if let Some(parsed) = parse_stream_entry(&entry) {
                out.push(parsed);
            }
        }
    }
    out
}

/// `XAUTOCLAIM`'s reply shape: `[cursor, [entry, entry, ...], [deleted_id, ...]]`
/// (RESP2/RESP3, Redis 6.2+). The deleted-ids tail is ignored here — those
/// entries were already trimmed from the stream and have nothing to claim.
fn parse_xautoclaim_reply(value: Value) -> Vec<StreamEntry> {
    let Value::Array(parts) = value else {
        return Vec::new();
    };
    let Some(Value::Array(entries)) = parts.get(1) else {
        return Vec::new();
    };
    entries.iter().filter_map(parse_stream_entry).collect()
}

#[async_trait]
impl StreamSource for RedisStreamSource {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e).context("XGROUP CREATE failed"),
        }
    }

    async fn claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: u64,
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .context("XAUTOCLAIM failed")?;
        Ok(parse_xautoclaim_reply(reply))
    }

    async fn read_one(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block_ms: u64,
    ) -> Result<Option<StreamEntry>> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("COUNT")
            .arg(1)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut conn)
            .await
            .context("XREADGROUP failed")?;
        Ok(parse_xreadgroup_reply(reply).into_iter().next())
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(entry_id)
            .query_async(&mut conn)
            .await
            .context("XACK failed")?;
        Ok(())
    }
}

/// In-memory [`StreamSource`] fake used by dispatcher tests: entries are
/// queued directly, `claim_stale` always returns empty (no reclaim
/// scenario to test without a real pending-entries list), and `ack`
/// records the acknowledged ids for assertions.
#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeStreamSource {
        pending: Mutex<std::collections::VecDeque<StreamEntry>>,
        pub acked: Mutex<Vec<String>>,
    }

    impl FakeStreamSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, id: impl Into<String>, fields: HashMap<String, String>) {
            self.pending
                .lock()
                .expect("lock poisoned")
                .push_back((id.into(), fields));
        }
    }

    #[async_trait]
    impl StreamSource for FakeStreamSource {
        async fn ensure_group(&self, _stream: &str, _group: &str) -> Result<()> {
            Ok(())
        }

        async fn claim_stale(
            &self,
            _stream: &str,
            _group: &str,
            _consumer: &str,
            _min_idle_ms: u64,
            _count: u64,
        ) -> Result<Vec<StreamEntry>> {
            Ok(Vec::new())
        }

        async fn read_one(
            &self,
            _stream: &str,
            _group: &str,
            _consumer: &str,
            _block_ms: u64,
        ) -> Result<Option<StreamEntry>> {
            Ok(self.pending.lock().expect("lock poisoned").pop_front())
        }

        async fn ack(&self, _stream: &str, _group: &str, entry_id: &str) -> Result<()> {
            self.acked.lock().expect("lock poisoned").push(entry_id.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn parses_a_single_xreadgroup_entry() {
        let reply = Value::Array(vec![Value::Array(vec![
            bulk("work_sessions:init:stream"),
            Value::Array(vec![Value::Array(vec![
                bulk("1700000000000-0"),
                Value::Array(vec![
                    bulk("session_id"),
                    bulk("s1"),
                    bulk("user_id"),
                    bulk("u1"),
                ]),
            ])]),
        ])]);
        let entries = parse_xreadgroup_reply(reply);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "1700000000000-0");
        assert_eq!(entries[0].1.get("session_id").map(String::as_str), Some("s1"));
    }

    #[test]
    fn empty_reply_yields_no_entries() {
        assert!(parse_xreadgroup_reply(Value::Nil).is_empty());
    }

    #[test]
    fn parses_xautoclaim_reply_ignoring_cursor_and_deleted_tail() {
        let reply = Value::Array(vec![
            bulk("0-0"),
            Value::Array(vec![Value::Array(vec![
                bulk("1700000000000-1"),
                Value::Array(vec![bulk("job_id"), bulk("j1")]),
            ])]),
            Value::Array(vec![]),
        ]);
        let entries = parse_xautoclaim_reply(reply);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "1700000000000-1");
    }
}
