use std::collections::HashMap;

use anyhow::{bail, Context, Result};

use crate::crypto::{self, KEY_LEN};

pub mod defaults {
    //! Constants named throughout spec.md, gathered here since several
    //! are cited by more than one component.
    pub const MAX_CONCURRENT_JOBS: u32 = 10;
    pub const MAX_JOBS_PER_USER: u64 = 3;
    pub const JOB_TIMEOUT_SECS: u64 = 3600;
    pub const AI_TIMEOUT_SECS: u64 = 1800;
    pub const AI_MAX_OUTPUT_LINES: u64 = 10_000;
    pub const CLAIM_IDLE_THRESHOLD_MS: u64 = 5 * 60 * 1000;
    pub const STREAM_BLOCK_MS: u64 = 5_000;
    pub const ADMISSION_RETRY_SLEEP_MS: u64 = 100;
    pub const CLEANUP_INTERVAL_SECS: u64 = 3600;
    pub const CLEANUP_MAX_AGE_SECS: i64 = 24 * 60 * 60;
    pub const CLEANUP_MAX_DISK_MB: u64 = 20_000;
    pub const OUTPUT_TTL_SECS: i64 = 7 * 24 * 60 * 60;
}

/// Full runner configuration, loaded once at startup (§6.5). Every row
/// of the spec's configuration table has a field here; a missing or
/// malformed required value is a startup failure, not a panic deep in a
/// worker.
#[derive(Clone)]
pub struct Config {
    pub redis_url: String,
    pub encryption_key: [u8; KEY_LEN],
    pub runner_id: String,

    pub max_concurrent_jobs: u32,
    pub max_jobs_per_user: u64,
    pub job_timeout_secs: u64,

    pub ai_enabled: bool,
    pub ai_cli_path: String,
    pub ai_provider: String,
    pub ai_api_key: String,
    pub ai_timeout_secs: u64,
    pub ai_max_output_lines: u64,

    pub temp_dir: String,
    pub cleanup_interval_secs: u64,
    pub cleanup_max_age_secs: i64,
    pub cleanup_max_disk_mb: u64,
    pub cleanup_on_startup: bool,

    pub git_author_name: String,
    pub git_author_email: String,

    pub log_level: String,
    pub log_format: String,
}

fn parse_dotenv() -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

fn get(key: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
}

fn get_str(key: &str, dotenv: &HashMap<String, String>, default: &str) -> String {
    get(key, dotenv).unwrap_or_else(|| default.to_string())
}

fn get_bool(key: &str, dotenv: &HashMap<String, String>, default: bool) -> bool {
    match get(key, dotenv).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        Some(_) => default,
        None => default,
    }
}

fn get_u64(key: &str, dotenv: &HashMap<String, String>, default: u64) -> u64 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_i64(key: &str, dotenv: &HashMap<String, String>, default: i64) -> i64 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u32(key: &str, dotenv: &HashMap<String, String>, default: u32) -> u32 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let dotenv = parse_dotenv();

        let redis_url = get_str("REDIS_URL", &dotenv, "redis://127.0.0.1:6379");

        let raw_key = get("ENCRYPTION_KEY", &dotenv)
            .context("ENCRYPTION_KEY is required and was not set")?;
        let encryption_key = crypto::parse_key(&raw_key)
            .map_err(|e| anyhow::anyhow!("ENCRYPTION_KEY invalid: {e}"))?;

        let runner_id = get("RUNNER_ID", &dotenv)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_runner_id);

        let ai_api_key = get_str("ANTHROPIC_API_KEY", &dotenv, "");
        let ai_enabled = get_bool("AI_ENABLED", &dotenv, true) && !ai_api_key.is_empty();

        let max_concurrent_jobs = get_u32(
            "MAX_CONCURRENT_JOBS",
            &dotenv,
            defaults::MAX_CONCURRENT_JOBS,
        );
        if max_concurrent_jobs == 0 {
            bail!("MAX_CONCURRENT_JOBS must be at least 1");
        }

        Ok(Config {
            redis_url,
            encryption_key,
            runner_id,
            max_concurrent_jobs,
            max_jobs_per_user: get_u64(
                "MAX_JOBS_PER_USER",
                &dotenv,
                defaults::MAX_JOBS_PER_USER,
            ),
            job_timeout_secs: get_u64(
                "JOB_TIMEOUT",
                &dotenv,
                defaults::JOB_TIMEOUT_SECS,
            ),
            ai_enabled,
            ai_cli_path: get_str("AI_CLI_PATH", &dotenv, "claude"),
            ai_provider: get_str("AI_PROVIDER", &dotenv, "anthropic"),
            ai_api_key,
            ai_timeout_secs: get_u64("AI_TIMEOUT", &dotenv, defaults::AI_TIMEOUT_SECS),
            ai_max_output_lines: get_u64(
                "AI_MAX_OUTPUT_LINES",
                &dotenv,
                defaults::AI_MAX_OUTPUT_LINES,
            ),
            temp_dir: get_str("TEMP_DIR", &dotenv, "/tmp/repobox"),
            cleanup_interval_secs: get_u64(
                "CLEANUP_INTERVAL",
                &dotenv,
                defaults::CLEANUP_INTERVAL_SECS,
            ),
            cleanup_max_age_secs: get_i64(
                "CLEANUP_MAX_AGE",
                &dotenv,
                defaults::CLEANUP_MAX_AGE_SECS,
            ),
            cleanup_max_disk_mb: get_u64(
                "CLEANUP_MAX_DISK_MB",
                &dotenv,
                defaults::CLEANUP_MAX_DISK_MB,
            ),
            cleanup_on_startup: get_bool("CLEANUP_ON_STARTUP", &dotenv, true),
            git_author_name: get_str("GIT_AUTHOR_NAME", &dotenv, "repobox"),
            git_author_email: get_str("GIT_AUTHOR_EMAIL", &dotenv, "repobox@localhost"),
            log_level: get_str("LOG_LEVEL", &dotenv, "info"),
            log_format: get_str("LOG_FORMAT", &dotenv, "text"),
        })
    }
}

fn default_runner_id() -> String {
    let pid = std::process::id();
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "runner".to_string());
    format!("{host}-{pid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_runner_id_is_non_empty() {
        assert!(!default_runner_id().is_empty());
    }
}
