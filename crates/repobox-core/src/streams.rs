//! Stream names, consumer-group naming, and the flat-field parsers for the
//! three session streams plus the legacy single-shot stream (§6.1). Kept in
//! `repobox-core` alongside the rest of the "dynamic hashes -> typed
//! records" parsing (§9) so the dispatcher never touches a raw
//! `HashMap<String, String>` itself.

use std::collections::HashMap;

use crate::error::StoreError;
use crate::types::{InitMsg, LegacyMsg, PushMsg, StreamMessage};

pub mod names {
    pub const INIT: &str = "work_sessions:init:stream";
    pub const JOBS: &str = "work_sessions:jobs:stream";
    pub const PUSH: &str = "work_sessions:push:stream";
    pub const LEGACY: &str = "jobs:stream";
}

/// Consumer group name for a stream: every group in this system is named
/// `<stream>:runners` (§6.1).
pub fn group_for(stream: &str) -> String {
    format!("{stream}:runners")
}

fn field(map: &HashMap<String, String>, key: &str) -> Result<String, StoreError> {
    map.get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| StoreError::Malformed(format!("missing field `{key}`")))
}

fn opt_field(map: &HashMap<String, String>, key: &str) -> Option<String> {
    map.get(key).filter(|v| !v.is_empty()).cloned()
}

pub fn parse_init(map: &HashMap<String, String>) -> Result<InitMsg, StoreError> {
    Ok(InitMsg {
        session_id: field(map, "session_id")?,
        user_id: field(map, "user_id")?,
        provider_id: field(map, "provider_id")?,
        repo_url: field(map, "repo_url")?,
        repo_name: field(map, "repo_name")?,
        base_branch: field(map, "base_branch")?,
    })
}

pub fn parse_prompt(map: &HashMap<String, String>) -> Result<crate::types::PromptMsg, StoreError> {
    Ok(crate::types::PromptMsg {
        session_id: field(map, "session_id")?,
        job_id: field(map, "job_id")?,
        user_id: field(map, "user_id")?,
        prompt: field(map, "prompt")?,
        environment: map.get("environment").cloned().unwrap_or_default(),
    })
}

pub fn parse_push(map: &HashMap<String, String>) -> Result<PushMsg, StoreError> {
    Ok(PushMsg {
        session_id: field(map, "session_id")?,
        user_id: field(map, "user_id")?,
        title: opt_field(map, "title"),
        description: opt_field(map, "description"),
    })
}

pub fn parse_legacy(map: &HashMap<String, String>) -> Result<LegacyMsg, StoreError> {
    Ok(LegacyMsg {
        job_id: field(map, "job_id")?,
        provider_id: field(map, "provider_id")?,
    })
}

/// Which stream kind a dispatcher loop was built for; threads through to
/// the right parser and the right `StreamMessage` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Init,
    Prompt,
    Push,
    Legacy,
}

impl StreamKind {
    pub fn stream_name(&self) -> &'static str {
        match self {
            StreamKind::Init => names::INIT,
            StreamKind::Prompt => names::JOBS,
            StreamKind::Push => names::PUSH,
            StreamKind::Legacy => names::LEGACY,
        }
    }

    pub fn group_name(&self) -> String {
        group_for(self.stream_name())
    }

    pub fn parse(&self, map: &HashMap<String, String>) -> Result<StreamMessage, StoreError> {
        Ok(match self {
            StreamKind::Init => StreamMessage::Init(parse_init(map)?),
            StreamKind::Prompt => StreamMessage::Prompt(parse_prompt(map)?),
            StreamKind::Push => StreamMessage::Push(parse_push(map)?),
            StreamKind::Legacy => StreamMessage::Legacy(parse_legacy(map)?),
        })
    }

    /// Only the prompt stream consults the admission controller (§4.I.4).
    pub fn rate_limited(&self) -> bool {
        matches!(self, StreamKind::Prompt | StreamKind::Legacy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn group_naming_matches_schema() {
        assert_eq!(group_for("work_sessions:init:stream"), "work_sessions:init:stream:runners");
        assert_eq!(StreamKind::Legacy.group_name(), "jobs:stream:runners");
    }

    #[test]
    fn parse_init_requires_all_fields() {
        let fields = map(&[
            ("session_id", "s1"),
            ("user_id", "u1"),
            ("provider_id", "p1"),
            ("repo_url", "https://github.com/x/y"),
            ("repo_name", "y"),
            ("base_branch", "main"),
        ]);
        let msg = parse_init(&fields).expect("parses");
        assert_eq!(msg.session_id, "s1");
        assert_eq!(msg.base_branch, "main");
    }

    #[test]
    fn parse_init_missing_field_is_malformed() {
        let fields = map(&[("session_id", "s1")]);
        assert!(matches!(parse_init(&fields), Err(StoreError::Malformed(_))));
    }

    #[test]
    fn parse_push_title_and_description_are_optional() {
        let fields = map(&[("session_id", "s1"), ("user_id", "u1")]);
        let msg = parse_push(&fields).expect("parses");
        assert_eq!(msg.title, None);
        assert_eq!(msg.description, None);
    }

    #[test]
    fn rate_limited_only_prompt_and_legacy() {
        assert!(!StreamKind::Init.rate_limited());
        assert!(StreamKind::Prompt.rate_limited());
        assert!(!StreamKind::Push.rate_limited());
        assert!(StreamKind::Legacy.rate_limited());
    }
}
