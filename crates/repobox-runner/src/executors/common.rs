//! Small helpers shared by more than one executor.

use anyhow::{anyhow, Result};

/// Truncates a prompt to `max_chars` characters for the "Running prompt:
/// …" runner line (§4.L.2: "truncated to 100 chars").
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Splits a `https://host/owner/repo[.git]` URL into `(owner, repo)`, as
/// needed to build the GitHub/GitLab MR request path.
pub fn parse_owner_repo(repo_url: &str) -> Result<(String, String)> {
    let rest = repo_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(repo_url);
    let path = rest.split_once('/').map(|(_, p)| p).unwrap_or("");
    let path = path.strip_suffix(".git").unwrap_or(path);
    let mut segments = path.trim_matches('/').splitn(2, '/');
    let owner = segments.next().filter(|s| !s.is_empty());
    let repo = segments.next().filter(|s| !s.is_empty());
    match (owner, repo) {
        (Some(o), Some(r)) => Ok((o.to_string(), r.to_string())),
        _ => Err(anyhow!("cannot parse owner/repo from url `{repo_url}`")),
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_passes_short_strings_through() {
        assert_eq!(truncate_chars("add a README", 100), "add a README");
    }

    #[test]
    fn truncate_chars_clips_long_strings() {
        let long = "a".repeat(150);
        let truncated = truncate_chars(&long, 100);
        assert_eq!(truncated.chars().count(), 101);
    }

    #[test]
    fn parse_owner_repo_strips_dot_git() {
        let (owner, repo) = parse_owner_repo("https://github.com/acme/widgets.git").unwrap();
        assert_eq!(owner, "acme");
        assert_eq!(repo, "widgets");
    }

    #[test]
    fn parse_owner_repo_without_suffix() {
        let (owner, repo) = parse_owner_repo("https://gitlab.com/acme/widgets").unwrap();
        assert_eq!(owner, "acme");
        assert_eq!(repo, "widgets");
    }

    #[test]
    fn parse_owner_repo_rejects_malformed_url() {
        assert!(parse_owner_repo("https://github.com/acme").is_err());
    }
}
