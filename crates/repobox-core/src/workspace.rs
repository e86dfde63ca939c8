//! Workspace path layout: `TEMP_DIR/sessions/<sessionId>/repo` (§4.K.1,
//! GLOSSARY). Gathered in one place so the init executor (which creates
//! it), the prompt/push executors (which look for it), and the janitor
//! (which deletes it) can never drift apart on the exact shape.

pub fn session_dir(temp_dir: &str, session_id: &str) -> String {
    format!("{temp_dir}/sessions/{session_id}")
}

pub fn repo_dir(temp_dir: &str, session_id: &str) -> String {
    format!("{}/repo", session_dir(temp_dir, session_id))
}

/// Extracts the session id a workspace directory belongs to, given
/// `TEMP_DIR`; used by the janitor walking `TEMP_DIR/sessions/*`.
pub fn session_id_from_dir(temp_dir: &str, dir: &std::path::Path) -> Option<String> {
    let sessions_root = std::path::Path::new(temp_dir).join("sessions");
    dir.strip_prefix(&sessions_root)
        .ok()
        .and_then(|rest| rest.components().next())
        .and_then(|c| c.as_os_str().to_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_dir_nests_under_session_dir() {
        assert_eq!(repo_dir("/tmp/repobox", "s1"), "/tmp/repobox/sessions/s1/repo");
    }

    #[test]
    fn session_id_from_dir_extracts_first_segment() {
        let dir = std::path::Path::new("/tmp/repobox/sessions/s1");
        assert_eq!(session_id_from_dir("/tmp/repobox", dir), Some("s1".to_string()));
    }

    #[test]
    fn session_id_from_dir_rejects_unrelated_path() {
        let dir = std::path::Path::new("/var/other/path");
        assert_eq!(session_id_from_dir("/tmp/repobox", dir), None);
    }
}
