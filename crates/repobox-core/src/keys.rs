//! Redis key schema from §6.2, gathered in one place so no two modules
//! can drift on the exact key shape.

pub fn session(session_id: &str) -> String {
    format!("work_session:{session_id}")
}

pub fn session_output(session_id: &str) -> String {
    format!("work_session:{session_id}:output")
}

pub fn job(job_id: &str) -> String {
    format!("job:{job_id}")
}

pub fn git_provider(user_id: &str, provider_id: &str) -> String {
    format!("git_provider:{user_id}:{provider_id}")
}

pub fn user_running(user_id: &str) -> String {
    format!("runner:user:{user_id}:running")
}

/// Index used by `SessionStore::list_for_user` (not named by the store
/// layout table but required to enumerate sessions per user per 4.G/4.N).
pub fn user_sessions(user_id: &str) -> String {
    format!("runner:user:{user_id}:sessions")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_match_schema() {
        assert_eq!(session("abc"), "work_session:abc");
        assert_eq!(session_output("abc"), "work_session:abc:output");
        assert_eq!(job("j1"), "job:j1");
        assert_eq!(git_provider("u1", "p1"), "git_provider:u1:p1");
        assert_eq!(user_running("u1"), "runner:user:u1:running");
    }
}
