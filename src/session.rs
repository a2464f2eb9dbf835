//! Session-scoped state.
//!
//! The shell hook exports `OOPS_SESSION` (its own pid) so every invocation
//! spawned from one interactive session agrees on the scratch-file paths:
//! the wrapper capture file, the stderr tee file, and the dedup store.
//! Passing the state in explicitly keeps the pipeline testable with fresh
//! state per test.

use std::path::{Path, PathBuf};

use crate::capture::CaptureChannel;
use crate::config::DedupConfig;
use crate::dedup::DedupGate;

/// Environment variable carrying the shell session id
pub const SESSION_ENV_VAR: &str = "OOPS_SESSION";

#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: String,
    scratch_dir: PathBuf,
}

impl SessionState {
    /// Session from the hook-exported id; invocations outside a hooked
    /// session share the "solo" scratch namespace.
    pub fn from_env() -> Self {
        let id = std::env::var(SESSION_ENV_VAR)
            .ok()
            .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| "solo".to_string());
        Self::new(id, std::env::temp_dir())
    }

    pub fn new(id: String, scratch_dir: PathBuf) -> Self {
        Self { id, scratch_dir }
    }

    pub fn wrapper_path(&self) -> PathBuf {
        self.scratch_dir.join(format!("oops_wrap_{}", self.id))
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.scratch_dir.join(format!("oops_stderr_{}", self.id))
    }

    pub fn dedup_path(&self) -> PathBuf {
        self.scratch_dir.join(format!("oops_dedup_{}", self.id))
    }

    pub fn capture_channel(&self) -> CaptureChannel {
        CaptureChannel::new(self.wrapper_path(), self.stderr_path())
    }

    /// File-backed gate so concurrent invocations within the session share
    /// suppression state.
    pub fn dedup_gate(&self, config: &DedupConfig) -> DedupGate {
        DedupGate::with_store(self.dedup_path(), config.window(), config.prune_factor)
    }

    /// Remove all scratch artifacts. The hook's EXIT trap does the same; this
    /// covers abnormal teardown and tests.
    pub fn cleanup(&self) {
        for path in [self.wrapper_path(), self.stderr_path(), self.dedup_path()] {
            remove_if_exists(&path);
        }
    }
}

fn remove_if_exists(path: &Path) {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_keyed_by_session_id() {
        let a = SessionState::new("1234".to_string(), PathBuf::from("/tmp"));
        let b = SessionState::new("5678".to_string(), PathBuf::from("/tmp"));

        assert_eq!(a.wrapper_path(), PathBuf::from("/tmp/oops_wrap_1234"));
        assert_ne!(a.stderr_path(), b.stderr_path());
        assert_ne!(a.dedup_path(), b.dedup_path());
    }

    #[test]
    fn test_cleanup_removes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionState::new("42".to_string(), dir.path().to_path_buf());
        std::fs::write(session.wrapper_path(), "x").unwrap();
        std::fs::write(session.stderr_path(), "y").unwrap();
        std::fs::write(session.dedup_path(), "z").unwrap();

        session.cleanup();

        assert!(!session.wrapper_path().exists());
        assert!(!session.stderr_path().exists());
        assert!(!session.dedup_path().exists());
    }

    #[test]
    fn test_from_env_rejects_path_traversal_ids() {
        std::env::set_var(SESSION_ENV_VAR, "../../etc");
        let session = SessionState::from_env();
        assert_eq!(session.id, "solo");
        std::env::remove_var(SESSION_ENV_VAR);
    }
}
