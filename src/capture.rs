//! Error-output capture for failed commands.
//!
//! The command may or may not have been run through an instrumented wrapper,
//! so capture is a ladder of strategies tried in order: the wrapper's scratch
//! file, the session-wide stderr tee, a guarded re-execution probe, and
//! finally a synthesized message. The ladder always produces text; it never
//! blocks the prompt beyond the probe's fixed budget.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::config::LimitsConfig;

/// How the error text for a failure was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStrategy {
    /// Read from the explicit wrapper's scratch file
    Wrapper,
    /// Read from the session-wide stderr tee (file or shipped argument)
    SessionStderr,
    /// Obtained by re-running the command with stderr captured
    Reexec,
    /// No capture available; message synthesized
    Synthesized,
}

/// Everything known about one completed foreground command.
/// Immutable once created; consumed by a single diagnosis cycle.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: String,
    pub exit_status: i32,
    pub error_text: String,
    pub strategy: CaptureStrategy,
    pub timestamp: SystemTime,
}

/// Per-session capture state: the two scratch files the shell hook writes.
pub struct CaptureChannel {
    wrapper_path: PathBuf,
    stderr_path: PathBuf,
}

impl CaptureChannel {
    pub fn new(wrapper_path: PathBuf, stderr_path: PathBuf) -> Self {
        Self {
            wrapper_path,
            stderr_path,
        }
    }

    /// Walk the ladder and produce an outcome. `shipped` is the
    /// base64-encoded stderr tail the hook passed on the command line, if any.
    pub async fn resolve(
        &self,
        command: &str,
        exit_status: i32,
        shipped: Option<&str>,
        limits: &LimitsConfig,
    ) -> CommandOutcome {
        let (error_text, strategy) = self.capture(command, exit_status, shipped, limits).await;
        CommandOutcome {
            command: command.to_string(),
            exit_status,
            error_text,
            strategy,
            timestamp: SystemTime::now(),
        }
    }

    async fn capture(
        &self,
        command: &str,
        exit_status: i32,
        shipped: Option<&str>,
        limits: &LimitsConfig,
    ) -> (String, CaptureStrategy) {
        if let Some(text) = read_scratch(&self.wrapper_path) {
            return (text, CaptureStrategy::Wrapper);
        }

        if let Some(encoded) = shipped {
            let text = decode_transport(encoded);
            if !text.trim().is_empty() {
                return (text, CaptureStrategy::SessionStderr);
            }
        }
        if let Some(text) = read_scratch(&self.stderr_path) {
            return (text, CaptureStrategy::SessionStderr);
        }

        if is_safe_to_reexec(command) {
            if let Some(text) = reexec_probe(command, limits.probe_timeout()).await {
                return (text, CaptureStrategy::Reexec);
            }
        }

        (synthesize(command, exit_status), CaptureStrategy::Synthesized)
    }

    /// Truncate both scratch files so a stale capture never leaks into the
    /// next cycle.
    pub fn clear(&self) {
        for path in [&self.wrapper_path, &self.stderr_path] {
            if path.exists() {
                let _ = std::fs::write(path, b"");
            }
        }
    }
}

/// Read a scratch file, treating missing, unreadable, and blank files alike.
fn read_scratch(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Decode the hook's base64 transport. The encoding keeps arbitrary bytes and
/// control sequences intact across the argv boundary; anything that fails to
/// decode is taken verbatim, matching the hook's own fallback.
pub fn decode_transport(encoded: &str) -> String {
    let compact: String = encoded.split_whitespace().collect();
    match BASE64.decode(compact.as_bytes()) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => encoded.to_string(),
    }
}

/// Tokens that make re-execution unsafe or unrepresentative: pipes,
/// redirections, backgrounding, separators, substitutions, privilege
/// escalation. Any hit skips the probe stage outright.
pub fn is_safe_to_reexec(command: &str) -> bool {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return false;
    }
    const UNSAFE_SUBSTRINGS: &[&str] = &["|", ">", "<", "&", ";", "`", "$(", "\n"];
    if UNSAFE_SUBSTRINGS.iter().any(|t| trimmed.contains(t)) {
        return false;
    }
    let leading = trimmed.split_whitespace().next().unwrap_or("");
    !matches!(leading, "sudo" | "doas" | "su")
}

/// Re-run the command with stdin and stdout suppressed, collecting stderr
/// only. Returns `None` on timeout, spawn failure, or empty stderr.
pub async fn reexec_probe(command: &str, budget: Duration) -> Option<String> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .ok()?;

    let mut stderr = child.stderr.take()?;
    let collect = async {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        let _ = child.wait().await;
        buf
    };

    let bytes = tokio::time::timeout(budget, collect).await.ok()?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Resolve the command's leading token against PATH (or directly, for
/// paths containing a separator).
pub fn resolve_leading_token(command: &str) -> Option<PathBuf> {
    let token = command.trim().split_whitespace().next()?;
    if token.contains('/') {
        let path = PathBuf::from(token);
        return path.is_file().then_some(path);
    }
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(token);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Last rung of the ladder: fabricate a plausible error message from what
/// little is known.
pub fn synthesize(command: &str, exit_status: i32) -> String {
    let token = command.trim().split_whitespace().next().unwrap_or("");
    if !token.is_empty() && resolve_leading_token(command).is_none() && !token.contains('/') {
        format!("{token}: command not found")
    } else {
        format!("command failed with exit status {exit_status}")
    }
}
