//! Duplicate-failure suppression.
//!
//! Repeated failures of the same command within a configurable window are
//! analyzed once. The signature is deliberately coarse: volatile pieces
//! (timestamps, line numbers, addresses, long digit runs) are stripped before
//! hashing so that semantically identical failures collide and genuinely
//! different ones rarely do.

use fs2::FileExt;
use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::hash::{Hash, Hasher};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Normalized fingerprint of a (command, error, exit status) triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorSignature(u64);

impl ErrorSignature {
    /// Compute the signature for a failure.
    ///
    /// Only the first line of the error text participates; deep error output
    /// tends to carry volatile detail that would defeat suppression.
    pub fn compute(command: &str, error_text: &str, exit_status: i32) -> Self {
        let first_line = error_text.lines().next().unwrap_or("");
        let mut hasher = DefaultHasher::new();
        normalize(command).hash(&mut hasher);
        normalize(first_line).hash(&mut hasher);
        exit_status.hash(&mut hasher);
        ErrorSignature(hasher.finish())
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

fn volatile_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            \d{4}-\d{2}-\d{2}          # dates
            | \d{2}:\d{2}:\d{2}        # clock times
            | 0x[0-9a-fA-F]+           # addresses
            | :\d+:                    # file:line: spans
            | \b\d{5,}\b               # pids, ports, epoch stamps
            ",
        )
        .unwrap()
    })
}

/// Strip volatile tokens and collapse whitespace.
fn normalize(text: &str) -> String {
    let stripped = volatile_re().replace_all(text, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Outcome of a dedup check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// First sighting (or the window elapsed): analyze
    Proceed,
    /// Seen recently: suppress
    Skip,
}

/// Session-scoped suppression store with atomic check-and-insert.
///
/// The in-memory map is the unit of behavior; when backed by a session file
/// the map is loaded and rewritten under an exclusive lock so that
/// concurrently spawned invocations in one shell session cannot both proceed
/// for the same signature.
pub struct DedupGate {
    window: Duration,
    prune_after: Duration,
    seen: Mutex<HashMap<u64, SystemTime>>,
    store_path: Option<PathBuf>,
}

impl DedupGate {
    pub fn in_memory(window: Duration) -> Self {
        Self::with_prune_factor(window, 5)
    }

    pub fn with_prune_factor(window: Duration, prune_factor: u32) -> Self {
        Self {
            window,
            prune_after: window * prune_factor.max(1),
            seen: Mutex::new(HashMap::new()),
            store_path: None,
        }
    }

    /// Gate backed by a session state file shared across invocations.
    pub fn with_store(path: PathBuf, window: Duration, prune_factor: u32) -> Self {
        let mut gate = Self::with_prune_factor(window, prune_factor);
        gate.store_path = Some(path);
        gate
    }

    /// Atomically check a signature and record the sighting.
    ///
    /// Returns `Skip` when the signature was last seen within the window,
    /// `Proceed` otherwise. Entries older than the prune horizon are swept
    /// on every insert.
    pub fn check_and_record(&self, signature: ErrorSignature) -> GateDecision {
        match self.store_path {
            Some(ref path) => self
                .check_against_store(path, signature)
                .unwrap_or_else(|err| {
                    // A broken store must never block analysis.
                    tracing::debug!(?err, "dedup store unavailable, proceeding");
                    self.check_in_memory(signature)
                }),
            None => self.check_in_memory(signature),
        }
    }

    fn check_in_memory(&self, signature: ErrorSignature) -> GateDecision {
        let now = SystemTime::now();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let decision = Self::decide(&mut seen, signature, now, self.window);
        Self::prune(&mut seen, now, self.prune_after);
        decision
    }

    fn check_against_store(
        &self,
        path: &PathBuf,
        signature: ErrorSignature,
    ) -> std::io::Result<GateDecision> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let mut seen = parse_store(&contents);

        let now = SystemTime::now();
        let decision = Self::decide(&mut seen, signature, now, self.window);
        Self::prune(&mut seen, now, self.prune_after);

        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        file.write_all(render_store(&seen).as_bytes())?;
        fs2::FileExt::unlock(&file)?;
        Ok(decision)
    }

    fn decide(
        seen: &mut HashMap<u64, SystemTime>,
        signature: ErrorSignature,
        now: SystemTime,
        window: Duration,
    ) -> GateDecision {
        let key = signature.as_u64();
        if let Some(&last_seen) = seen.get(&key) {
            if now.duration_since(last_seen).unwrap_or_default() < window {
                return GateDecision::Skip;
            }
        }
        seen.insert(key, now);
        GateDecision::Proceed
    }

    fn prune(seen: &mut HashMap<u64, SystemTime>, now: SystemTime, horizon: Duration) {
        seen.retain(|_, last_seen| now.duration_since(*last_seen).unwrap_or_default() < horizon);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

fn parse_store(contents: &str) -> HashMap<u64, SystemTime> {
    let mut seen = HashMap::new();
    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        let (Some(sig), Some(ts)) = (parts.next(), parts.next()) else {
            continue;
        };
        let (Ok(sig), Ok(secs)) = (sig.parse::<u64>(), ts.parse::<u64>()) else {
            continue;
        };
        seen.insert(sig, UNIX_EPOCH + Duration::from_secs(secs));
    }
    seen
}

fn render_store(seen: &HashMap<u64, SystemTime>) -> String {
    let mut out = String::new();
    for (sig, ts) in seen {
        let secs = ts.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        out.push_str(&format!("{sig} {secs}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signature_deterministic() {
        let a = ErrorSignature::compute("cargo build", "error[E0382]: borrow of moved value", 101);
        let b = ErrorSignature::compute("cargo build", "error[E0382]: borrow of moved value", 101);
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_distinguishes_commands() {
        let a = ErrorSignature::compute("cargo build", "error: failed", 1);
        let b = ErrorSignature::compute("cargo test", "error: failed", 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_signature_distinguishes_exit_status() {
        let a = ErrorSignature::compute("ls /nope", "No such file or directory", 1);
        let b = ErrorSignature::compute("ls /nope", "No such file or directory", 2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_signature_ignores_volatile_tokens() {
        let a = ErrorSignature::compute(
            "npm run build",
            "Error at 12:30:01 in build step 0x7f3a2b",
            1,
        );
        let b = ErrorSignature::compute(
            "npm  run   build",
            "Error at 09:15:44 in build step 0x55aa10",
            1,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_uses_first_error_line_only() {
        let a = ErrorSignature::compute("make", "fatal: no rule\nfoo", 2);
        let b = ErrorSignature::compute("make", "fatal: no rule\nbar", 2);
        assert_eq!(a, b);
    }

    #[test]
    fn test_gate_suppresses_within_window() {
        let gate = DedupGate::in_memory(Duration::from_secs(60));
        let sig = ErrorSignature::compute("ls /nope", "No such file", 2);

        assert_eq!(gate.check_and_record(sig), GateDecision::Proceed);
        assert_eq!(gate.check_and_record(sig), GateDecision::Skip);
        assert_eq!(gate.check_and_record(sig), GateDecision::Skip);
    }

    #[test]
    fn test_gate_proceeds_after_window_elapses() {
        let gate = DedupGate::in_memory(Duration::from_millis(40));
        let sig = ErrorSignature::compute("ls /nope", "No such file", 2);

        assert_eq!(gate.check_and_record(sig), GateDecision::Proceed);
        assert_eq!(gate.check_and_record(sig), GateDecision::Skip);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(gate.check_and_record(sig), GateDecision::Proceed);
    }

    #[test]
    fn test_gate_boundary_just_under_window() {
        let gate = DedupGate::in_memory(Duration::from_millis(200));
        let sig = ErrorSignature::compute("make", "fatal", 2);

        assert_eq!(gate.check_and_record(sig), GateDecision::Proceed);
        thread::sleep(Duration::from_millis(50));
        // Still inside the window
        assert_eq!(gate.check_and_record(sig), GateDecision::Skip);
    }

    #[test]
    fn test_gate_distinct_signatures_both_proceed() {
        let gate = DedupGate::in_memory(Duration::from_secs(60));
        let a = ErrorSignature::compute("cargo build", "error: x", 101);
        let b = ErrorSignature::compute("cargo test", "error: y", 101);

        assert_eq!(gate.check_and_record(a), GateDecision::Proceed);
        assert_eq!(gate.check_and_record(b), GateDecision::Proceed);
    }

    #[test]
    fn test_gate_concurrent_check_and_insert_is_atomic() {
        let gate = Arc::new(DedupGate::in_memory(Duration::from_secs(60)));
        let sig = ErrorSignature::compute("flaky", "boom", 1);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            handles.push(thread::spawn(move || gate.check_and_record(sig)));
        }

        let proceeds = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|d| *d == GateDecision::Proceed)
            .count();
        assert_eq!(proceeds, 1);
    }

    #[test]
    fn test_gate_prunes_stale_entries() {
        let gate = DedupGate::with_prune_factor(Duration::from_millis(20), 2);
        let old = ErrorSignature::compute("old", "gone", 1);
        let new = ErrorSignature::compute("new", "fresh", 1);

        gate.check_and_record(old);
        thread::sleep(Duration::from_millis(60));
        gate.check_and_record(new);
        // The stale entry was swept on insert
        assert_eq!(gate.len(), 1);
    }

    #[test]
    fn test_file_backed_gate_survives_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dedup");
        let window = Duration::from_secs(60);
        let sig = ErrorSignature::compute("ls /nope", "No such file", 2);

        let first = DedupGate::with_store(path.clone(), window, 5);
        assert_eq!(first.check_and_record(sig), GateDecision::Proceed);

        // A fresh instance (fresh process in real use) sees the sighting
        let second = DedupGate::with_store(path, window, 5);
        assert_eq!(second.check_and_record(sig), GateDecision::Skip);
    }

    #[test]
    fn test_store_roundtrip_ignores_garbage_lines() {
        let seen = parse_store("123 456\nnot a line\n789\n42 1700000000\n");
        assert_eq!(seen.len(), 2);
        assert!(seen.contains_key(&123));
        assert!(seen.contains_key(&42));
    }
}
