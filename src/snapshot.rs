//! Best-effort context snapshot at the moment of failure.
//!
//! Each collector is wrapped independently: a missing tool, permission error,
//! or timeout yields an absent field, never a failed snapshot. Collectors
//! stay cheap — single non-interactive child processes at most, each under
//! its own time budget.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::Config;

/// Environment facts gathered for one diagnosis cycle.
/// Every field is independently optional.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextSnapshot {
    pub working_dir: Option<String>,
    pub directory: Option<DirectorySummary>,
    pub git: Option<GitSummary>,
    pub system: Option<SystemSummary>,
    pub tools: Option<Vec<String>>,
    pub history: Option<Vec<String>>,
    pub activity: Option<Vec<String>>,
    pub network_ok: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectorySummary {
    pub file_count: usize,
    pub project_type: Option<String>,
    pub key_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GitSummary {
    pub branch: String,
    pub changed_files: usize,
    pub recent_commits: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemSummary {
    pub mem_used_pct: Option<f32>,
    pub mem_available_gb: Option<f32>,
    pub disk_used_pct: Option<f32>,
    pub disk_free_gb: Option<f32>,
    pub load_one: Option<f32>,
}

impl ContextSnapshot {
    pub fn is_empty(&self) -> bool {
        self.working_dir.is_none()
            && self.directory.is_none()
            && self.git.is_none()
            && self.system.is_none()
            && self.tools.is_none()
            && self.history.is_none()
            && self.activity.is_none()
            && self.network_ok.is_none()
    }

    /// Render the snapshot as prompt-ready lines. Field order is stable;
    /// absent fields are simply omitted. Each line is clamped to
    /// `field_budget` bytes.
    pub fn render(&self, field_budget: usize) -> String {
        let mut lines = Vec::new();

        if let Some(ref dir) = self.working_dir {
            lines.push(format!("Working directory: {dir}"));
        }
        if let Some(ref d) = self.directory {
            let mut line = format!("Directory: {} entries", d.file_count);
            if let Some(ref kind) = d.project_type {
                line.push_str(&format!(", {kind} project"));
            }
            if !d.key_files.is_empty() {
                line.push_str(&format!(" (key files: {})", d.key_files.join(", ")));
            }
            lines.push(line);
        }
        if let Some(ref git) = self.git {
            let mut line = format!("Git: branch {}", git.branch);
            if git.changed_files > 0 {
                line.push_str(&format!(", {} changed files", git.changed_files));
            }
            lines.push(line);
            for commit in &git.recent_commits {
                lines.push(format!("  recent commit: {commit}"));
            }
        }
        if let Some(ref sys) = self.system {
            let mut parts = Vec::new();
            if let Some(pct) = sys.mem_used_pct {
                parts.push(format!("memory {pct:.0}% used"));
            }
            if let Some(gb) = sys.mem_available_gb {
                parts.push(format!("{gb:.1} GB free"));
            }
            if let Some(pct) = sys.disk_used_pct {
                parts.push(format!("disk {pct:.0}% used"));
            }
            if let Some(gb) = sys.disk_free_gb {
                parts.push(format!("{gb:.1} GB disk free"));
            }
            if let Some(load) = sys.load_one {
                parts.push(format!("load {load:.2}"));
            }
            if !parts.is_empty() {
                lines.push(format!("System: {}", parts.join(", ")));
            }
        }
        if let Some(ref tools) = self.tools {
            if !tools.is_empty() {
                lines.push(format!("Available tools: {}", tools.join(", ")));
            }
        }
        if let Some(ref history) = self.history {
            if !history.is_empty() {
                lines.push(format!("Recent commands: {}", history.join(" → ")));
            }
        }
        if let Some(ref activity) = self.activity {
            if !activity.is_empty() {
                lines.push(format!("Recent activity: {}", activity.join(", ")));
            }
        }
        if let Some(ok) = self.network_ok {
            lines.push(format!(
                "Network: {}",
                if ok { "reachable" } else { "unreachable" }
            ));
        }

        lines
            .into_iter()
            .map(|l| clamp(&l, field_budget))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn clamp(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

/// Assembles snapshots with per-collector time budgets.
pub struct SnapshotAssembler {
    collector_budget: Duration,
    history_limit: usize,
}

impl SnapshotAssembler {
    pub fn new(config: &Config) -> Self {
        Self {
            collector_budget: config.limits.collector_timeout(),
            history_limit: config.limits.max_history,
        }
    }

    /// Assemble a snapshot for the current working directory.
    pub async fn assemble(&self) -> ContextSnapshot {
        match std::env::current_dir() {
            Ok(dir) => self.assemble_at(&dir).await,
            Err(_) => self.assemble_at(Path::new(".")).await,
        }
    }

    /// Assemble a snapshot rooted at `dir`. Collectors run concurrently;
    /// each failure or timeout leaves its field absent.
    pub async fn assemble_at(&self, dir: &Path) -> ContextSnapshot {
        let budget = self.collector_budget;

        let (git, system, network_ok) = tokio::join!(
            timeout(budget, collect_git(dir)),
            timeout(budget, collect_system(dir)),
            timeout(budget, probe_network()),
        );

        let tools = detect_tools();
        let history = read_history(self.history_limit);
        let activity = history
            .as_deref()
            .map(categorize_commands)
            .filter(|a| !a.is_empty());

        ContextSnapshot {
            working_dir: Some(dir.to_string_lossy().into_owned()),
            directory: summarize_directory(dir),
            git: git.ok().flatten(),
            system: system.ok().flatten(),
            tools: (!tools.is_empty()).then_some(tools),
            history,
            activity,
            network_ok: network_ok.ok().flatten(),
        }
    }
}

/// Command categories, used to summarize what the operator has been doing.
const COMMAND_CATEGORIES: &[(&str, &[&str])] = &[
    ("development", &["git", "cargo", "npm", "yarn", "pip", "python", "node", "make", "gcc", "go"]),
    ("containers", &["docker", "docker-compose", "kubectl", "podman"]),
    ("system administration", &["systemctl", "service", "chmod", "chown", "mount", "sudo"]),
    ("networking", &["curl", "wget", "ping", "ssh", "scp", "rsync", "netstat", "ss"]),
    ("file management", &["ls", "cd", "cp", "mv", "rm", "find", "grep", "mkdir"]),
];

/// Categorize recent commands by leading token, most frequent first.
pub fn categorize_commands(commands: &[String]) -> Vec<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for command in commands {
        let Some(token) = command.split_whitespace().next() else {
            continue;
        };
        for (category, keywords) in COMMAND_CATEGORIES {
            if keywords.contains(&token) {
                match counts.iter_mut().find(|(name, _)| name == category) {
                    Some(entry) => entry.1 += 1,
                    None => counts.push((*category, 1)),
                }
                break;
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .into_iter()
        .take(3)
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Project-type indicators, checked in order; first hit wins.
const PROJECT_INDICATORS: &[(&str, &[&str])] = &[
    ("rust", &["Cargo.toml"]),
    ("node", &["package.json"]),
    ("python", &["pyproject.toml", "requirements.txt", "setup.py"]),
    ("go", &["go.mod"]),
    ("docker", &["Dockerfile", "docker-compose.yml"]),
    ("web", &["index.html"]),
];

/// Count directory entries and detect the project type from key files.
pub fn summarize_directory(dir: &Path) -> Option<DirectorySummary> {
    let entries = std::fs::read_dir(dir).ok()?;
    let names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();

    let mut project_type = None;
    let mut key_files = Vec::new();
    for (kind, indicators) in PROJECT_INDICATORS {
        let found: Vec<String> = indicators
            .iter()
            .filter(|i| names.iter().any(|n| n == *i))
            .map(|i| i.to_string())
            .collect();
        if !found.is_empty() {
            project_type = Some(kind.to_string());
            key_files = found;
            break;
        }
    }

    Some(DirectorySummary {
        file_count: names.len(),
        project_type,
        key_files,
    })
}

async fn git_output(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .kill_on_drop(true)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Repository status: branch, change count, recent commits.
/// `None` when `dir` is not inside a work tree or git is unavailable.
pub async fn collect_git(dir: &Path) -> Option<GitSummary> {
    git_output(dir, &["rev-parse", "--is-inside-work-tree"]).await?;

    let branch = git_output(dir, &["branch", "--show-current"])
        .await
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| "detached".to_string());

    let changed_files = git_output(dir, &["status", "--porcelain"])
        .await
        .map(|s| s.lines().count())
        .unwrap_or(0);

    let recent_commits = git_output(dir, &["log", "--oneline", "-3"])
        .await
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default();

    Some(GitSummary {
        branch,
        changed_files,
        recent_commits,
    })
}

/// Memory and load from /proc, disk from one `df` call. Partial data is
/// fine; `None` only when nothing could be read.
pub async fn collect_system(dir: &Path) -> Option<SystemSummary> {
    let mut summary = SystemSummary::default();

    if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
        let field = |name: &str| -> Option<u64> {
            meminfo
                .lines()
                .find(|l| l.starts_with(name))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|v| v.parse().ok())
        };
        if let (Some(total), Some(available)) = (field("MemTotal"), field("MemAvailable")) {
            if total > 0 {
                summary.mem_used_pct = Some((total - available) as f32 / total as f32 * 100.0);
                summary.mem_available_gb = Some(available as f32 / (1024.0 * 1024.0));
            }
        }
    }

    if let Ok(loadavg) = std::fs::read_to_string("/proc/loadavg") {
        summary.load_one = loadavg.split_whitespace().next().and_then(|v| v.parse().ok());
    }

    if let Ok(output) = Command::new("df")
        .args(["-Pk", "."])
        .current_dir(dir)
        .kill_on_drop(true)
        .output()
        .await
    {
        if output.status.success() {
            let text = String::from_utf8_lossy(&output.stdout);
            if let Some(line) = text.lines().nth(1) {
                let fields: Vec<&str> = line.split_whitespace().collect();
                // Filesystem 1024-blocks Used Available Capacity Mounted
                if fields.len() >= 5 {
                    summary.disk_free_gb = fields[3]
                        .parse::<f32>()
                        .ok()
                        .map(|kb| kb / (1024.0 * 1024.0));
                    summary.disk_used_pct = fields[4].trim_end_matches('%').parse().ok();
                }
            }
        }
    }

    let empty = summary.mem_used_pct.is_none()
        && summary.disk_used_pct.is_none()
        && summary.load_one.is_none();
    (!empty).then_some(summary)
}

/// Tools the diagnosis may reasonably suggest; presence checked by PATH scan.
const INTERESTING_TOOLS: &[&str] = &[
    "git", "docker", "node", "npm", "python3", "pip", "cargo", "make", "curl", "wget",
];

pub fn detect_tools() -> Vec<String> {
    let Some(path_var) = std::env::var_os("PATH") else {
        return Vec::new();
    };
    let dirs: Vec<PathBuf> = std::env::split_paths(&path_var).collect();
    INTERESTING_TOOLS
        .iter()
        .filter(|tool| dirs.iter().any(|d| d.join(tool).is_file()))
        .map(|t| t.to_string())
        .collect()
}

/// Tail of the shell history file. Understands the zsh extended format
/// (`: <epoch>:<dur>;cmd`). Never writes.
pub fn read_history(limit: usize) -> Option<Vec<String>> {
    let path = history_path()?;
    let contents = std::fs::read_to_string(path).ok()?;

    let commands: Vec<String> = contents
        .lines()
        .filter_map(parse_history_line)
        .filter(|c| !c.is_empty())
        .collect();

    if commands.is_empty() {
        return None;
    }
    let start = commands.len().saturating_sub(limit);
    Some(commands[start..].to_vec())
}

fn history_path() -> Option<PathBuf> {
    if let Some(histfile) = std::env::var_os("HISTFILE") {
        let path = PathBuf::from(histfile);
        if path.exists() {
            return Some(path);
        }
    }
    let home = dirs::home_dir()?;
    for name in [".zsh_history", ".bash_history"] {
        let path = home.join(name);
        if path.exists() {
            return Some(path);
        }
    }
    None
}

fn parse_history_line(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    // zsh extended history: ": 1700000000:0;command"
    if let Some(rest) = trimmed.strip_prefix(": ") {
        return rest.split_once(';').map(|(_, cmd)| cmd.trim().to_string());
    }
    Some(trimmed.to_string())
}

/// One TCP dial to a public resolver decides reachability. Bounded by the
/// caller's collector budget on top of its own short timeout.
pub async fn probe_network() -> Option<bool> {
    let connect = tokio::net::TcpStream::connect("1.1.1.1:53");
    match timeout(Duration::from_secs(1), connect).await {
        Ok(Ok(_)) => Some(true),
        Ok(Err(_)) | Err(_) => Some(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_directory_detects_rust_project() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();

        let summary = summarize_directory(dir.path()).unwrap();
        assert_eq!(summary.file_count, 2);
        assert_eq!(summary.project_type.as_deref(), Some("rust"));
        assert_eq!(summary.key_files, vec!["Cargo.toml"]);
    }

    #[test]
    fn test_summarize_directory_unknown_project() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hi").unwrap();

        let summary = summarize_directory(dir.path()).unwrap();
        assert_eq!(summary.project_type, None);
        assert!(summary.key_files.is_empty());
    }

    #[test]
    fn test_summarize_directory_missing_dir() {
        assert!(summarize_directory(Path::new("/nonexistent/oops")).is_none());
    }

    #[tokio::test]
    async fn test_collect_git_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_git(dir.path()).await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_survives_missing_git_repo() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();

        let config = Config::default();
        let snapshot = SnapshotAssembler::new(&config).assemble_at(dir.path()).await;

        // VCS field absent, the rest present
        assert!(snapshot.git.is_none());
        assert!(snapshot.working_dir.is_some());
        let directory = snapshot.directory.unwrap();
        assert_eq!(directory.project_type.as_deref(), Some("node"));
    }

    #[test]
    fn test_render_stable_order_and_omission() {
        let snapshot = ContextSnapshot {
            working_dir: Some("/home/user/project".to_string()),
            git: Some(GitSummary {
                branch: "main".to_string(),
                changed_files: 2,
                recent_commits: vec!["abc123 fix parser".to_string()],
            }),
            network_ok: Some(false),
            ..Default::default()
        };

        let rendered = snapshot.render(1024);
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[0].starts_with("Working directory:"));
        assert!(lines[1].starts_with("Git: branch main"));
        assert!(rendered.contains("2 changed files"));
        assert!(rendered.ends_with("Network: unreachable"));
        assert!(!rendered.contains("System:"));
    }

    #[test]
    fn test_render_clamps_long_fields() {
        let snapshot = ContextSnapshot {
            working_dir: Some("x".repeat(500)),
            ..Default::default()
        };
        let rendered = snapshot.render(64);
        let first = rendered.lines().next().unwrap();
        assert!(first.len() <= 64 + '…'.len_utf8());
    }

    #[test]
    fn test_parse_history_line_formats() {
        assert_eq!(parse_history_line("ls -la").as_deref(), Some("ls -la"));
        assert_eq!(
            parse_history_line(": 1700000000:0;cargo build").as_deref(),
            Some("cargo build")
        );
        assert_eq!(parse_history_line("# comment"), None);
        assert_eq!(parse_history_line("   "), None);
    }

    #[test]
    fn test_clamp_respects_char_boundaries() {
        let text = "héllo wörld with ünïcode";
        let clamped = clamp(text, 10);
        // Must not panic and must stay within budget plus the marker
        assert!(clamped.len() <= 10 + '…'.len_utf8());
    }

    #[test]
    fn test_categorize_commands_most_frequent_first() {
        let commands: Vec<String> = [
            "git status",
            "git push",
            "cargo build",
            "docker ps",
            "ls -la",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let activity = categorize_commands(&commands);
        assert_eq!(activity[0], "development");
        assert!(activity.contains(&"containers".to_string()));
        assert!(activity.len() <= 3);
    }

    #[test]
    fn test_categorize_commands_unknown_tokens_ignored() {
        let commands: Vec<String> = vec!["frobnicate --all".to_string()];
        assert!(categorize_commands(&commands).is_empty());
    }

    #[test]
    fn test_render_includes_activity() {
        let snapshot = ContextSnapshot {
            activity: Some(vec!["development".to_string(), "networking".to_string()]),
            ..Default::default()
        };
        assert_eq!(
            snapshot.render(1024),
            "Recent activity: development, networking"
        );
    }

    #[test]
    fn test_empty_snapshot_reports_empty() {
        assert!(ContextSnapshot::default().is_empty());
        let with_field = ContextSnapshot {
            network_ok: Some(true),
            ..Default::default()
        };
        assert!(!with_field.is_empty());
    }
}
