//! Configuration system for the `oops` tool.

use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::providers::ProviderFamily;

/// Configuration for the AI backend
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProviderConfig {
    /// Backend family (openai-compatible, ollama, anthropic)
    pub family: ProviderFamily,
    /// Endpoint override (defaults to the family's public endpoint)
    pub base_url: Option<String>,
    /// Model identifier
    pub model: String,
    /// API key written directly into the config file
    pub api_key: Option<String>,
    /// Environment variable to read the API key from instead
    pub api_key_env: Option<String>,
    /// Network timeout per request, in seconds
    pub timeout_secs: u64,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature (backend default when unset)
    pub temperature: Option<f32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            family: ProviderFamily::OpenAi,
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_key_env: None,
            timeout_secs: 30,
            max_tokens: 512,
            temperature: None,
        }
    }
}

impl ProviderConfig {
    /// Resolve the credential: inline key, then the configured env var,
    /// then the family's conventional env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        let env_var = self
            .api_key_env
            .clone()
            .unwrap_or_else(|| self.family.default_key_env().to_string());
        if env_var.is_empty() {
            return None;
        }
        env::var(env_var).ok().filter(|s| !s.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Configuration for hook behavior
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HookConfig {
    /// Exit codes that never trigger a diagnosis (0 = success, 130 = Ctrl+C)
    pub skip_exit_codes: Vec<i32>,
    /// Command patterns to ignore
    pub ignore_commands: IgnoreCommandsConfig,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            skip_exit_codes: vec![0, 130],
            ignore_commands: IgnoreCommandsConfig::default(),
        }
    }
}

/// Command patterns to ignore
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IgnoreCommandsConfig {
    /// Regex patterns for commands to ignore
    pub patterns: Vec<String>,
}

impl Default for IgnoreCommandsConfig {
    fn default() -> Self {
        Self {
            patterns: vec![
                "^cd ".to_string(),
                "^pwd$".to_string(),
                "^clear$".to_string(),
                "^exit".to_string(),
                "^history".to_string(),
            ],
        }
    }
}

/// Configuration for duplicate-failure suppression
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DedupConfig {
    /// Window within which an identical failure is not re-analyzed, in seconds
    pub window_secs: u64,
    /// Entries older than `prune_factor` windows are swept on insert
    pub prune_factor: u32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            prune_factor: 5,
        }
    }
}

impl DedupConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Size and time budgets for capture and snapshot assembly
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    /// Error text budget; the tail is kept when truncating
    pub max_error_bytes: usize,
    /// Budget for each rendered snapshot field
    pub max_field_bytes: usize,
    /// Recent history entries included in the snapshot
    pub max_history: usize,
    /// Per-collector time budget, in milliseconds
    pub collector_timeout_ms: u64,
    /// Re-execution probe time budget, in seconds
    pub probe_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_error_bytes: 4096,
            max_field_bytes: 1024,
            max_history: 10,
            collector_timeout_ms: 1500,
            probe_timeout_secs: 5,
        }
    }
}

impl LimitsConfig {
    pub fn collector_timeout(&self) -> Duration {
        Duration::from_millis(self.collector_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub hook: HookConfig,
    pub dedup: DedupConfig,
    pub limits: LimitsConfig,
}

impl Config {
    /// Load config from file, returning default config if file doesn't exist
    pub fn load() -> Self {
        Self::load_from_path(Self::config_path())
    }

    /// Load config from a specific path
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        std::fs::read_to_string(&path)
            .ok()
            .and_then(|contents| toml::from_str(&contents).ok())
            .unwrap_or_default()
    }

    /// Get the config file path (~/.config/oops/config.toml)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("oops").join("config.toml"))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(family) = env::var("OOPS_PROVIDER") {
            if let Ok(parsed) = family.parse() {
                self.provider.family = parsed;
            }
        }
        if let Ok(model) = env::var("OOPS_MODEL") {
            if !model.is_empty() {
                self.provider.model = model;
            }
        }
    }

    /// Check if a command matches any ignore patterns
    pub fn should_ignore_command(&self, command: &str) -> bool {
        for pattern in &self.hook.ignore_commands.patterns {
            if let Ok(re) = Regex::new(pattern) {
                if re.is_match(command) {
                    return true;
                }
            }
        }
        false
    }

    /// Check if an exit code should be skipped
    pub fn should_skip_exit_code(&self, code: i32) -> bool {
        self.hook.skip_exit_codes.contains(&code)
    }
}

/// Generate default config as TOML string
pub fn generate_default_config() -> String {
    r#"# oops - shell failure diagnosis configuration
# Place this file at ~/.config/oops/config.toml

[provider]
# Backend family: "openai" (any OpenAI-compatible endpoint), "ollama", "anthropic"
family = "openai"

# Endpoint override; defaults to the family's public endpoint
# base_url = "https://api.openai.com/v1/chat/completions"

model = "gpt-4o-mini"

# Credential: set inline, or name an environment variable.
# When both are unset, the family's conventional variable is consulted
# (OPENAI_API_KEY / ANTHROPIC_API_KEY; ollama needs none).
# api_key = ""
# api_key_env = "OPENAI_API_KEY"

timeout_secs = 30
max_tokens = 512
# temperature = 0.7

[hook]
# Exit codes to skip (0 = success, 130 = Ctrl+C)
skip_exit_codes = [0, 130]

[hook.ignore_commands]
# Regex patterns for commands that never trigger a diagnosis
patterns = [
    "^cd ",
    "^pwd$",
    "^clear$",
    "^exit",
    "^history",
]

[dedup]
# Identical failures within this window are analyzed once
window_secs = 60
prune_factor = 5

[limits]
# Error text budget; the tail is kept when truncating
max_error_bytes = 4096
max_field_bytes = 1024
max_history = 10
collector_timeout_ms = 1500
probe_timeout_secs = 5

# Environment variable overrides:
# OOPS_PROVIDER=ollama   - select backend family
# OOPS_MODEL=llama3      - select model
# OOPS_HOOK_DISABLE=1    - temporarily disable hook diagnoses
# OOPS_LOG=debug         - enable diagnostic logging to stderr
"#
    .to_string()
}

/// Print the default config to stdout
pub fn print_hook_config() {
    print!("{}", generate_default_config());
}
