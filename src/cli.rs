//! Command-line interface definitions for the `oops` tool.

use clap::Parser;
use clap_complete::Shell;

use crate::providers::ProviderFamily;

/// Shell companion that notices failed commands and asks an AI backend why
#[derive(Parser, Debug)]
#[command(
    name = "oops",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("OOPS_GIT_SHA"), ")"),
    about,
    long_about = None
)]
#[command(
    after_help = "EXAMPLES:\n    oops --run -- npm run build\n    oops --ask \"why is my disk full?\"\n    oops --hook-install bash"
)]
pub struct Cli {
    /// Command to run (after `--run --`) or question to ask (with --ask)
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,

    /// Run a command, then diagnose it if it fails: oops --run -- <cmd...>
    #[arg(long, short = 'r')]
    pub run: bool,

    /// Ask a question against the current environment
    #[arg(long, short = 'a')]
    pub ask: bool,

    /// Bypass duplicate-failure suppression (with run)
    #[arg(long, short = 'f')]
    pub force: bool,

    /// Output as JSON
    #[arg(long, short = 'j')]
    pub json: bool,

    /// Quiet mode - suppress failure notices
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Override the configured backend family
    #[arg(long, value_enum, value_name = "FAMILY")]
    pub provider: Option<ProviderFamily>,

    /// Override the configured model
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Exit code of the failed command (used by shell hooks)
    #[arg(long, value_name = "CODE")]
    pub exit_code: Option<i32>,

    /// The command that failed (used by shell hooks)
    #[arg(long, value_name = "CMD")]
    pub last_command: Option<String>,

    /// Base64-encoded stderr of the failed command (used by shell hooks)
    #[arg(long, value_name = "B64")]
    pub last_output: Option<String>,

    /// Print the hook script for the given shell
    #[arg(long, value_enum, value_name = "SHELL")]
    pub hook: Option<Shell>,

    /// Install hook integration into shell config file
    #[arg(long, value_enum, value_name = "SHELL")]
    pub hook_install: Option<Shell>,

    /// Uninstall hook integration from shell config file
    #[arg(long, value_enum, value_name = "SHELL")]
    pub hook_uninstall: Option<Shell>,

    /// Enable automatic diagnosis
    #[arg(long)]
    pub enable: bool,

    /// Disable automatic diagnosis
    #[arg(long)]
    pub disable: bool,

    /// Show hook status
    #[arg(long)]
    pub status: bool,

    /// Output the default configuration to stdout
    #[arg(long)]
    pub hook_config: bool,

    /// Show the resolved configuration (credential masked)
    #[arg(long)]
    pub show_config: bool,

    /// Show the context snapshot that would accompany a diagnosis
    #[arg(long)]
    pub context: bool,

    /// Test connectivity to the configured backend
    #[arg(long)]
    pub test: bool,

    /// Generate shell completions
    #[arg(long, value_enum, value_name = "SHELL")]
    pub completions: Option<Shell>,
}

impl Cli {
    /// True when invoked by the shell hook after a failed command
    pub fn is_hook_event(&self) -> bool {
        self.exit_code.is_some() && self.last_command.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_parses_hook_event() {
        let cli = Cli::parse_from([
            "oops",
            "--exit-code",
            "127",
            "--last-command",
            "gti status",
            "--last-output",
            "Z3RpOiBjb21tYW5kIG5vdCBmb3VuZA==",
        ]);
        assert!(cli.is_hook_event());
        assert_eq!(cli.exit_code, Some(127));
        assert_eq!(cli.last_command.as_deref(), Some("gti status"));
        assert!(cli.last_output.is_some());
    }

    #[test]
    fn test_cli_parses_run_mode() {
        let cli = Cli::parse_from(["oops", "--run", "--", "npm", "run", "build"]);
        assert!(cli.run);
        assert_eq!(cli.args, vec!["npm", "run", "build"]);
        assert!(!cli.is_hook_event());
    }

    #[test]
    fn test_cli_parses_run_with_force() {
        let cli = Cli::parse_from(["oops", "-r", "-f", "--", "make"]);
        assert!(cli.run);
        assert!(cli.force);
    }

    #[test]
    fn test_cli_parses_ask() {
        let cli = Cli::parse_from(["oops", "--ask", "how do I check memory usage?"]);
        assert!(cli.ask);
        assert_eq!(cli.args.len(), 1);
    }

    #[test]
    fn test_cli_parses_json_and_quiet_flags() {
        let cli = Cli::parse_from(["oops", "-j", "-q", "--exit-code", "1", "--last-command", "x"]);
        assert!(cli.json);
        assert!(cli.quiet);
    }

    #[test]
    fn test_cli_parses_provider_override() {
        let cli = Cli::parse_from(["oops", "--provider", "ollama", "--model", "llama3", "--test"]);
        assert_eq!(cli.provider, Some(ProviderFamily::Ollama));
        assert_eq!(cli.model.as_deref(), Some("llama3"));
        assert!(cli.test);
    }

    #[test]
    fn test_cli_parses_hook_lifecycle_flags() {
        let cli = Cli::parse_from(["oops", "--hook", "bash"]);
        assert_eq!(cli.hook, Some(Shell::Bash));

        let cli = Cli::parse_from(["oops", "--hook-install", "zsh"]);
        assert_eq!(cli.hook_install, Some(Shell::Zsh));

        let cli = Cli::parse_from(["oops", "--hook-uninstall", "fish"]);
        assert_eq!(cli.hook_uninstall, Some(Shell::Fish));
    }

    #[test]
    fn test_cli_parses_state_flags() {
        assert!(Cli::parse_from(["oops", "--enable"]).enable);
        assert!(Cli::parse_from(["oops", "--disable"]).disable);
        assert!(Cli::parse_from(["oops", "--status"]).status);
        assert!(Cli::parse_from(["oops", "--hook-config"]).hook_config);
        assert!(Cli::parse_from(["oops", "--show-config"]).show_config);
        assert!(Cli::parse_from(["oops", "--context"]).context);
    }

    #[test]
    fn test_cli_parses_completions() {
        let cli = Cli::parse_from(["oops", "--completions", "bash"]);
        assert_eq!(cli.completions, Some(Shell::Bash));
    }

    #[test]
    fn test_cli_hook_event_with_multiline_output() {
        let cli = Cli::parse_from([
            "oops",
            "--exit-code",
            "1",
            "--last-command",
            "cargo build",
        ]);
        assert!(cli.is_hook_event());
        assert!(cli.last_output.is_none());
    }
}
