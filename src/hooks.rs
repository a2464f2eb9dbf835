//! Shell hook integration for automatic failure diagnosis.
//!
//! The generated scripts do four things: export a session id so every
//! invocation agrees on scratch paths, tee the shell's stderr into a
//! per-session capture file, define an `oops_wrap` function for exact
//! per-command capture, and invoke `oops` in the background after each
//! failed command with the captured stderr shipped base64-encoded.

use anyhow::{Context, Result};
use clap_complete::Shell;
use colored::Colorize;
use std::path::{Path, PathBuf};

/// State directory for hook settings
fn get_state_dir() -> Option<PathBuf> {
    // XDG_STATE_HOME or fallback to ~/.local/state
    if let Ok(state_home) = std::env::var("XDG_STATE_HOME") {
        Some(PathBuf::from(state_home).join("oops"))
    } else {
        dirs::home_dir().map(|h| h.join(".local").join("state").join("oops"))
    }
}

/// Path to the hook enabled state file
fn get_hook_state_path() -> Option<PathBuf> {
    get_state_dir().map(|d| d.join("hook_enabled"))
}

/// Check if hooks are enabled
pub fn is_hook_enabled() -> bool {
    // Environment variable takes precedence
    if std::env::var("OOPS_HOOK_DISABLE")
        .map(|v| v == "1")
        .unwrap_or(false)
    {
        return false;
    }

    // Check state file (default: enabled)
    if let Some(state_path) = get_hook_state_path() {
        if state_path.exists() {
            return std::fs::read_to_string(state_path)
                .map(|s| s.trim() != "0")
                .unwrap_or(true);
        }
    }

    true
}

fn write_hook_state(value: &str) -> Result<PathBuf> {
    let state_dir =
        get_state_dir().ok_or_else(|| anyhow::anyhow!("Could not determine state directory"))?;

    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create state directory: {}", state_dir.display()))?;

    let state_path = state_dir.join("hook_enabled");
    std::fs::write(&state_path, value)
        .with_context(|| format!("Failed to write state file: {}", state_path.display()))?;
    Ok(state_path)
}

/// Enable hook functionality
pub fn enable_hook() -> Result<()> {
    write_hook_state("1\n")?;

    println!("{} Shell hook enabled", "✓".green());
    println!();
    println!("  Failed commands will now be diagnosed automatically.");
    println!(
        "  To disable temporarily: {}",
        "export OOPS_HOOK_DISABLE=1".cyan()
    );
    println!();

    Ok(())
}

/// Disable hook functionality
pub fn disable_hook() -> Result<()> {
    write_hook_state("0\n")?;

    println!("{} Shell hook disabled", "✓".green());
    println!();
    println!("  Failed commands will no longer be diagnosed.");
    println!("  To re-enable: {}", "oops --enable".cyan());
    println!();

    Ok(())
}

/// Print hook status
pub fn print_hook_status() {
    let enabled = is_hook_enabled();
    let env_disabled = std::env::var("OOPS_HOOK_DISABLE")
        .map(|v| v == "1")
        .unwrap_or(false);

    println!("{}", "Shell Hook Status".bold());
    println!();

    if enabled {
        println!("  {} {}", "Status:".blue().bold(), "Enabled".green().bold());
    } else {
        println!("  {} {}", "Status:".blue().bold(), "Disabled".red().bold());
    }

    if env_disabled {
        println!(
            "  {} {} (OOPS_HOOK_DISABLE=1)",
            "Env override:".blue().bold(),
            "Disabled".red()
        );
    }

    println!();
    println!("{}", "Installation Status".bold());
    println!();

    for shell in [Shell::Bash, Shell::Zsh, Shell::Fish] {
        if let Some(config_path) = get_shell_config_path(shell) {
            let installed = hooks_already_installed(&config_path);
            let status = if installed {
                "Installed".green().to_string()
            } else {
                "Not installed".dimmed().to_string()
            };
            println!(
                "  {:<12} {} ({})",
                format!("{:?}:", shell),
                status,
                config_path.display()
            );
        }
    }

    println!();
    println!("{}", "Commands".bold());
    println!();
    println!("  {} - Enable hook", "oops --enable".cyan());
    println!("  {} - Disable hook", "oops --disable".cyan());
    println!(
        "  {} - Install hook for shell",
        "oops --hook-install <shell>".cyan()
    );
    println!(
        "  {} - Uninstall hook from shell",
        "oops --hook-uninstall <shell>".cyan()
    );
    println!();
}

/// Marker comment for detecting existing hook installations
pub const HOOK_MARKER_START: &str = "# >>> oops shell hook >>>";
pub const HOOK_MARKER_END: &str = "# <<< oops shell hook <<<";

/// Get the shell config file path for a given shell
pub fn get_shell_config_path(shell: Shell) -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    match shell {
        Shell::Bash => Some(home.join(".bashrc")),
        Shell::Zsh => Some(home.join(".zshrc")),
        Shell::Fish => dirs::config_dir().map(|p| p.join("fish").join("conf.d").join("oops.fish")),
        _ => None,
    }
}

/// Generate the hook script for a given shell
pub fn generate_hook_script(shell: Shell) -> &'static str {
    match shell {
        Shell::Bash => {
            r#"# oops shell hook - captures failed commands for diagnosis
export OOPS_SESSION="${OOPS_SESSION:-$$}"
__oops_stderr_file="${TMPDIR:-/tmp}/oops_stderr_${OOPS_SESSION}"
__oops_wrap_file="${TMPDIR:-/tmp}/oops_wrap_${OOPS_SESSION}"
__oops_last_cmd=""

# Capture stderr while still displaying it
exec 2> >(tee -a "$__oops_stderr_file" >&2)

# Exact per-command capture: oops_wrap <command...>
oops_wrap() {
    : > "$__oops_wrap_file" 2>/dev/null
    "$@" 2> >(tee "$__oops_wrap_file" >&2)
}

__oops_preexec() {
    __oops_last_cmd="$1"
    # Clear capture files before each command
    : > "$__oops_stderr_file" 2>/dev/null
}

__oops_prompt_command() {
    local exit_code=$?
    if [[ $exit_code -ne 0 && $exit_code -ne 130 && -n "$__oops_last_cmd" ]]; then
        local encoded=""
        if [[ -f "$__oops_stderr_file" && -s "$__oops_stderr_file" ]]; then
            encoded=$(tail -c 65536 "$__oops_stderr_file" 2>/dev/null | base64 2>/dev/null | tr -d '\n')
        fi
        # Background the diagnosis so the prompt returns immediately
        (oops --exit-code "$exit_code" --last-command "$__oops_last_cmd" --last-output "$encoded" 2>/dev/null &)
    fi
    __oops_last_cmd=""
}

trap '__oops_preexec "$BASH_COMMAND"' DEBUG
PROMPT_COMMAND="__oops_prompt_command${PROMPT_COMMAND:+;$PROMPT_COMMAND}"

# Cleanup on exit
trap 'rm -f "$__oops_stderr_file" "$__oops_wrap_file" "${TMPDIR:-/tmp}/oops_dedup_${OOPS_SESSION}" 2>/dev/null' EXIT
"#
        }
        Shell::Zsh => {
            r#"# oops shell hook - captures failed commands for diagnosis
export OOPS_SESSION="${OOPS_SESSION:-$$}"
__oops_stderr_file="${TMPDIR:-/tmp}/oops_stderr_${OOPS_SESSION}"
__oops_wrap_file="${TMPDIR:-/tmp}/oops_wrap_${OOPS_SESSION}"
__oops_last_cmd=""

# Capture stderr while still displaying it
exec 2> >(tee -a "$__oops_stderr_file" >&2)

# Exact per-command capture: oops_wrap <command...>
oops_wrap() {
    : > "$__oops_wrap_file" 2>/dev/null
    "$@" 2> >(tee "$__oops_wrap_file" >&2)
}

__oops_preexec() {
    __oops_last_cmd="$1"
    # Clear capture files before each command
    : > "$__oops_stderr_file" 2>/dev/null
}

__oops_precmd() {
    local exit_code=$?
    if [[ $exit_code -ne 0 && $exit_code -ne 130 && -n "$__oops_last_cmd" ]]; then
        local encoded=""
        if [[ -f "$__oops_stderr_file" && -s "$__oops_stderr_file" ]]; then
            encoded=$(tail -c 65536 "$__oops_stderr_file" 2>/dev/null | base64 2>/dev/null | tr -d '\n')
        fi
        # Background the diagnosis so the prompt returns immediately
        (oops --exit-code "$exit_code" --last-command "$__oops_last_cmd" --last-output "$encoded" 2>/dev/null &)
    fi
    __oops_last_cmd=""
}

autoload -Uz add-zsh-hook
add-zsh-hook preexec __oops_preexec
add-zsh-hook precmd __oops_precmd

# Cleanup on exit
trap 'rm -f "$__oops_stderr_file" "$__oops_wrap_file" "${TMPDIR:-/tmp}/oops_dedup_${OOPS_SESSION}" 2>/dev/null' EXIT
"#
        }
        Shell::Fish => {
            r#"# oops shell hook - captures failed commands for diagnosis
set -gx OOPS_SESSION (echo %self)
set -g __oops_stderr_file "/tmp/oops_stderr_$OOPS_SESSION"

function __oops_preexec --on-event fish_preexec
    # Clear the capture file before each command
    echo -n > $__oops_stderr_file 2>/dev/null
end

function __oops_postexec --on-event fish_postexec
    set -l exit_code $status
    if test $exit_code -ne 0 -a $exit_code -ne 130
        set -l encoded ""
        if test -f $__oops_stderr_file -a -s $__oops_stderr_file
            set encoded (tail -c 65536 $__oops_stderr_file 2>/dev/null | base64 2>/dev/null | tr -d '\n')
        end
        # Background the diagnosis so the prompt returns immediately
        oops --exit-code $exit_code --last-command "$argv" --last-output "$encoded" 2>/dev/null &
        disown 2>/dev/null
    end
end

# Cleanup on exit
function __oops_cleanup --on-event fish_exit
    rm -f $__oops_stderr_file "/tmp/oops_wrap_$OOPS_SESSION" "/tmp/oops_dedup_$OOPS_SESSION" 2>/dev/null
end
"#
        }
        _ => "",
    }
}

/// Generate the hook code wrapped with markers
pub fn generate_hook_with_markers(shell: Shell) -> String {
    let mut output = String::new();
    output.push_str(HOOK_MARKER_START);
    output.push('\n');
    output.push_str(generate_hook_script(shell));
    output.push_str(HOOK_MARKER_END);
    output.push('\n');
    output
}

/// Check if hooks are already installed in a config file
pub fn hooks_already_installed(config_path: &Path) -> bool {
    if let Ok(contents) = std::fs::read_to_string(config_path) {
        contents.contains(HOOK_MARKER_START)
    } else {
        false
    }
}

/// Install hook integration into shell config file
pub fn install_hook(shell: Shell) -> Result<()> {
    let config_path = get_shell_config_path(shell)
        .ok_or_else(|| anyhow::anyhow!("Could not determine config path for {}", shell))?;

    if hooks_already_installed(&config_path) {
        println!(
            "{} oops hooks are already installed in {}",
            "✓".green(),
            config_path.display()
        );
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut content = std::fs::read_to_string(&config_path).unwrap_or_default();

    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push('\n');

    content.push_str(&generate_hook_with_markers(shell));

    std::fs::write(&config_path, content)
        .with_context(|| format!("Failed to write to: {}", config_path.display()))?;

    println!(
        "{} {}",
        "✓".green(),
        "oops shell hook installed successfully!".green().bold()
    );
    println!();
    println!(
        "  {} {}",
        "Config file:".blue().bold(),
        config_path.display()
    );
    println!();
    println!("  {} To activate, run:", "Next steps:".yellow().bold());
    match shell {
        Shell::Bash => println!("    source ~/.bashrc"),
        Shell::Zsh => println!("    source ~/.zshrc"),
        Shell::Fish => println!("    source {}", config_path.display()),
        _ => {}
    }
    println!();
    println!("  Or open a new terminal session.");
    println!();

    Ok(())
}

/// Uninstall hook integration from shell config file
pub fn uninstall_hook(shell: Shell) -> Result<()> {
    let config_path = get_shell_config_path(shell)
        .ok_or_else(|| anyhow::anyhow!("Could not determine config path for {}", shell))?;

    if !config_path.exists() {
        println!(
            "{} Config file does not exist: {}",
            "?".yellow(),
            config_path.display()
        );
        return Ok(());
    }

    if !hooks_already_installed(&config_path) {
        println!(
            "{} oops hooks are not installed in {}",
            "?".yellow(),
            config_path.display()
        );
        return Ok(());
    }

    let content = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read: {}", config_path.display()))?;

    let mut new_content = String::new();
    let mut in_hook_block = false;

    for line in content.lines() {
        if line.trim() == HOOK_MARKER_START {
            in_hook_block = true;
            continue;
        }
        if line.trim() == HOOK_MARKER_END {
            in_hook_block = false;
            continue;
        }
        if !in_hook_block {
            new_content.push_str(line);
            new_content.push('\n');
        }
    }

    while new_content.ends_with("\n\n\n") {
        new_content.pop();
    }

    std::fs::write(&config_path, new_content)
        .with_context(|| format!("Failed to write to: {}", config_path.display()))?;

    println!(
        "{} {}",
        "✓".green(),
        "oops shell hook uninstalled successfully!".green().bold()
    );
    println!();
    println!(
        "  {} {}",
        "Config file:".blue().bold(),
        config_path.display()
    );
    println!();
    println!("  Restart your terminal or source the config file to apply changes.");
    println!();

    Ok(())
}

/// Print the hook script to stdout
pub fn print_hook_script(shell: Shell) {
    print!("{}", generate_hook_with_markers(shell));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_scripts_exist_for_supported_shells() {
        for shell in [Shell::Bash, Shell::Zsh, Shell::Fish] {
            let script = generate_hook_script(shell);
            assert!(!script.is_empty(), "no script for {shell:?}");
        }
        assert!(generate_hook_script(Shell::PowerShell).is_empty());
    }

    #[test]
    fn test_bash_hook_shape() {
        let script = generate_hook_script(Shell::Bash);
        // Session id export so scratch paths agree across invocations
        assert!(script.contains("export OOPS_SESSION"));
        // Interrupt exit code is never diagnosed
        assert!(script.contains("-ne 130"));
        // Captured stderr is shipped base64-encoded
        assert!(script.contains("base64"));
        // The invocation is backgrounded so the prompt is never blocked
        assert!(script.contains("&)"));
        // Scratch artifacts are removed on exit
        assert!(script.contains("trap 'rm -f"));
    }

    #[test]
    fn test_zsh_hook_uses_native_hooks() {
        let script = generate_hook_script(Shell::Zsh);
        assert!(script.contains("add-zsh-hook preexec"));
        assert!(script.contains("add-zsh-hook precmd"));
    }

    #[test]
    fn test_markers_wrap_script() {
        let wrapped = generate_hook_with_markers(Shell::Bash);
        assert!(wrapped.starts_with(HOOK_MARKER_START));
        assert!(wrapped.trim_end().ends_with(HOOK_MARKER_END));
    }

    #[test]
    fn test_hooks_already_installed_detection() {
        let dir = tempfile::tempdir().unwrap();
        let rc = dir.path().join("bashrc");

        std::fs::write(&rc, "export PATH=$PATH\n").unwrap();
        assert!(!hooks_already_installed(&rc));

        let mut content = std::fs::read_to_string(&rc).unwrap();
        content.push_str(&generate_hook_with_markers(Shell::Bash));
        std::fs::write(&rc, content).unwrap();
        assert!(hooks_already_installed(&rc));
    }

    #[test]
    fn test_uninstall_block_removal() {
        // Mirror of uninstall_hook's line filter
        let original = "alias ll='ls -la'\n";
        let mut content = original.to_string();
        content.push_str(&generate_hook_with_markers(Shell::Bash));

        let mut result = String::new();
        let mut in_block = false;
        for line in content.lines() {
            if line.trim() == HOOK_MARKER_START {
                in_block = true;
                continue;
            }
            if line.trim() == HOOK_MARKER_END {
                in_block = false;
                continue;
            }
            if !in_block {
                result.push_str(line);
                result.push('\n');
            }
        }

        assert_eq!(result, original);
    }
}
