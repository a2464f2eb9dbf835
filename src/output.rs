//! Response parsing and terminal output formatting.

use colored::Colorize;
use serde::Serialize;

use crate::providers::ProviderError;

/// Parsed diagnosis
#[derive(Debug, Serialize)]
pub struct Diagnosis {
    pub command: String,
    pub cause: String,
    pub fix: String,
    pub next_steps: String,
}

/// Extract section label from a line, handling various formats:
/// - "CAUSE:" or "CAUSE"
/// - "**Cause:**" or "**CAUSE:**"
/// - "Cause:" (case-insensitive)
///
/// Returns (section_name, rest_of_line) if a label is found.
pub fn extract_section_label(line: &str) -> Option<(&'static str, String)> {
    let cleaned = line.trim_start_matches("**").trim_start_matches('*');
    let cleaned_lower = cleaned.to_lowercase();

    for (label, section) in [
        ("cause", "cause"),
        ("fix", "fix"),
        ("next steps", "next"),
        ("next", "next"),
    ] {
        if cleaned_lower.starts_with(label) {
            let after_label = &cleaned[label.len()..];
            let rest = if let Some(stripped) = after_label.strip_prefix(':') {
                stripped.trim_start_matches("**").trim()
            } else if let Some(stripped) = after_label.strip_prefix("**:") {
                stripped.trim()
            } else if after_label.is_empty()
                || after_label.starts_with("**")
                || after_label
                    .chars()
                    .next()
                    .map(|c| c.is_whitespace())
                    .unwrap_or(false)
            {
                after_label.trim_start_matches("**").trim()
            } else {
                continue;
            };
            return Some((section, rest.to_string()));
        }
    }
    None
}

/// Parse the provider's reply into sections. Unlabeled leading text lands in
/// the cause; a reply with no labels at all becomes an unstructured cause.
pub fn parse_diagnosis(command: &str, response: &str) -> Diagnosis {
    let mut cause = String::new();
    let mut fix = String::new();
    let mut next_steps = String::new();
    let mut current_section = "cause";

    for line in response.lines() {
        let line = line.trim();
        if line.starts_with("```") {
            continue;
        }

        if let Some((section, rest)) = extract_section_label(line) {
            current_section = section;
            let target = match section {
                "cause" => &mut cause,
                "fix" => &mut fix,
                "next" => &mut next_steps,
                _ => &mut cause,
            };
            if !rest.is_empty() {
                *target = rest;
            }
        } else if !line.is_empty() {
            let target = match current_section {
                "cause" => &mut cause,
                "fix" => &mut fix,
                "next" => &mut next_steps,
                _ => &mut cause,
            };
            if !target.is_empty() {
                target.push('\n');
            }
            target.push_str(line);
        }
    }

    if cause.is_empty() && fix.is_empty() && next_steps.is_empty() {
        cause = response.trim().to_string();
    }

    Diagnosis {
        command: command.to_string(),
        cause,
        fix,
        next_steps,
    }
}

fn print_section(glyph: &str, title: colored::ColoredString, body: &str) {
    println!("{glyph} {title}");
    for raw_line in body.lines() {
        let trimmed = raw_line.trim();
        if trimmed.starts_with('`') && trimmed.ends_with('`') && trimmed.len() > 2 {
            println!("  {}", trimmed.trim_matches('`').green());
        } else {
            for line in textwrap::wrap(raw_line, 76) {
                println!("  {line}");
            }
        }
    }
    println!();
}

pub fn print_colored(diagnosis: &Diagnosis) {
    println!();
    if !diagnosis.command.is_empty() {
        println!("{} {}", "●".red(), diagnosis.command.bold());
        println!();
    }

    if !diagnosis.cause.is_empty() {
        print_section("▸", "Cause".blue().bold(), &diagnosis.cause);
    }
    if !diagnosis.fix.is_empty() {
        print_section("▸", "Fix".green().bold(), &diagnosis.fix);
    }
    if !diagnosis.next_steps.is_empty() {
        print_section("▸", "Next".magenta().bold(), &diagnosis.next_steps);
    }
}

pub fn print_json(diagnosis: &Diagnosis) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(diagnosis)?);
    Ok(())
}

/// One-line degraded notice for provider failures. Silent in quiet mode.
pub fn print_failure_notice(err: &ProviderError, quiet: bool) {
    if quiet {
        return;
    }
    eprintln!(
        "{} {}",
        "oops: diagnosis unavailable:".dimmed(),
        failure_summary(err).dimmed()
    );
}

/// Compact human-readable summary, keyed by failure kind
pub fn failure_summary(err: &ProviderError) -> String {
    match err {
        ProviderError::Unreachable { provider, .. } => {
            format!("{provider} unreachable (network or timeout)")
        }
        ProviderError::Rejected { provider, status, .. } => {
            format!("{provider} rejected the request (HTTP {status}); check configuration")
        }
        ProviderError::RateLimited { provider } => format!("{provider} rate limit hit"),
        ProviderError::MissingCredential { env_var, .. } => {
            format!("no API key configured (set {env_var})")
        }
        ProviderError::MalformedResponse { provider, .. } => {
            format!("{provider} returned an unusable response")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_standard_format() {
        let response = "CAUSE: The directory does not exist.\n\
            FIX: Check the path with `ls ..` first.\n\
            NEXT: Create it with mkdir if intended.";

        let result = parse_diagnosis("ls /nonexistent", response);

        assert_eq!(result.command, "ls /nonexistent");
        assert_eq!(result.cause, "The directory does not exist.");
        assert!(result.fix.contains("Check the path"));
        assert!(result.next_steps.contains("mkdir"));
    }

    #[test]
    fn test_parse_markdown_bold_labels() {
        let response = "**Cause:** Missing dependency.\n\
            **Fix:** Run npm install.\n\
            **Next:** Re-run the build.";

        let result = parse_diagnosis("npm run build", response);

        assert_eq!(result.cause, "Missing dependency.");
        assert_eq!(result.fix, "Run npm install.");
        assert_eq!(result.next_steps, "Re-run the build.");
    }

    #[test]
    fn test_parse_multiline_sections() {
        let response = "CAUSE: Two problems:\n\
            the lockfile is stale\n\
            and the registry is unreachable.\n\
            FIX: Delete the lockfile.";

        let result = parse_diagnosis("npm ci", response);

        assert!(result.cause.contains("lockfile is stale"));
        assert!(result.cause.contains("registry is unreachable"));
        assert_eq!(result.fix, "Delete the lockfile.");
    }

    #[test]
    fn test_parse_unstructured_fallback() {
        let response = "The command failed because the file is missing.";
        let result = parse_diagnosis("cat notes", response);
        assert_eq!(result.cause, response);
        assert!(result.fix.is_empty());
    }

    #[test]
    fn test_parse_skips_code_fences() {
        let response = "CAUSE: Bad flag.\nFIX:\n```\ncargo build --release\n```";
        let result = parse_diagnosis("cargo biuld", response);
        assert_eq!(result.fix, "cargo build --release");
    }

    #[test]
    fn test_parse_next_steps_label_variant() {
        let response = "CAUSE: x\nFIX: y\nNEXT STEPS: commit the fix";
        let result = parse_diagnosis("cmd", response);
        assert_eq!(result.next_steps, "commit the fix");
    }

    #[test]
    fn test_extract_section_label_case_insensitive() {
        let (section, rest) = extract_section_label("cause: lowercase works").unwrap();
        assert_eq!(section, "cause");
        assert_eq!(rest, "lowercase works");

        let (section, _) = extract_section_label("FIX:").unwrap();
        assert_eq!(section, "fix");
    }

    #[test]
    fn test_extract_section_label_not_a_label() {
        assert!(extract_section_label("This is regular text").is_none());
        assert!(extract_section_label("causeway ahead").is_none());
        assert!(extract_section_label("fixture setup").is_none());
    }

    #[test]
    fn test_diagnosis_serializes_to_json() {
        let diagnosis = Diagnosis {
            command: "ls /nope".to_string(),
            cause: "missing dir".to_string(),
            fix: "mkdir /nope".to_string(),
            next_steps: String::new(),
        };
        let json = serde_json::to_string(&diagnosis).unwrap();
        assert!(json.contains("\"command\":\"ls /nope\""));
        assert!(json.contains("\"cause\":\"missing dir\""));
    }

    #[test]
    fn test_failure_summary_kinds() {
        let unreachable = ProviderError::Unreachable {
            provider: "OpenAI".to_string(),
            message: "timeout".to_string(),
        };
        assert!(failure_summary(&unreachable).contains("unreachable"));

        let rejected = ProviderError::Rejected {
            provider: "OpenAI".to_string(),
            status: 401,
            message: "bad key".to_string(),
        };
        assert!(failure_summary(&rejected).contains("401"));
    }
}
